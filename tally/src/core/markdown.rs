//! Structural parser for checklist Markdown.
//!
//! Recovers a section / paragraph / checkbox tree from loosely formatted
//! text. Nodes live in an arena and refer to each other by [`NodeId`]; a
//! parallel table maps every line to the section containing it.
//!
//! Setext headings carry no level. Their level is inferred from the ancestor
//! chain: a heading whose underline character was already used by an
//! ancestor becomes that ancestor's sibling, otherwise it nests one level
//! below the current section.
//!
//! Fenced blocks (```` ``` ````) are opaque: every line up to the closing
//! fence belongs to a single paragraph, so command output spliced into a
//! document never turns into headings or checkboxes.

use tracing::trace;

use crate::core::checkbox;
use crate::core::error::ParseError;

pub type NodeId = usize;

/// The root node is always at index 0.
pub const ROOT: NodeId = 0;

const UNDERLINE_CHARS: &[char] = &['-', '_', '=', '.', ':'];
const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Section {
        headline: String,
        level: usize,
        /// Underline character for Setext headings, `#` for ATX headings.
        marker: char,
    },
    Paragraph {
        /// Leading whitespace of the first line; 0 for top-level paragraphs.
        indent: usize,
    },
    Checkbox {
        checked: bool,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// 0-based indices of the lines this node owns.
    pub lines: Vec<usize>,
}

impl Node {
    pub fn headline(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Section { headline, .. } => Some(headline),
            _ => None,
        }
    }

    pub fn level(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Section { level, .. } => Some(level),
            _ => None,
        }
    }

    fn marker(&self) -> Option<char> {
        match self.kind {
            NodeKind::Section { marker, .. } => Some(marker),
            _ => None,
        }
    }

    fn is_section(&self) -> bool {
        matches!(self.kind, NodeKind::Section { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTree {
    nodes: Vec<Node>,
    line_sections: Vec<Option<NodeId>>,
}

impl DocumentTree {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn root(&self) -> &Node {
        &self.nodes[ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn line_count(&self) -> usize {
        self.line_sections.len()
    }

    /// Section containing `line`, or `None` for the preamble.
    pub fn section_of_line(&self, line: usize) -> Option<NodeId> {
        self.line_sections.get(line).copied().flatten()
    }

    /// Sections in document order (pre-order traversal).
    pub fn sections(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[ROOT].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.nodes[id].is_section() {
                out.push(id);
            }
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        out
    }

    pub fn checkboxes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Checkbox { .. }))
    }
}

/// Parse text into a tree. A trailing newline does not produce an extra line.
pub fn parse_str(text: &str) -> Result<DocumentTree, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    parse(&lines)
}

pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<DocumentTree, ParseError> {
    if lines.is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    let mut parser = Parser::new(lines.len());
    parser.run(lines);
    Ok(parser.finish())
}

struct Parser {
    nodes: Vec<Node>,
    line_sections: Vec<Option<NodeId>>,
    section: Option<NodeId>,
    current: NodeId,
    /// Open fenced paragraph and the node it was attached to.
    fence: Option<(NodeId, NodeId)>,
}

impl Parser {
    fn new(line_count: usize) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                lines: Vec::new(),
            }],
            line_sections: vec![None; line_count],
            section: None,
            current: ROOT,
            fence: None,
        }
    }

    fn finish(self) -> DocumentTree {
        DocumentTree {
            nodes: self.nodes,
            line_sections: self.line_sections,
        }
    }

    fn container(&self) -> NodeId {
        self.section.unwrap_or(ROOT)
    }

    fn add_node(&mut self, parent: NodeId, kind: NodeKind, lines: Vec<usize>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            lines,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn stamp(&mut self, line: usize) {
        self.line_sections[line] = self.section;
    }

    fn run<S: AsRef<str>>(&mut self, lines: &[S]) {
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].as_ref();

            if let Some((para, owner)) = self.fence {
                self.nodes[para].lines.push(i);
                if line.trim_start().starts_with(FENCE) {
                    self.fence = None;
                    self.current = owner;
                }
                self.stamp(i);
                i += 1;
                continue;
            }

            if line.trim_start().starts_with(FENCE) {
                let owner = self.enclosing_checkbox().unwrap_or_else(|| self.container());
                let para = self.add_node(owner, NodeKind::Paragraph { indent: indent_of(line) }, vec![i]);
                self.fence = Some((para, owner));
                self.current = para;
                self.stamp(i);
                i += 1;
                continue;
            }

            if let Some((level, headline)) = atx_heading(line) {
                self.atx_section(i, level, headline);
                i += 1;
                continue;
            }

            if let Some(next) = lines.get(i + 1).map(AsRef::as_ref)
                && let Some(marker) = underline_char(next)
                && is_headline(line)
            {
                self.setext_section(i, line.trim(), marker);
                i += 2;
                continue;
            }

            if checkbox::is_checkbox_item(line) {
                let text = checkbox_text(line).to_string();
                let kind = NodeKind::Checkbox {
                    checked: checkbox::is_checked(line),
                    text,
                };
                self.current = self.add_node(self.container(), kind, vec![i]);
            } else if line.trim().is_empty() {
                self.blank(i);
            } else if indent_of(line) > 0 {
                self.indented(i, indent_of(line));
            } else {
                self.text(i);
            }
            self.stamp(i);
            i += 1;
        }
    }

    fn atx_section(&mut self, line: usize, level: usize, headline: &str) {
        let mut parent = ROOT;
        let mut cursor = self.section;
        while let Some(id) = cursor {
            if self.nodes[id].level().is_some_and(|l| l < level) {
                parent = id;
                break;
            }
            cursor = self.nodes[id].parent;
        }
        trace!(line, level, headline, "atx heading");
        let kind = NodeKind::Section {
            headline: headline.to_string(),
            level,
            marker: '#',
        };
        let id = self.add_node(parent, kind, vec![line]);
        self.section = Some(id);
        self.current = id;
        self.stamp(line);
    }

    fn setext_section(&mut self, line: usize, headline: &str, marker: char) {
        let (parent, level) = self.setext_placement(marker);
        trace!(line, level, headline, %marker, "setext heading");
        let kind = NodeKind::Section {
            headline: headline.to_string(),
            level,
            marker,
        };
        let id = self.add_node(parent, kind, vec![line, line + 1]);
        self.section = Some(id);
        self.current = id;
        self.stamp(line);
        self.stamp(line + 1);
    }

    fn setext_placement(&self, marker: char) -> (NodeId, usize) {
        let mut cursor = self.section;
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            if node.marker() == Some(marker) {
                let level = node.level().unwrap_or(1);
                return (node.parent.unwrap_or(ROOT), level);
            }
            cursor = node.parent.filter(|&p| p != ROOT);
        }
        match self.section {
            Some(id) => (id, self.nodes[id].level().unwrap_or(0) + 1),
            None => (ROOT, 1),
        }
    }

    /// The checkbox the current node belongs to, if any.
    fn enclosing_checkbox(&self) -> Option<NodeId> {
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            match self.nodes[id].kind {
                NodeKind::Checkbox { .. } => return Some(id),
                NodeKind::Paragraph { .. } => cursor = self.nodes[id].parent,
                _ => return None,
            }
        }
        None
    }

    fn blank(&mut self, line: usize) {
        if matches!(self.nodes[self.current].kind, NodeKind::Paragraph { .. }) {
            self.nodes[self.current].lines.push(line);
            self.current = self.container();
        } else {
            let container = self.container();
            self.nodes[container].lines.push(line);
        }
    }

    fn indented(&mut self, line: usize, indent: usize) {
        if matches!(self.nodes[self.current].kind, NodeKind::Paragraph { indent: depth } if depth > 0) {
            self.nodes[self.current].lines.push(line);
            return;
        }
        self.current = self.add_node(self.current, NodeKind::Paragraph { indent }, vec![line]);
    }

    fn text(&mut self, line: usize) {
        let open = match self.nodes[self.current].kind {
            NodeKind::Paragraph { indent: 0 } => Some(self.current),
            NodeKind::Paragraph { .. } => self.nodes[self.current]
                .parent
                .filter(|&p| matches!(self.nodes[p].kind, NodeKind::Paragraph { indent: 0 })),
            _ => None,
        };
        match open {
            Some(para) => {
                self.nodes[para].lines.push(line);
                self.current = para;
            }
            None => {
                self.current = self.add_node(self.container(), NodeKind::Paragraph { indent: 0 }, vec![line]);
            }
        }
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn atx_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    (level > 0).then(|| (level, line[level..].trim()))
}

/// The repeated character of a Setext underline: at least three identical
/// characters from `- _ = . :`, trailing whitespace allowed.
fn underline_char(line: &str) -> Option<char> {
    let body = line.trim_end();
    let first = body.chars().next()?;
    if !UNDERLINE_CHARS.contains(&first) || body.chars().count() < 3 {
        return None;
    }
    body.chars().all(|c| c == first).then_some(first)
}

fn is_headline(line: &str) -> bool {
    !line.trim().is_empty()
        && !checkbox::is_checkbox(line)
        && underline_char(line).is_none()
        && !line.trim_start().starts_with(FENCE)
}

fn checkbox_text(line: &str) -> &str {
    line.find("] ").map_or("", |i| &line[i + 2..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headline(tree: &DocumentTree, id: NodeId) -> &str {
        tree.node(id).headline().expect("section")
    }

    fn level(tree: &DocumentTree, id: NodeId) -> usize {
        tree.node(id).level().expect("section")
    }

    fn section_children(tree: &DocumentTree, id: NodeId) -> Vec<NodeId> {
        tree.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| tree.node(c).headline().is_some())
            .collect()
    }

    /// Every line is owned by exactly one node.
    fn assert_lines_partitioned(tree: &DocumentTree) {
        let mut owners = vec![0usize; tree.line_count()];
        for id in 0..tree.len() {
            for &line in &tree.node(id).lines {
                owners[line] += 1;
            }
        }
        assert!(owners.iter().all(|&n| n == 1), "line ownership: {owners:?}");
    }

    #[test]
    fn empty_input_is_an_error() {
        let lines: [&str; 0] = [];
        assert_eq!(parse(&lines), Err(ParseError::EmptyDocument));
    }

    #[test]
    fn hash_headings() {
        let tree = parse_str("## h2\nfoo\n### h3\n# h1\nbar\n").expect("parse");
        let top = &tree.root().children;
        assert_eq!(top.len(), 2);
        let (h2, h1) = (top[0], top[1]);
        assert_eq!(headline(&tree, h2), "h2");
        assert_eq!(level(&tree, h2), 2);
        assert_eq!(headline(&tree, h1), "h1");
        assert_eq!(level(&tree, h1), 1);

        let h3 = tree.node(h2).children[1];
        assert_eq!(headline(&tree, h3), "h3");
        assert_eq!(level(&tree, h3), 3);
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn underline_headings() {
        let text = "h1\n-----\n\nfoo\n\nh2\n===\n\nh2-2\n===\n\nh1\n----\n\nbar\n";
        let tree = parse_str(text).expect("parse");

        let top = &tree.root().children;
        assert_eq!(top.len(), 2);
        for &id in top {
            assert_eq!(headline(&tree, id), "h1");
            assert_eq!(level(&tree, id), 1);
        }

        let first = top[0];
        let children = &tree.node(first).children;
        let (h2, h2_2) = (children[1], children[2]);
        assert_eq!(headline(&tree, h2), "h2");
        assert_eq!(level(&tree, h2), 2);
        assert_eq!(headline(&tree, h2_2), "h2-2");
        assert_eq!(level(&tree, h2_2), 2);

        for line in 0..=4 {
            assert_eq!(tree.section_of_line(line), Some(first), "line {line}");
        }
        for line in 5..=7 {
            assert_eq!(tree.section_of_line(line), Some(h2), "line {line}");
        }
        for line in 8..=10 {
            assert_eq!(tree.section_of_line(line), Some(h2_2), "line {line}");
        }
        for line in 11..tree.line_count() {
            assert_eq!(tree.section_of_line(line), Some(top[1]), "line {line}");
        }
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn repeated_underline_makes_siblings() {
        let tree = parse_str("foo\n===\nbar\n---\nbaz\n---\n").expect("parse");
        assert_eq!(tree.root().children.len(), 1);
        let foo = tree.root().children[0];
        let nested = section_children(&tree, foo);
        assert_eq!(nested.len(), 2);
        assert!(nested.iter().all(|&id| level(&tree, id) == 2));
    }

    #[test]
    fn sections_are_listed_in_reading_order() {
        let tree = parse_str("a\n===\nb\n---\nc\n...\nd\n---\ne\n===\n").expect("parse");
        let names: Vec<&str> = tree.sections().into_iter().map(|id| headline(&tree, id)).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        let levels: Vec<usize> = tree.sections().into_iter().map(|id| level(&tree, id)).collect();
        assert_eq!(levels, vec![1, 2, 3, 2, 1]);
    }

    #[test]
    fn child_levels_exceed_parent_levels() {
        let tree = parse_str("# a\nx\n===\n### c\ny\n---\n").expect("parse");
        for id in tree.sections() {
            if let Some(parent) = tree.node(id).parent
                && let Some(parent_level) = tree.node(parent).level()
            {
                assert!(level(&tree, id) > parent_level);
            }
        }
    }

    #[test]
    fn checkboxes_attach_to_the_section() {
        let text = "Title\n=====\n\n - [ ] one\n - [x] two\n  - details\n   - [X] nested\n\n";
        let tree = parse_str(text).expect("parse");
        let title = tree.root().children[0];
        let boxes: Vec<(bool, String)> = tree
            .checkboxes()
            .map(|(_, n)| match &n.kind {
                NodeKind::Checkbox { checked, text } => (*checked, text.clone()),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            boxes,
            vec![
                (false, "one".to_string()),
                (true, "two".to_string()),
                (true, "nested".to_string()),
            ]
        );
        assert!(tree.checkboxes().all(|(_, n)| n.parent == Some(title)));

        let (two, _) = tree.checkboxes().nth(1).expect("second checkbox");
        let details = tree.node(two).children[0];
        assert_eq!(tree.node(details).kind, NodeKind::Paragraph { indent: 2 });
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let tree = parse_str("intro\nmore\n\nsecond\n  indented\n  still\nback\n").expect("parse");
        let top = &tree.root().children;
        assert_eq!(top.len(), 2);
        assert_eq!(tree.node(top[0]).lines, vec![0, 1, 2]);
        let second = tree.node(top[1]);
        assert_eq!(second.lines, vec![3, 6]);
        let indented = tree.node(second.children[0]);
        assert_eq!(indented.kind, NodeKind::Paragraph { indent: 2 });
        assert_eq!(indented.lines, vec![4, 5]);
        assert_eq!(tree.section_of_line(0), None);
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn fenced_output_is_opaque() {
        let text = "T\n===\n - [ ] ⚙ `dmesg`:\n   - result code: 0\n```\n# not a heading\nfoo\n---\n - [ ] nope\n```\n - [ ] after\n";
        let tree = parse_str(text).expect("parse");
        assert_eq!(tree.sections().len(), 1);
        assert_eq!(tree.checkboxes().count(), 2);

        let (command, node) = tree.checkboxes().next().expect("command");
        assert_eq!(node.children.len(), 2);
        let fence = tree.node(node.children[1]);
        assert_eq!(fence.lines, vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(fence.parent, Some(command));
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn parses_the_fixture_document() {
        let tree = parse_str(&crate::test_support::fixture("parsertest.md")).expect("parse");
        let names: Vec<&str> = tree.sections().into_iter().map(|id| headline(&tree, id)).collect();
        assert_eq!(names, vec!["Parser test", "First section", "Nested heading", "Second section"]);
        let levels: Vec<usize> = tree.sections().into_iter().map(|id| level(&tree, id)).collect();
        assert_eq!(levels, vec![1, 2, 3, 2]);

        let checked: Vec<bool> = tree
            .checkboxes()
            .map(|(_, node)| matches!(node.kind, NodeKind::Checkbox { checked: true, .. }))
            .collect();
        assert_eq!(checked, vec![false, true, false, false]);

        let last = tree.section_of_line(22).expect("section");
        assert_eq!(headline(&tree, last), "Second section");
        assert_lines_partitioned(&tree);
    }

    #[test]
    fn parses_rendered_checklists() {
        use crate::core::compile::{CompileOptions, compile};
        use crate::core::resolve::resolve_str;

        let doc = resolve_str(
            "a:\n  type: actor\n  tags: {t: v}\nt1:\n  type: test\n  tests: [one]\n  logs:\n    commands:\n      - run: dmesg\n        output: multi\nt2:\n  type: test\n  filter: {t: [v]}\n  tests: [two]\n",
        )
        .expect("resolve");
        let checklist = compile(&doc, &CompileOptions::default()).expect("compile");
        let tree = parse_str(&checklist.document).expect("parse");

        let names: Vec<&str> = tree.sections().into_iter().map(|id| headline(&tree, id)).collect();
        assert_eq!(names, vec!["Checklist", "Generic", "a"]);
        let levels: Vec<usize> = tree.sections().into_iter().map(|id| level(&tree, id)).collect();
        assert_eq!(levels, vec![1, 2, 2]);
        assert_eq!(tree.checkboxes().count(), 3);
        assert_lines_partitioned(&tree);
    }
}
