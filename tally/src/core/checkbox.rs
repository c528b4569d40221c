//! Line-level checkbox syntax shared by the renderer, the parser and the
//! session.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::model::OutputMode;

/// Marks a checkbox whose item is a file to upload.
pub const ATTACHMENT_GLYPH: &str = "📎";
/// Marks a checkbox whose item is a command to run.
pub const COMMAND_GLYPH: &str = "⚙";

/// Status tokens that can prefix a checkbox's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Skip,
    Fail,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pass, Status::Skip, Status::Fail];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Skip => "SKIP",
            Self::Fail => "FAIL",
        }
    }

    fn token(self) -> String {
        format!("**{}** ", self.as_str())
    }
}

static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[[ xX]\]").expect("valid checkbox regex"));
static CHECKBOX_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[[ xX]\] ").expect("valid checkbox item regex"));
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*- )\[[ xX]\]").expect("valid bracket regex"));
static UNCHECKED_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*- )\[ \]").expect("valid unchecked bracket regex"));
static CHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[[xX]\]").expect("valid checked regex"));
static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*- \[[ xX]\]\s*)(.*)$").expect("valid status regex"));

/// Whether `line` is a checkbox the session can act on.
pub fn is_checkbox(line: &str) -> bool {
    CHECKBOX_RE.is_match(line)
}

/// Stricter form used by the parser: the bracket must be followed by a space.
pub fn is_checkbox_item(line: &str) -> bool {
    CHECKBOX_ITEM_RE.is_match(line)
}

pub fn is_checked(line: &str) -> bool {
    CHECKED_RE.is_match(line)
}

pub fn is_attachment(line: &str) -> bool {
    is_checkbox(line) && line.contains(ATTACHMENT_GLYPH)
}

pub fn is_command(line: &str) -> bool {
    is_checkbox(line) && line.contains(COMMAND_GLYPH)
}

/// Rewrite an empty bracket to `[x]`. Everything else stays byte-identical,
/// including an already checked `[X]`.
pub fn mark(line: &str) -> String {
    UNCHECKED_BRACKET_RE.replace(line, "${1}[x]").into_owned()
}

pub fn unmark(line: &str) -> String {
    BRACKET_RE.replace(line, "${1}[ ]").into_owned()
}

pub fn toggle(line: &str) -> String {
    if is_checked(line) { unmark(line) } else { mark(line) }
}

/// Replace any leading status tokens in the checkbox text with `status`.
///
/// Returns `None` when `line` is not a checkbox.
pub fn with_status(line: &str, status: Status) -> Option<String> {
    if !is_checkbox(line) {
        return None;
    }
    let caps = STATUS_RE.captures(line)?;
    let head = caps.get(1).map_or("", |m| m.as_str());
    let mut text = caps.get(2).map_or("", |m| m.as_str());
    while let Some(rest) = Status::ALL.iter().find_map(|s| text.strip_prefix(&s.token())) {
        text = rest;
    }
    Some(format!("{head}{}{text}", status.token()))
}

/// A command checkbox, classified by the shape of its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub mode: OutputMode,
    /// Leading whitespace before the `- [ ]`.
    pub indent: usize,
    pub command: String,
    /// Output file of attach-mode commands, relative to the run directory.
    pub path: Option<String>,
}

/// Shapes in match order; the first match wins.
static COMMAND_SHAPES: LazyLock<[(OutputMode, Regex); 5]> = LazyLock::new(|| {
    let shape = |re: &str| Regex::new(re).expect("valid command shape regex");
    [
        (OutputMode::Attach, shape(r"^(\s*)- \[.\].* \[`(.*)`\]\((.*)\).*$")),
        (OutputMode::Human, shape(r"^(\s*)- \[.\].* `(.*)`: \*\*(.*)\*\*$")),
        (OutputMode::Single, shape(r"^(\s*)- \[.\].* `(.*)`: `(.*)`$")),
        (OutputMode::Multi, shape(r"^(\s*)- \[.\].* `(.*)`:$")),
        (OutputMode::Exitcode, shape(r"^(\s*)- \[.\].* `(.*)`$")),
    ]
});

static ATTACHMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".* \[(.*)\]\((.*)\).*").expect("valid attachment regex"));
static INLINE_OUTPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*) `(.*)`:.*$").expect("valid inline output regex"));

pub fn parse_command_line(line: &str) -> Option<CommandLine> {
    COMMAND_SHAPES.iter().find_map(|(mode, re)| {
        let caps = re.captures(line)?;
        Some(CommandLine {
            mode: *mode,
            indent: caps.get(1).map_or(0, |m| m.as_str().len()),
            command: caps.get(2).map_or("", |m| m.as_str()).to_string(),
            path: (*mode == OutputMode::Attach).then(|| caps[3].to_string()),
        })
    })
}

/// An attachment checkbox: the declared file name and its target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLine {
    pub filename: String,
    pub path: String,
}

pub fn parse_attachment_line(line: &str) -> Option<AttachmentLine> {
    let caps = ATTACHMENT_RE.captures(line)?;
    Some(AttachmentLine {
        filename: caps[1].replace('`', ""),
        path: caps[2].to_string(),
    })
}

/// The annotation written below a command once it has finished.
pub fn result_line(indent: usize, code: i32) -> String {
    format!("{} - result code: {code}", " ".repeat(indent))
}

pub fn is_result_line(line: &str, indent: usize) -> bool {
    line.starts_with(&format!("{} - result code:", " ".repeat(indent)))
}

/// Rewrite a single-output command line to end in `` `output` ``, dropping
/// whatever output it carried before. `None` leaves just the trailing colon.
pub fn with_inline_output(line: &str, output: Option<&str>) -> String {
    let base = INLINE_OUTPUT_RE.replace(line, "${1} `${2}`:").into_owned();
    match output {
        Some(output) => format!("{base} `{output}`"),
        None => base,
    }
}

/// Format a rendered checkbox: two spaces per indent level, a leading space,
/// and an optional glyph before the text.
pub fn format_checkbox(text: &str, indent: usize, glyph: Option<&str>) -> String {
    let spaces = " ".repeat(indent * 2);
    match glyph {
        Some(glyph) => format!("{spaces} - [ ] {glyph} {text}"),
        None => format!("{spaces} - [ ] {text}"),
    }
}
