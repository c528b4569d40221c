//! Markdown emission for compiled checklists.
//!
//! Headings are always Setext style so the parser can recover the level from
//! the underline character alone.

use crate::core::checkbox::{ATTACHMENT_GLYPH, COMMAND_GLYPH, format_checkbox};
use crate::core::model::{Actor, Command, OutputMode, TestInstance};

/// Placeholder text the session replaces with real command output.
pub const OUTPUT_PLACEHOLDER: &str = "COMMAND OUTPUT";
pub const COMMENT_PLACEHOLDER: &str = "ADD COMMENTS HERE";
pub const FENCE: &str = "```";

#[derive(Debug, Default)]
pub struct MarkdownWriter {
    out: String,
}

impl MarkdownWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn heading(&mut self, text: &str, underline: char) {
        self.line(text);
        let width = text.chars().count().max(3);
        self.line(&underline.to_string().repeat(width));
        self.line("");
    }

    pub fn h1(&mut self, text: &str) {
        self.heading(text, '=');
    }

    pub fn h2(&mut self, text: &str) {
        self.heading(text, '-');
    }

    pub fn paragraph(&mut self, text: &str) {
        self.line(text.trim_end());
        self.line("");
    }

    /// Emit a checkbox list; the list is closed with a blank line.
    pub fn checkbox_list(&mut self, f: impl FnOnce(&mut CheckboxList<'_>)) {
        let mut list = CheckboxList { writer: self };
        f(&mut list);
        self.line("");
    }
}

pub struct CheckboxList<'a> {
    writer: &'a mut MarkdownWriter,
}

impl CheckboxList<'_> {
    pub fn checkbox(&mut self, text: &str, indent: usize) {
        self.writer.line(&format_checkbox(text, indent, None));
    }

    pub fn attachment(&mut self, filename: &str, path: &str) {
        self.writer
            .line(&format_checkbox(&format!("[`{filename}`]({path})"), 0, Some(ATTACHMENT_GLYPH)));
    }

    pub fn command(&mut self, command: &Command) {
        let run = &command.run;
        let text = match command.output {
            OutputMode::Exitcode => format!("`{run}`"),
            OutputMode::Single => format!("`{run}`: `{OUTPUT_PLACEHOLDER}`"),
            OutputMode::Multi => format!("`{run}`:"),
            OutputMode::Attach => {
                let path = command
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                format!("[`{run}`]({path})")
            }
            OutputMode::Human => format!("`{run}`: **{COMMENT_PLACEHOLDER}**"),
        };
        self.writer.line(&format_checkbox(&text, 0, Some(COMMAND_GLYPH)));
        if let Some(description) = &command.description {
            self.writer.line(&format!("  - {description}"));
        }

        match command.output {
            OutputMode::Exitcode => {
                self.checkbox("SUCCESS", 1);
                self.checkbox("FAIL", 1);
            }
            OutputMode::Multi => {
                self.writer.line(FENCE);
                self.writer.line(&format!("   {OUTPUT_PLACEHOLDER}"));
                self.writer.line("");
                self.writer.line(FENCE);
            }
            _ => {}
        }
    }
}

/// Render the whole checklist document.
pub fn render_checklist(
    title: &str,
    preamble: &[String],
    actors: &[Actor],
    instances: &[TestInstance],
) -> String {
    let mut md = MarkdownWriter::new();
    md.h1(title);
    for text in preamble {
        md.paragraph(text);
    }

    for actor in actors {
        md.h2(&actor.name);
        if let Some(description) = &actor.description {
            md.paragraph(description);
        }
        md.checkbox_list(|list| {
            for instance in instances.iter().filter(|i| i.actor_id == actor.id) {
                let test = &instance.test;
                for instruction in &test.instructions {
                    list.checkbox(instruction, 0);
                }
                for file in &test.files {
                    let path = file
                        .path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    list.attachment(&file.filename, &path);
                }
                for command in &test.commands {
                    list.command(command);
                }
            }
        });
    }

    md.finish()
}
