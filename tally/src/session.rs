//! The interactive checklist session.
//!
//! A [`Session`] owns the document as a list of lines plus a cursor, and
//! every mutation goes through the same writeout: join the lines, hand them
//! to the [`Recorder`], re-parse the outline. Nothing here touches the
//! terminal; the `view` command drives a session from key presses and the
//! tests drive it directly.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::core::checkbox::{self, CommandLine, Status};
use crate::core::error::{InteractionError, ParseError};
use crate::core::markdown::{self, DocumentTree};
use crate::core::model::OutputMode;
use crate::core::render::FENCE;
use crate::core::viewport::Viewport;
use crate::io::process::{CommandRunner, OutputStream, StreamEvent};
use crate::io::recorder::Recorder;

/// Tabs in command output are expanded to this many spaces.
const TAB_WIDTH: usize = 4;

/// Hooks the session calls while a command is running.
pub trait ExecutionMonitor {
    /// Polled whenever the command is idle or produced output. Returning
    /// `true` terminates the command.
    fn interrupted(&mut self) -> bool;

    /// Called after streamed output has been written into the document.
    fn on_output(&mut self, _lines: &[String], _viewport: &Viewport) {}
}

/// Monitor for runs nobody is watching.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl ExecutionMonitor for Unattended {
    fn interrupted(&mut self) -> bool {
        false
    }
}

pub struct Session<R: Recorder> {
    lines: Vec<String>,
    /// The buffer as of the last successful write.
    written: Vec<String>,
    trailing_newline: bool,
    tree: DocumentTree,
    viewport: Viewport,
    directory: PathBuf,
    recorder: R,
    max_line_width: usize,
    dirty: bool,
}

impl<R: Recorder> Session<R> {
    /// Open `text` for editing. Attachments and command output land under
    /// `directory`.
    pub fn new(
        text: &str,
        directory: impl Into<PathBuf>,
        recorder: R,
        height: usize,
    ) -> Result<Self, ParseError> {
        let (lines, trailing_newline) = split_lines(text);
        let tree = markdown::parse(&lines)?;
        let viewport = Viewport::new(lines.len(), height);
        Ok(Self {
            written: lines.clone(),
            lines,
            trailing_newline,
            tree,
            viewport,
            directory: directory.into(),
            recorder,
            max_line_width: 250,
            dirty: false,
        })
    }

    /// Longest line spliced into the document; longer output is wrapped.
    pub fn with_max_line_width(mut self, width: usize) -> Self {
        self.max_line_width = width.max(1);
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn cursor(&self) -> usize {
        self.viewport.cursor()
    }

    pub fn current_line(&self) -> &str {
        self.lines.get(self.cursor()).map_or("", String::as_str)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// True once anything has been written since the session started.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn into_recorder(self) -> R {
        self.recorder
    }

    /// The document as it is written out.
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        if self.trailing_newline {
            text.push('\n');
        }
        text
    }

    pub fn move_to(&mut self, line: usize) {
        self.viewport.move_to(line);
    }

    pub fn move_by(&mut self, delta: isize) {
        self.viewport.move_by(delta);
    }

    pub fn page(&mut self, delta: isize) {
        self.viewport.page(delta);
    }

    pub fn resize(&mut self, height: usize) {
        self.viewport.resize(height);
    }

    /// Move to the next checkbox below the cursor. Returns false when there
    /// is none; the cursor stays put.
    pub fn next_checkbox(&mut self) -> bool {
        let found = (self.cursor() + 1..self.lines.len()).find(|&i| checkbox::is_checkbox(&self.lines[i]));
        self.jump(found)
    }

    pub fn previous_checkbox(&mut self) -> bool {
        let found = (0..self.cursor()).rev().find(|&i| checkbox::is_checkbox(&self.lines[i]));
        self.jump(found)
    }

    fn jump(&mut self, target: Option<usize>) -> bool {
        match target {
            Some(line) => {
                self.viewport.move_to(line);
                true
            }
            None => false,
        }
    }

    /// Flip the current checkbox. Returns false when the cursor is not on one.
    pub fn toggle(&mut self) -> Result<bool, InteractionError> {
        self.rewrite_current(checkbox::toggle)
    }

    pub fn mark(&mut self) -> Result<bool, InteractionError> {
        self.rewrite_current(checkbox::mark)
    }

    pub fn unmark(&mut self) -> Result<bool, InteractionError> {
        self.rewrite_current(checkbox::unmark)
    }

    fn rewrite_current(&mut self, f: fn(&str) -> String) -> Result<bool, InteractionError> {
        let line = self.current_line();
        if !checkbox::is_checkbox(line) {
            return Ok(false);
        }
        let updated = f(line);
        if updated == line {
            return Ok(false);
        }
        let cursor = self.cursor();
        self.lines[cursor] = updated;
        self.writeout()?;
        Ok(true)
    }

    /// Prefix the current checkbox with a status token, mark it, and move on.
    pub fn prefix_status(&mut self, status: Status) -> Result<bool, InteractionError> {
        let Some(updated) = checkbox::with_status(self.current_line(), status) else {
            return Ok(false);
        };
        let cursor = self.cursor();
        self.lines[cursor] = updated;
        self.writeout()?;
        self.mark()?;
        self.next_checkbox();
        Ok(true)
    }

    /// Copy the file behind the current attachment checkbox into the run
    /// directory and mark it.
    ///
    /// Without `explicit` the declared file name is resolved against the
    /// process working directory. A failed copy leaves the line unmarked.
    #[instrument(skip_all, fields(line = self.cursor()))]
    pub fn upload(&mut self, explicit: Option<&Path>) -> Result<bool, InteractionError> {
        let line = self.current_line().to_string();
        if !checkbox::is_attachment(&line) {
            return Ok(false);
        }
        let attachment =
            checkbox::parse_attachment_line(&line).ok_or(InteractionError::UnrecognizedAttachment(line))?;
        let from = explicit.map_or_else(|| PathBuf::from(&attachment.filename), Path::to_path_buf);
        let to = self.directory.join(&attachment.path);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|source| InteractionError::Copy {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;
        }
        fs::copy(&from, &to).map_err(|source| InteractionError::Copy {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        info!(from = %from.display(), to = %to.display(), "attached file");
        self.recorder.stage(&to)?;
        self.mark()?;
        Ok(true)
    }

    /// Run the command on the current checkbox and record its outcome.
    ///
    /// Returns the exit code (`-1` when killed by a signal), or `None` when
    /// the cursor is not on a command. On success the checkbox is marked and
    /// the cursor moves to the next one.
    #[instrument(skip_all, fields(line = self.cursor()))]
    pub fn execute_command(
        &mut self,
        runner: &dyn CommandRunner,
        monitor: &mut dyn ExecutionMonitor,
    ) -> Result<Option<i32>, InteractionError> {
        let line = self.current_line().to_string();
        if !checkbox::is_command(&line) {
            return Ok(None);
        }
        let shape = checkbox::parse_command_line(&line).ok_or(InteractionError::UnrecognizedCommand(line))?;
        info!(command = %shape.command, mode = %shape.mode, "running command");

        let mut stream = runner
            .spawn(&shape.command)
            .map_err(|source| spawn_error(&shape, source))?;
        let code = if shape.mode == OutputMode::Multi {
            self.stream_into_fence(&shape, stream.as_mut(), monitor)?
        } else {
            let (output, code) = collect(&shape, stream.as_mut(), monitor)?;
            self.record_result(&shape, code)?;
            self.apply_output(&shape, &output)?;
            code
        };
        debug!(code, "command finished");

        self.mark()?;
        self.next_checkbox();
        Ok(Some(code))
    }

    fn stream_into_fence(
        &mut self,
        shape: &CommandLine,
        stream: &mut dyn OutputStream,
        monitor: &mut dyn ExecutionMonitor,
    ) -> Result<i32, InteractionError> {
        let mut splice = self.prepare_fence();
        self.writeout().map_err(|err| stop(stream, err))?;
        let code = loop {
            if monitor.interrupted() {
                return Err(abort(shape, stream));
            }
            match stream.next_event().map_err(|source| spawn_error(shape, source))? {
                StreamEvent::Line(text) => {
                    for chunk in wrap(&sanitize(&text), self.max_line_width) {
                        self.lines.insert(splice, chunk);
                        splice += 1;
                    }
                    self.writeout().map_err(|err| stop(stream, err))?;
                    monitor.on_output(&self.lines, &self.viewport);
                }
                StreamEvent::Idle => {}
                StreamEvent::Exited(code) => break code.unwrap_or(-1),
            }
        };
        self.record_result(shape, code)?;
        Ok(code)
    }

    /// Find or create the fenced block belonging to the current command and
    /// empty it. Returns the line where output goes.
    fn prepare_fence(&mut self) -> usize {
        let mut open = self.cursor() + 1;
        while let Some(line) = self.lines.get(open)
            && is_annotation(line)
        {
            open += 1;
        }

        let is_fence = self.lines.get(open).is_some_and(|l| l.trim_start().starts_with(FENCE));
        if !is_fence {
            self.lines.insert(open, FENCE.to_string());
            self.lines.insert(open + 1, FENCE.to_string());
            return open + 1;
        }
        match self.closing_fence(open) {
            Some(close) => {
                self.lines.drain(open + 1..close);
            }
            None => {
                self.lines.truncate(open + 1);
                self.lines.push(FENCE.to_string());
            }
        }
        open + 1
    }

    fn closing_fence(&self, open: usize) -> Option<usize> {
        (open + 1..self.lines.len()).find(|&i| self.lines[i].trim_start().starts_with(FENCE))
    }

    /// Write `- result code: N` directly below the command, replacing an
    /// earlier one.
    fn record_result(&mut self, shape: &CommandLine, code: i32) -> Result<(), InteractionError> {
        let at = self.cursor() + 1;
        let result = checkbox::result_line(shape.indent, code);
        if self.lines.get(at).is_some_and(|l| checkbox::is_result_line(l, shape.indent)) {
            self.lines[at] = result;
        } else {
            self.lines.insert(at, result);
        }
        self.writeout()
    }

    fn apply_output(&mut self, shape: &CommandLine, output: &[String]) -> Result<(), InteractionError> {
        match shape.mode {
            OutputMode::Single => self.inline_output(output),
            OutputMode::Attach => self.attach_output(shape, output),
            OutputMode::Exitcode | OutputMode::Human | OutputMode::Multi => Ok(()),
        }
    }

    fn inline_output(&mut self, output: &[String]) -> Result<(), InteractionError> {
        let cursor = self.cursor();
        let inline = match output {
            [] => Some("<no output>".to_string()),
            [only] => Some(sanitize(only)),
            _ => None,
        };
        self.lines[cursor] = checkbox::with_inline_output(&self.lines[cursor], inline.as_deref());

        if inline.is_none() {
            let open = cursor + 2;
            if self.lines.get(open).is_some_and(|l| l.trim_start().starts_with(FENCE))
                && let Some(close) = self.closing_fence(open)
            {
                self.lines.drain(open..=close);
            }
            let mut block = vec![FENCE.to_string()];
            for line in output {
                block.extend(wrap(&sanitize(line), self.max_line_width));
            }
            block.push(FENCE.to_string());
            let tail = self.lines.split_off(open.min(self.lines.len()));
            self.lines.extend(block);
            self.lines.extend(tail);
        }
        self.writeout()
    }

    fn attach_output(&mut self, shape: &CommandLine, output: &[String]) -> Result<(), InteractionError> {
        let relative = shape.path.as_deref().unwrap_or_default();
        let path = self.directory.join(relative);
        let mut contents = output.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &contents)
        };
        write().map_err(|source| InteractionError::WriteArtifact {
            path: path.clone(),
            source,
        })?;
        self.recorder.stage(&path)?;
        Ok(())
    }

    /// Replace the whole document, e.g. after an external editor ran.
    pub fn reload(&mut self, text: &str) -> Result<(), ParseError> {
        let (lines, trailing_newline) = split_lines(text);
        self.tree = markdown::parse(&lines)?;
        self.written = lines.clone();
        self.lines = lines;
        self.trailing_newline = trailing_newline;
        self.viewport.set_len(self.lines.len());
        debug!(lines = self.lines.len(), "reloaded document");
        Ok(())
    }

    /// Persist the buffer. A failed write puts the buffer back to what was
    /// last written.
    fn writeout(&mut self) -> Result<(), InteractionError> {
        let text = self.text();
        let result = self.recorder.write_document(&text);
        match &result {
            Ok(()) => {
                self.dirty = true;
                self.written.clone_from(&self.lines);
            }
            Err(err) => {
                warn!(error = %err, "document write failed, restoring buffer");
                self.lines.clone_from(&self.written);
            }
        }
        match markdown::parse(&self.lines) {
            Ok(tree) => self.tree = tree,
            Err(err) => warn!(error = %err, "document no longer parses"),
        }
        self.viewport.set_len(self.lines.len());
        result.map_err(InteractionError::Storage)
    }
}

/// Lines between a command and its output block: descriptions, result
/// lines and other indented notes.
fn is_annotation(line: &str) -> bool {
    line.starts_with(char::is_whitespace) && !line.trim().is_empty() && !checkbox::is_checkbox(line)
}

fn collect(
    shape: &CommandLine,
    stream: &mut dyn OutputStream,
    monitor: &mut dyn ExecutionMonitor,
) -> Result<(Vec<String>, i32), InteractionError> {
    let mut output = Vec::new();
    loop {
        if monitor.interrupted() {
            return Err(abort(shape, stream));
        }
        match stream.next_event().map_err(|source| spawn_error(shape, source))? {
            StreamEvent::Line(text) => output.push(text),
            StreamEvent::Idle => {}
            StreamEvent::Exited(code) => return Ok((output, code.unwrap_or(-1))),
        }
    }
}

fn abort(shape: &CommandLine, stream: &mut dyn OutputStream) -> InteractionError {
    warn!(command = %shape.command, "execution aborted");
    if let Err(err) = stream.terminate() {
        warn!(error = %err, "failed to stop command");
    }
    InteractionError::Interrupted(shape.command.clone())
}

/// Stop the command after the document could not be written.
fn stop(stream: &mut dyn OutputStream, err: InteractionError) -> InteractionError {
    if let Err(kill_err) = stream.terminate() {
        warn!(error = %kill_err, "failed to stop command");
    }
    err
}

fn spawn_error(shape: &CommandLine, source: anyhow::Error) -> InteractionError {
    InteractionError::Spawn {
        command: shape.command.clone(),
        source,
    }
}

fn split_lines(text: &str) -> (Vec<String>, bool) {
    let lines = text.lines().map(str::to_string).collect();
    (lines, text.ends_with('\n'))
}

fn sanitize(line: &str) -> String {
    line.replace('\t', &" ".repeat(TAB_WIDTH))
}

/// Split `line` into pieces of at most `width` characters. An empty line
/// stays one empty piece.
fn wrap(line: &str, width: usize) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(width).map(|chunk| chunk.iter().collect()).collect()
}
