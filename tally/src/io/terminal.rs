//! Full-screen checklist display and key handling on top of crossterm.

use std::io::{Stdout, Write, stdout};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{execute, queue};
use regex::Regex;

use crate::core::checkbox::Status;
use crate::core::viewport::Viewport;

pub const HELP: &str = "\
tally view

  j, Down       next line
  k, Up         previous line
  Space         page down
  PgUp, PgDn    page up / down
  n, p          next / previous checkbox
  t             toggle checkbox and move on
  P, S, F       prefix PASS / SKIP / FAIL, mark and move on
  r             run the command on this line
  u             upload the attachment on this line
  e             open the document in an editor
  f             show link names or link paths
  ?             this help
  q, Esc        quit and commit

While a command runs, Esc or Ctrl-C stops it.

Press any key to return.";

/// What a key press asks the view to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Down,
    Up,
    PageDown,
    PageUp,
    NextCheckbox,
    PreviousCheckbox,
    Toggle,
    Status(Status),
    Run,
    Upload,
    Edit,
    ToggleLinks,
    Help,
    Quit,
}

pub fn action_for(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return (key.code == KeyCode::Char('c')).then_some(Action::Quit);
    }
    let action = match key.code {
        KeyCode::Char('j') | KeyCode::Down => Action::Down,
        KeyCode::Char('k') | KeyCode::Up => Action::Up,
        KeyCode::Char(' ') | KeyCode::PageDown => Action::PageDown,
        KeyCode::PageUp => Action::PageUp,
        KeyCode::Char('n') => Action::NextCheckbox,
        KeyCode::Char('p') => Action::PreviousCheckbox,
        KeyCode::Char('t') => Action::Toggle,
        KeyCode::Char('P') => Action::Status(Status::Pass),
        KeyCode::Char('S') => Action::Status(Status::Skip),
        KeyCode::Char('F') => Action::Status(Status::Fail),
        KeyCode::Char('r') => Action::Run,
        KeyCode::Char('u') => Action::Upload,
        KeyCode::Char('e') => Action::Edit,
        KeyCode::Char('f') => Action::ToggleLinks,
        KeyCode::Char('?') => Action::Help,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Keys that stop a running command.
pub fn is_interrupt(key: KeyEvent) -> bool {
    key.code == KeyCode::Esc || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

/// Input the view loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Action(Action),
    /// The terminal changed size; carries the new body height.
    Resize(usize),
}

/// How Markdown links are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkDisplay {
    #[default]
    Name,
    Path,
}

impl LinkDisplay {
    pub fn flipped(self) -> Self {
        match self {
            Self::Name => Self::Path,
            Self::Path => Self::Name,
        }
    }
}

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]*)\)").expect("valid link regex"));

/// Render `[name](path)` links as either their name or their path.
pub fn display_line(line: &str, links: LinkDisplay) -> String {
    let replacement = match links {
        LinkDisplay::Name => "$1",
        LinkDisplay::Path => "$2",
    };
    LINK_RE.replace_all(line, replacement).into_owned()
}

/// Cut `line` to at most `width` characters.
pub fn clip(line: &str, width: usize) -> &str {
    match line.char_indices().nth(width) {
        Some((end, _)) => &line[..end],
        None => line,
    }
}

/// Owns the terminal while the view runs; restores it on drop.
pub struct Terminal {
    out: Stdout,
    links: LinkDisplay,
}

impl Terminal {
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen, Hide).context("enter alternate screen")?;
        Ok(Self {
            out,
            links: LinkDisplay::default(),
        })
    }

    /// Rows available for the document; the last row is the status line.
    pub fn body_height(&self) -> Result<usize> {
        let (_, rows) = terminal::size().context("query terminal size")?;
        Ok(usize::from(rows).saturating_sub(1).max(1))
    }

    pub fn toggle_links(&mut self) {
        self.links = self.links.flipped();
    }

    pub fn draw(&mut self, lines: &[String], viewport: &Viewport, status: &str) -> Result<()> {
        let (cols, rows) = terminal::size().context("query terminal size")?;
        let width = usize::from(cols);
        queue!(self.out, Clear(ClearType::All))?;
        for (row, index) in viewport.window().enumerate() {
            let text = display_line(&lines[index], self.links);
            let text = clip(&text, width);
            queue!(self.out, MoveTo(0, row as u16))?;
            if index == viewport.cursor() {
                queue!(
                    self.out,
                    SetAttribute(Attribute::Reverse),
                    Print(format!("{text:<width$}")),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                queue!(self.out, Print(text))?;
            }
        }
        self.draw_status(rows.saturating_sub(1), width, status)?;
        self.out.flush().context("flush terminal")
    }

    fn draw_status(&mut self, row: u16, width: usize, status: &str) -> Result<()> {
        let status = clip(status, width);
        queue!(
            self.out,
            MoveTo(0, row),
            SetAttribute(Attribute::Reverse),
            Print(format!("{status:<width$}")),
            SetAttribute(Attribute::Reset)
        )?;
        Ok(())
    }

    pub fn draw_help(&mut self) -> Result<()> {
        queue!(self.out, Clear(ClearType::All))?;
        for (row, line) in HELP.lines().enumerate() {
            queue!(self.out, MoveTo(0, row as u16), Print(line))?;
        }
        self.out.flush().context("flush terminal")
    }

    /// Block until the next key press or resize.
    pub fn next_input(&self) -> Result<Option<Input>> {
        match event::read().context("read terminal event")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(action_for(key).map(Input::Action)),
            Event::Resize(_, rows) => Ok(Some(Input::Resize(usize::from(rows).saturating_sub(1).max(1)))),
            _ => Ok(None),
        }
    }

    /// Wait for any key, e.g. to leave the help screen.
    pub fn wait_for_key(&self) -> Result<()> {
        loop {
            if let Event::Key(key) = event::read().context("read terminal event")?
                && key.kind == KeyEventKind::Press
            {
                return Ok(());
            }
        }
    }

    /// Drain pending events and report whether one of them was an interrupt.
    pub fn interrupt_requested(&self) -> Result<bool> {
        while event::poll(Duration::ZERO).context("poll terminal events")? {
            if let Event::Key(key) = event::read().context("read terminal event")?
                && is_interrupt(key)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hand the terminal back to the shell while `f` runs, e.g. an editor.
    pub fn suspended<T>(&mut self, f: impl FnOnce() -> T) -> Result<T> {
        self.leave()?;
        let value = f();
        enable_raw_mode().context("enable raw mode")?;
        execute!(self.out, EnterAlternateScreen, Hide).context("enter alternate screen")?;
        Ok(value)
    }

    fn leave(&mut self) -> Result<()> {
        execute!(self.out, Show, LeaveAlternateScreen).context("leave alternate screen")?;
        disable_raw_mode().context("disable raw mode")
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}
