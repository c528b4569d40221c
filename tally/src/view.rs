//! Orchestration for `tally view` and `tally check`.
//!
//! `view` gates on the run's precheck, opens its document in a [`Session`]
//! and translates key presses into session operations until the user quits.
//! Everything the session wrote is staged as it happened; quitting commits.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, instrument, warn};

use crate::core::error::InteractionError;
use crate::core::viewport::Viewport;
use crate::exit_codes;
use crate::io::config::TallyConfig;
use crate::io::git::Git;
use crate::io::layout::{default_run_dir, find_document};
use crate::io::precheck::{PrecheckOutcome, run_precheck};
use crate::io::process::{CommandRunner, ShellRunner};
use crate::io::recorder::{FileRecorder, Recorder};
use crate::io::terminal::{Action, Input, Terminal};
use crate::logging;
use crate::session::{ExecutionMonitor, Session};

pub const COMMIT_MESSAGE: &str = "tally view changes";
const READY: &str = "? for help, q to quit";

/// What the view loop does after an action was applied to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Status(String),
    Help,
    Edit,
    ToggleLinks,
    Quit,
}

/// Apply `action` to `session`.
pub fn dispatch<R: Recorder>(
    session: &mut Session<R>,
    action: Action,
    runner: &dyn CommandRunner,
    monitor: &mut dyn ExecutionMonitor,
) -> Result<Step, InteractionError> {
    let step = match action {
        Action::Down => {
            session.move_by(1);
            Step::Continue
        }
        Action::Up => {
            session.move_by(-1);
            Step::Continue
        }
        Action::PageDown => {
            session.page(1);
            Step::Continue
        }
        Action::PageUp => {
            session.page(-1);
            Step::Continue
        }
        Action::NextCheckbox => {
            if session.next_checkbox() {
                Step::Continue
            } else {
                Step::Status("no further checkbox".into())
            }
        }
        Action::PreviousCheckbox => {
            if session.previous_checkbox() {
                Step::Continue
            } else {
                Step::Status("no earlier checkbox".into())
            }
        }
        Action::Toggle => {
            if session.toggle()? {
                session.next_checkbox();
            }
            Step::Continue
        }
        Action::Status(status) => {
            if !session.prefix_status(status)? {
                return Ok(Step::Status("not a checkbox".into()));
            }
            Step::Continue
        }
        Action::Run => match session.execute_command(runner, monitor)? {
            Some(code) => Step::Status(format!("result code: {code}")),
            None => Step::Status("not a command".into()),
        },
        Action::Upload => {
            if session.upload(None)? {
                Step::Status("uploaded".into())
            } else {
                Step::Status("not an attachment".into())
            }
        }
        Action::Edit => Step::Edit,
        Action::ToggleLinks => Step::ToggleLinks,
        Action::Help => Step::Help,
        Action::Quit => Step::Quit,
    };
    Ok(step)
}

/// Redraws streamed output and watches for Esc / Ctrl-C while a command runs.
struct TerminalMonitor<'a> {
    terminal: &'a mut Terminal,
}

impl ExecutionMonitor for TerminalMonitor<'_> {
    fn interrupted(&mut self) -> bool {
        self.terminal.interrupt_requested().unwrap_or(false)
    }

    fn on_output(&mut self, lines: &[String], viewport: &Viewport) {
        if let Err(err) = self.terminal.draw(lines, viewport, "running, Esc to stop") {
            warn!(error = %err, "redraw failed");
        }
    }
}

/// Resolve the run directory: `dir` relative to `root`, else the default.
pub fn run_directory(root: &Path, dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => {
            let dir = root.join(dir);
            if !dir.is_dir() {
                return Err(anyhow!("{} is not a directory", dir.display()));
            }
            Ok(dir)
        }
        None => default_run_dir(root),
    }
}

/// Run the precheck for `dir`; returns the process exit code.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn check(dir: &Path) -> Result<i32> {
    match run_precheck(dir)? {
        PrecheckOutcome::Failed { code, output } => {
            eprint!("{output}");
            error!(?code, "precheck failed");
            Ok(exit_codes::PRECHECK_FAILED)
        }
        PrecheckOutcome::Missing | PrecheckOutcome::Passed => Ok(exit_codes::OK),
    }
}

/// Run `tally view` on `dir`; returns the process exit code.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn view(dir: &Path, config: &TallyConfig) -> Result<i32> {
    if config.precheck {
        let code = check(dir)?;
        if code != exit_codes::OK {
            return Ok(code);
        }
    }

    let document = find_document(dir)?;
    let git = Git::discover(dir)?;
    let text = fs::read_to_string(&document).with_context(|| format!("read {}", document.display()))?;
    let runner = ShellRunner::new(config.poll_interval(), config.interrupt_grace());

    {
        let _quiet = logging::suppress();
        let mut terminal = Terminal::enter()?;
        let recorder = FileRecorder::new(&document, Some(git.clone()));
        let mut session = Session::new(&text, dir, recorder, terminal.body_height()?)
            .with_context(|| format!("parse {}", document.display()))?
            .with_max_line_width(config.max_line_width);
        drive(&mut terminal, &mut session, &runner, config, &git)?;
    }

    if git.commit_staged(COMMIT_MESSAGE)? {
        info!("committed view changes");
    }
    Ok(exit_codes::OK)
}

fn drive(
    terminal: &mut Terminal,
    session: &mut Session<FileRecorder>,
    runner: &ShellRunner,
    config: &TallyConfig,
    git: &Git,
) -> Result<()> {
    let mut status = READY.to_string();
    loop {
        terminal.draw(session.lines(), session.viewport(), &status)?;
        let action = match terminal.next_input()? {
            Some(Input::Action(action)) => action,
            Some(Input::Resize(height)) => {
                session.resize(height);
                continue;
            }
            None => continue,
        };

        let mut monitor = TerminalMonitor { terminal: &mut *terminal };
        let step = match dispatch(session, action, runner, &mut monitor) {
            Ok(step) => step,
            Err(err) => {
                error!(error = %err, "operation failed");
                Step::Status(err.to_string())
            }
        };
        status = READY.to_string();
        match step {
            Step::Continue => {}
            Step::Status(message) => status = message,
            Step::Help => {
                terminal.draw_help()?;
                terminal.wait_for_key()?;
            }
            Step::ToggleLinks => terminal.toggle_links(),
            Step::Edit => status = edit(terminal, session, config, git)?,
            Step::Quit => return Ok(()),
        }
    }
}

/// Open the document in the configured editor, then reload it.
fn edit(
    terminal: &mut Terminal,
    session: &mut Session<FileRecorder>,
    config: &TallyConfig,
    git: &Git,
) -> Result<String> {
    let Some(editor) = config.editor_command() else {
        return Ok("no editor configured, set $EDITOR".into());
    };
    let document = session.recorder().path().to_path_buf();
    let status = terminal.suspended(|| {
        Command::new("sh")
            .arg("-c")
            .arg(format!("{editor} \"$1\""))
            .arg("sh")
            .arg(&document)
            .status()
    })?;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => return Ok(format!("editor exited with {status}")),
        Err(err) => return Ok(format!("cannot start {editor}: {err}")),
    }

    let text = fs::read_to_string(&document).with_context(|| format!("read {}", document.display()))?;
    if let Err(err) = session.reload(&text) {
        return Ok(format!("cannot reload document: {err}"));
    }
    git.add(&[&document])?;
    Ok("reloaded".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkbox::Status;
    use crate::session::Unattended;
    use crate::test_support::{MemoryRecorder, ScriptedRunner};

    const DOC: &str = "\
Run
===

 - [ ] plug in
 - [ ] ⚙ `true`
 - [ ] 📎 [`a.log`](generic/t/a.log)
";

    fn session(dir: &Path) -> Session<MemoryRecorder> {
        Session::new(DOC, dir, MemoryRecorder::default(), 5).expect("parse")
    }

    #[test]
    fn toggle_marks_and_advances() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut s = session(temp.path());
        let runner = ScriptedRunner::new();
        dispatch(&mut s, Action::NextCheckbox, &runner, &mut Unattended).expect("next");
        let step = dispatch(&mut s, Action::Toggle, &runner, &mut Unattended).expect("toggle");
        assert_eq!(step, Step::Continue);
        assert_eq!(s.lines()[3], " - [x] plug in");
        assert_eq!(s.cursor(), 4);
    }

    #[test]
    fn run_reports_the_result_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut s = session(temp.path());
        s.move_to(4);
        let runner = ScriptedRunner::new().with("true", &[], 0);
        let step = dispatch(&mut s, Action::Run, &runner, &mut Unattended).expect("run");
        assert_eq!(step, Step::Status("result code: 0".into()));
    }

    #[test]
    fn actions_off_target_only_set_a_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut s = session(temp.path());
        let runner = ScriptedRunner::new();
        let step = dispatch(&mut s, Action::Status(Status::Pass), &runner, &mut Unattended).expect("status");
        assert_eq!(step, Step::Status("not a checkbox".into()));
        let step = dispatch(&mut s, Action::Upload, &runner, &mut Unattended).expect("upload");
        assert_eq!(step, Step::Status("not an attachment".into()));
        let step = dispatch(&mut s, Action::PreviousCheckbox, &runner, &mut Unattended).expect("previous");
        assert_eq!(step, Step::Status("no earlier checkbox".into()));
        assert!(s.recorder().writes.is_empty());
    }

    #[test]
    fn interaction_errors_are_returned_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut s = session(temp.path());
        s.move_to(5);
        let err = dispatch(&mut s, Action::Upload, &ScriptedRunner::new(), &mut Unattended).unwrap_err();
        assert!(matches!(err, InteractionError::Copy { .. }));
        assert_eq!(s.lines()[5], " - [ ] 📎 [`a.log`](generic/t/a.log)");
    }

    #[test]
    fn ui_actions_pass_through() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut s = session(temp.path());
        let runner = ScriptedRunner::new();
        for (action, step) in [
            (Action::Help, Step::Help),
            (Action::Edit, Step::Edit),
            (Action::ToggleLinks, Step::ToggleLinks),
            (Action::Quit, Step::Quit),
        ] {
            assert_eq!(dispatch(&mut s, action, &runner, &mut Unattended).expect("dispatch"), step);
        }
    }

    #[test]
    fn explicit_directory_must_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = run_directory(temp.path(), Some(Path::new("nope"))).unwrap_err();
        assert!(err.to_string().contains("not a directory"), "{err:#}");
    }

    #[cfg(unix)]
    #[test]
    fn check_maps_failure_to_its_exit_code() {
        use crate::io::precheck::write_precheck;
        use crate::io::scaffold::Scaffold;

        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(check(temp.path()).expect("check"), exit_codes::OK);
        let path = write_precheck(temp.path(), &Scaffold::new(), "run").expect("write");
        fs::write(&path, "#!/bin/sh\nexit 2\n").expect("write");
        assert_eq!(check(temp.path()).expect("check"), exit_codes::PRECHECK_FAILED);
    }
}
