//! Shared helpers for unit and integration tests: throwaway git
//! repositories, in-memory recorders and scripted command runners.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::io::git::Git;
use crate::io::process::{CommandRunner, OutputStream, StreamEvent};
use crate::io::recorder::Recorder;

/// A fresh git repository in a temp directory with a local identity.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let git = Git::init(dir.path())?;
        configure_identity(&git)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.dir.path())
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write test file");
        path
    }
}

/// Give `git` a committer identity so commits work on bare CI machines.
fn configure_identity(git: &Git) -> Result<()> {
    for (key, value) in [
        ("user.name", "Tally Test"),
        ("user.email", "tally@example.invalid"),
        ("commit.gpgsign", "false"),
    ] {
        let status = std::process::Command::new("git")
            .args(["config", key, value])
            .current_dir(git.workdir())
            .status()?;
        if !status.success() {
            return Err(anyhow!("git config {key} failed"));
        }
    }
    Ok(())
}

/// Path of a file under `tests/fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    let path = fixture_path(name);
    fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

/// Keeps every document write and staged path in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub writes: Vec<String>,
    pub staged: Vec<PathBuf>,
    /// Document writes beyond this many fail.
    capacity: Option<usize>,
}

impl MemoryRecorder {
    /// A recorder that accepts `writes` document writes and fails after.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            capacity: Some(writes),
            ..Self::default()
        }
    }

    pub fn last_write(&self) -> Option<&str> {
        self.writes.last().map(String::as_str)
    }
}

impl Recorder for MemoryRecorder {
    fn write_document(&mut self, text: &str) -> Result<()> {
        if self.capacity.is_some_and(|cap| self.writes.len() >= cap) {
            return Err(anyhow!("disk full"));
        }
        self.writes.push(text.to_string());
        Ok(())
    }

    fn stage(&mut self, path: &Path) -> Result<()> {
        self.staged.push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Script {
    lines: Vec<String>,
    /// `None` never exits on its own.
    exit: Option<i32>,
}

/// Replays canned output per command string. Unknown commands fail to spawn.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: BTreeMap<String, Script>,
    terminated: Rc<RefCell<BTreeSet<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, command: &str, lines: &[&str], code: i32) -> Self {
        self.scripts.insert(
            command.to_string(),
            Script {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit: Some(code),
            },
        );
        self
    }

    /// A command that prints `lines` and then runs until terminated.
    pub fn hanging(mut self, command: &str, lines: &[&str]) -> Self {
        self.scripts.insert(
            command.to_string(),
            Script {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit: None,
            },
        );
        self
    }

    pub fn was_terminated(&self, command: &str) -> bool {
        self.terminated.borrow().contains(command)
    }
}

impl CommandRunner for ScriptedRunner {
    fn spawn(&self, command: &str) -> Result<Box<dyn OutputStream>> {
        let script = self
            .scripts
            .get(command)
            .ok_or_else(|| anyhow!("no script for {command:?}"))?;
        Ok(Box::new(ScriptedStream {
            command: command.to_string(),
            pending: script.lines.iter().cloned().map(StreamEvent::Line).collect(),
            exit: script.exit,
            terminated: Rc::clone(&self.terminated),
            killed: false,
        }))
    }
}

struct ScriptedStream {
    command: String,
    pending: VecDeque<StreamEvent>,
    exit: Option<i32>,
    terminated: Rc<RefCell<BTreeSet<String>>>,
    killed: bool,
}

impl OutputStream for ScriptedStream {
    fn next_event(&mut self) -> Result<StreamEvent> {
        if self.killed {
            return Ok(StreamEvent::Exited(None));
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        Ok(match self.exit {
            Some(code) => StreamEvent::Exited(Some(code)),
            None => StreamEvent::Idle,
        })
    }

    fn terminate(&mut self) -> Result<()> {
        self.killed = true;
        self.terminated.borrow_mut().insert(self.command.clone());
        Ok(())
    }
}
