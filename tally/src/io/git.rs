//! Git adapter for staging and committing checklist changes.
//!
//! Every document mutation is staged immediately; commits happen at the end
//! of `new`, `setup` and `view`. We shell out to `git` rather than linking a
//! library so the user's own git configuration applies.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Open the repository containing `dir`, failing outside a git tree.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn discover(dir: &Path) -> Result<Self> {
        let git = Self::new(dir);
        let output = git.run(&["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(anyhow!(
                "tally must be run from within a git tree ({} is not inside one)",
                dir.display()
            ));
        }
        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(top = %top, "found git repository");
        Ok(git)
    }

    /// Initialize a new repository in `dir`.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn init(dir: &Path) -> Result<Self> {
        let git = Self::new(dir);
        git.run_checked(&["init", "--quiet"])?;
        Ok(git)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Stage the given paths (relative to the workdir or absolute).
    pub fn add<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.as_ref().display().to_string()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!(message, "committing staged changes");
        self.run_checked(&["commit", "--quiet", "-m", message])?;
        Ok(true)
    }

    /// Subject line of the most recent commit.
    pub fn last_commit_subject(&self) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--format=%s"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
