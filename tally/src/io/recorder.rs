//! Persistence of the checklist document and staging of changed files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::trace;

use crate::io::git::Git;

/// Where a session writes its document and reports changed files.
pub trait Recorder {
    /// Replace the stored document with `text`.
    fn write_document(&mut self, text: &str) -> Result<()>;

    /// Mark `path` as changed so it is part of the next commit.
    fn stage(&mut self, path: &Path) -> Result<()>;
}

/// Writes the document to disk and stages every change with git.
#[derive(Debug, Clone)]
pub struct FileRecorder {
    path: PathBuf,
    git: Option<Git>,
}

impl FileRecorder {
    pub fn new(path: impl Into<PathBuf>, git: Option<Git>) -> Self {
        Self {
            path: path.into(),
            git,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for FileRecorder {
    fn write_document(&mut self, text: &str) -> Result<()> {
        trace!(path = %self.path.display(), bytes = text.len(), "writing document");
        write_atomic(&self.path, text)?;
        let path = self.path.clone();
        self.stage(&path)
    }

    fn stage(&mut self, path: &Path) -> Result<()> {
        match &self.git {
            Some(git) => {
                let absolute = fs::canonicalize(path).with_context(|| format!("resolve {}", path.display()))?;
                git.add(&[absolute])
            }
            None => Ok(()),
        }
    }
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
