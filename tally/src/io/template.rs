//! Loading checklist templates from disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::error::ConfigError;
use crate::core::resolve::{ConfigDocument, IncludeLoader, resolve};

/// Resolves `include:` names against the directory of the top-level
/// template.
#[derive(Debug, Clone)]
pub struct FsIncludeLoader {
    base_dir: PathBuf,
}

impl FsIncludeLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl IncludeLoader for FsIncludeLoader {
    fn load(&self, name: &str) -> Result<String, ConfigError> {
        let path = self.base_dir.join(name);
        debug!(path = %path.display(), "loading include");
        fs::read_to_string(&path).map_err(|source| ConfigError::Include { path, source })
    }
}

/// Find the template file for `name`, trying `.yaml` and `.yml` suffixes
/// when the name itself does not exist.
pub fn find_template(name: &Path) -> Result<PathBuf> {
    if name.is_file() {
        return Ok(name.to_path_buf());
    }
    for ext in ["yaml", "yml"] {
        let candidate = PathBuf::from(format!("{}.{ext}", name.display()));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(anyhow!("template {} not found", name.display()))
}

/// Read and resolve a template file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_template(path: &Path) -> Result<ConfigDocument> {
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let doc = resolve(&source, &FsIncludeLoader::new(base_dir))
        .with_context(|| format!("resolve template {}", path.display()))?;
    debug!(sections = doc.len(), version = ?doc.version(), "template loaded");
    Ok(doc)
}
