//! Orchestration for `tally setup`: a new git repository with a README and a
//! starter template.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::io::git::Git;
use crate::io::scaffold::Scaffold;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOutcome {
    pub directory: PathBuf,
    pub template: PathBuf,
}

/// Create `dir`, populate it and make the initial commit.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn setup_repository(dir: &Path) -> Result<SetupOutcome> {
    let (name, files) = scaffold_repository(dir)?;
    let git = Git::init(dir)?;
    git.add(&files)?;
    git.commit_staged(&format!("Initial setup for {name}"))?;
    info!(name, "repository ready");
    Ok(SetupOutcome {
        directory: dir.to_path_buf(),
        template: dir.join(&files[1]),
    })
}

/// Write the README and starter template. Returns the repository name and
/// the created file names.
fn scaffold_repository(dir: &Path) -> Result<(String, Vec<String>)> {
    if dir.exists() {
        return Err(anyhow!("{} already exists", dir.display()));
    }
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("cannot derive a repository name from {}", dir.display()))?
        .to_string();
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let scaffold = Scaffold::new();
    let readme = "README.md".to_string();
    let template = format!("{name}.yaml");
    for (file, contents) in [
        (&readme, scaffold.readme(&name)?),
        (&template, scaffold.starter_template(&template)?),
    ] {
        let path = dir.join(file);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    Ok((name, vec![readme, template]))
}
