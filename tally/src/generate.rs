//! Orchestration for `tally new`: compile a template into a fresh run
//! directory and commit it.
//!
//! A run directory holds the resolved template, the rendered checklist, the
//! pre-created attachment files and a `tally-check` script. The `.tally`
//! marker lets `view` find it later without being told where it is.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::core::compile::{CompileOptions, SUPPORTED_VERSION, compile};
use crate::io::git::Git;
use crate::io::layout::{run_dirname, update_latest_link, write_marker};
use crate::io::precheck::write_precheck;
use crate::io::scaffold::Scaffold;
use crate::io::template::{find_template, load_template};

/// Outcome of `tally new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub directory: PathBuf,
    pub document: PathBuf,
    pub actors: usize,
    pub instances: usize,
    pub committed: bool,
}

/// Create a run directory for `template` under `root`.
///
/// - `directory` defaults to `<stem>-<today>.<n>` with the first free `n`.
/// - The template's stem becomes the document title and file name.
/// - `tally-latest` is repointed at the new run.
/// - Everything written is staged and committed.
#[instrument(skip_all, fields(template = %template.display()))]
pub fn new_run(root: &Path, template: &Path, directory: Option<&Path>, today: NaiveDate) -> Result<NewRun> {
    let git = Git::discover(root)?;
    let template = find_template(&root.join(template))?;
    let stem = template
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("template name is not valid UTF-8: {}", template.display()))?
        .to_string();

    let doc = load_template(&template)?;
    let options = CompileOptions { title: stem.clone() };
    let checklist = compile(&doc, &options).with_context(|| format!("compile {}", template.display()))?;

    let relative = match directory {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from(run_dirname(root, &stem, today)),
    };
    let run_dir = root.join(&relative);
    if run_dir.exists() {
        return Err(anyhow!("{} already exists", run_dir.display()));
    }
    fs::create_dir_all(&run_dir).with_context(|| format!("create {}", run_dir.display()))?;
    debug!(dir = %run_dir.display(), "created run directory");

    write_marker(&run_dir)?;

    let mut resolved = doc.to_yaml().context("serialize resolved template")?;
    if doc.version().is_none() {
        resolved.insert_str(0, &format!("version: {SUPPORTED_VERSION}\n"));
    }
    let file_name = template
        .file_name()
        .ok_or_else(|| anyhow!("template has no file name: {}", template.display()))?;
    let resolved_path = run_dir.join(file_name);
    fs::write(&resolved_path, resolved).with_context(|| format!("write {}", resolved_path.display()))?;

    let document = run_dir.join(format!("{stem}.md"));
    fs::write(&document, &checklist.document).with_context(|| format!("write {}", document.display()))?;

    for artifact in &checklist.artifacts {
        let path = run_dir.join(&artifact.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, &artifact.contents).with_context(|| format!("write {}", path.display()))?;
    }

    let run_name = relative.display().to_string();
    write_precheck(&run_dir, &Scaffold::new(), &run_name)?;

    let mut staged = vec![run_dir.clone()];
    if update_latest_link(root, &run_name)? {
        staged.push(root.join(crate::io::layout::LATEST_LINK));
    }
    git.add(&staged)?;
    let committed = git.commit_staged(&format!("New tally test run - {run_name}"))?;

    info!(
        dir = %run_dir.display(),
        actors = checklist.actors.len(),
        instances = checklist.instances.len(),
        "run created"
    );
    Ok(NewRun {
        directory: run_dir,
        document,
        actors: checklist.actors.len(),
        instances: checklist.instances.len(),
        committed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::layout::{LATEST_LINK, MARKER_FILE};
    use crate::test_support::{TestRepo, fixture};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).expect("date")
    }

    #[test]
    fn new_run_writes_and_commits_everything() {
        let repo = TestRepo::new().expect("repo");
        repo.write("basic-tree.yaml", &fixture("basic-tree.yaml"));

        let run = new_run(repo.path(), Path::new("basic-tree"), None, today()).expect("new");
        let dir = repo.path().join("basic-tree-2024-05-17.0");
        assert_eq!(run.directory, dir);
        assert!(run.committed);
        assert!(dir.join(MARKER_FILE).is_file());
        assert!(dir.join("basic-tree.yaml").is_file());
        assert!(dir.join("tally-check").is_file());

        let document = fs::read_to_string(&run.document).expect("read");
        assert!(document.starts_with("basic-tree\n==========\n"));
        let attachment = dir.join("generic/test1/file01-generic");
        assert_eq!(fs::read_to_string(attachment).expect("read"), "file: file01-generic\n");

        assert_eq!(
            repo.git().last_commit_subject().expect("subject"),
            "New tally test run - basic-tree-2024-05-17.0"
        );
        assert!(!repo.git().has_staged_changes().expect("staged"));
    }

    #[cfg(unix)]
    #[test]
    fn second_run_gets_the_next_postfix_and_the_latest_link() {
        let repo = TestRepo::new().expect("repo");
        repo.write("basic-tree.yaml", &fixture("basic-tree.yaml"));
        new_run(repo.path(), Path::new("basic-tree.yaml"), None, today()).expect("first");
        let second = new_run(repo.path(), Path::new("basic-tree.yaml"), None, today()).expect("second");
        assert!(second.directory.ends_with("basic-tree-2024-05-17.1"));

        let link = fs::read_link(repo.path().join(LATEST_LINK)).expect("link");
        assert_eq!(link, Path::new("basic-tree-2024-05-17.1"));
    }

    #[test]
    fn explicit_directory_must_not_exist() {
        let repo = TestRepo::new().expect("repo");
        repo.write("basic-tree.yaml", &fixture("basic-tree.yaml"));
        repo.write("taken/keep", "");
        let err = new_run(repo.path(), Path::new("basic-tree"), Some(Path::new("taken")), today()).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err:#}");
    }

    #[test]
    fn invalid_template_reports_the_validation_error() {
        let repo = TestRepo::new().expect("repo");
        repo.write("broken.yaml", "a:\n  type: gizmo\n");
        let err = new_run(repo.path(), Path::new("broken"), None, today()).unwrap_err();
        assert!(format!("{err:#}").contains("gizmo"), "{err:#}");
        assert!(!repo.path().join("broken-2024-05-17.0").exists());
    }
}
