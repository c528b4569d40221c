//! Run-directory layout: naming, markers, the latest-run link and locating
//! the active document.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use tracing::{debug, warn};

/// Empty file marking a directory as a tally run.
pub const MARKER_FILE: &str = ".tally";
/// Symlink pointing at the most recently generated run.
pub const LATEST_LINK: &str = "tally-latest";

/// First free `<stem>-<YYYY-MM-DD>.<n>` name under `parent`.
pub fn run_dirname(parent: &Path, stem: &str, date: NaiveDate) -> String {
    let day = date.format("%Y-%m-%d");
    let mut postfix = 0usize;
    loop {
        let name = format!("{stem}-{day}.{postfix}");
        if !parent.join(&name).exists() {
            return name;
        }
        postfix += 1;
    }
}

pub fn write_marker(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(MARKER_FILE);
    fs::write(&path, "").with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Point `tally-latest` in `parent` at `target`.
///
/// Returns `false` when a regular file or directory already occupies the
/// link's name; it is left alone.
pub fn update_latest_link(parent: &Path, target: &str) -> Result<bool> {
    let link = parent.join(LATEST_LINK);
    match fs::symlink_metadata(&link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(&link).with_context(|| format!("remove {}", link.display()))?;
        }
        Ok(_) => {
            warn!(path = %link.display(), "not a symlink, leaving it alone");
            return Ok(false);
        }
        Err(_) => {}
    }
    symlink_dir(Path::new(target), &link)?;
    debug!(target, "latest link updated");
    Ok(true)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("symlink {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn symlink_dir(_target: &Path, link: &Path) -> Result<()> {
    Err(anyhow!("cannot create {} on this platform", link.display()))
}

/// Directory `view` opens when none is given: `tally-latest` if it exists,
/// else the most recently created directory carrying the marker file.
pub fn default_run_dir(parent: &Path) -> Result<PathBuf> {
    let latest = parent.join(LATEST_LINK);
    if latest.is_dir() {
        return Ok(latest);
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let entries = fs::read_dir(parent).with_context(|| format!("read {}", parent.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", parent.display()))?;
        let path = entry.path();
        if !path.join(MARKER_FILE).is_file() {
            continue;
        }
        let meta = entry.metadata().with_context(|| format!("stat {}", path.display()))?;
        let created = meta.created().or_else(|_| meta.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(t, _)| created > *t) {
            newest = Some((created, path));
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| anyhow!("no tally run directory found in {}", parent.display()))
}

/// The single `*.md` document in `dir`. With several, the first by name
/// wins and a warning is logged.
pub fn find_document(dir: &Path) -> Result<PathBuf> {
    let mut docs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    docs.sort();
    let Some(first) = docs.first().cloned() else {
        return Err(anyhow!("cannot find a markdown file in {}", dir.display()));
    };
    if docs.len() > 1 {
        warn!(using = %first.display(), count = docs.len(), "multiple markdown files found");
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).expect("date")
    }

    #[test]
    fn dirname_skips_existing_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(run_dirname(temp.path(), "plan", date()), "plan-2024-03-09.0");
        fs::create_dir(temp.path().join("plan-2024-03-09.0")).expect("mkdir");
        fs::create_dir(temp.path().join("plan-2024-03-09.1")).expect("mkdir");
        assert_eq!(run_dirname(temp.path(), "plan", date()), "plan-2024-03-09.2");
    }

    #[cfg(unix)]
    #[test]
    fn latest_link_is_replaced() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("a")).expect("mkdir");
        fs::create_dir(temp.path().join("b")).expect("mkdir");
        assert!(update_latest_link(temp.path(), "a").expect("link"));
        assert!(update_latest_link(temp.path(), "b").expect("link"));
        let target = fs::read_link(temp.path().join(LATEST_LINK)).expect("read link");
        assert_eq!(target, PathBuf::from("b"));
        assert_eq!(default_run_dir(temp.path()).expect("default"), temp.path().join(LATEST_LINK));
    }

    #[test]
    fn latest_link_does_not_clobber_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(LATEST_LINK), "mine").expect("write");
        assert!(!update_latest_link(temp.path(), "a").expect("link"));
        assert_eq!(fs::read_to_string(temp.path().join(LATEST_LINK)).expect("read"), "mine");
    }

    #[test]
    fn default_run_dir_needs_a_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("unmarked")).expect("mkdir");
        assert!(default_run_dir(temp.path()).is_err());

        let run = temp.path().join("run");
        fs::create_dir(&run).expect("mkdir");
        write_marker(&run).expect("marker");
        assert_eq!(default_run_dir(temp.path()).expect("default"), run);
    }

    #[test]
    fn finds_the_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(find_document(temp.path()).is_err());
        fs::write(temp.path().join("b.md"), "x").expect("write");
        fs::write(temp.path().join("a.md"), "x").expect("write");
        fs::write(temp.path().join("c.txt"), "x").expect("write");
        assert_eq!(find_document(temp.path()).expect("find"), temp.path().join("a.md"));
    }
}
