//! The per-run `tally-check` script gating `view`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::io::scaffold::Scaffold;

pub const PRECHECK_FILE: &str = "tally-check";

/// Outcome of running a precheck script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckOutcome {
    /// No script in the directory.
    Missing,
    Passed,
    Failed { code: Option<i32>, output: String },
}

/// Write an executable `tally-check` into `dir`.
pub fn write_precheck(dir: &Path, scaffold: &Scaffold, run: &str) -> Result<PathBuf> {
    let path = dir.join(PRECHECK_FILE);
    let script = scaffold.precheck_script(run)?;
    fs::write(&path, script).with_context(|| format!("write {}", path.display()))?;
    make_executable(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o100);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Run `dir/tally-check` with `dir` as working directory.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn run_precheck(dir: &Path) -> Result<PrecheckOutcome> {
    let path = dir.join(PRECHECK_FILE);
    if !path.exists() {
        debug!("no precheck script");
        return Ok(PrecheckOutcome::Missing);
    }
    let script = fs::canonicalize(&path).with_context(|| format!("resolve {}", path.display()))?;
    let output = run_script(&script, dir).with_context(|| format!("run {}", path.display()))?;
    if output.status.success() {
        debug!("precheck passed");
        return Ok(PrecheckOutcome::Passed);
    }

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    warn!(code = ?output.status.code(), "precheck failed");
    Ok(PrecheckOutcome::Failed {
        code: output.status.code(),
        output: text,
    })
}

/// ETXTBSY: another thread forked while the freshly written script was
/// still open for writing.
const TEXT_FILE_BUSY: i32 = 26;

fn run_script(script: &Path, dir: &Path) -> std::io::Result<Output> {
    let mut attempts = 0;
    loop {
        match Command::new(script).current_dir(dir).stdin(Stdio::null()).output() {
            Err(err) if err.raw_os_error() == Some(TEXT_FILE_BUSY) && attempts < 5 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(50));
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_script_is_not_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(run_precheck(temp.path()).expect("run"), PrecheckOutcome::Missing);
    }

    #[cfg(unix)]
    #[test]
    fn generated_script_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_precheck(temp.path(), &Scaffold::new(), "run").expect("write");
        assert_eq!(run_precheck(temp.path()).expect("run"), PrecheckOutcome::Passed);
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_reports_code_and_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_precheck(temp.path(), &Scaffold::new(), "run").expect("write");
        fs::write(&path, "#!/bin/sh\necho missing cable\nexit 4\n").expect("write");
        match run_precheck(temp.path()).expect("run") {
            PrecheckOutcome::Failed { code, output } => {
                assert_eq!(code, Some(4));
                assert_eq!(output, "missing cable\n");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
