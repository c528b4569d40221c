//! Tool settings stored in `tally.toml` in the working directory.
//!
//! These settings tune the interactive view; they are unrelated to checklist
//! templates.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "tally.toml";

/// Tally settings (TOML). Missing fields take their defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TallyConfig {
    /// Wait between asking a command to terminate and killing it.
    pub interrupt_grace_ms: u64,

    /// Spliced output lines are split into chunks of at most this many
    /// characters.
    pub max_line_width: usize,

    /// How often a running command checks for a user interrupt.
    pub poll_interval_ms: u64,

    /// Editor for the view's `e` key; falls back to `$EDITOR`.
    pub editor: Option<String>,

    /// Run the run directory's `tally-check` before opening the view.
    pub precheck: bool,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            interrupt_grace_ms: 200,
            max_line_width: 250,
            poll_interval_ms: 50,
            editor: None,
            precheck: true,
        }
    }
}

impl TallyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interrupt_grace_ms == 0 {
            return Err(anyhow!("interrupt_grace_ms must be > 0"));
        }
        if self.max_line_width == 0 {
            return Err(anyhow!("max_line_width must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.editor.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(anyhow!("editor must not be empty"));
        }
        Ok(())
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Configured editor, else `$EDITOR`.
    pub fn editor_command(&self) -> Option<String> {
        self.editor
            .clone()
            .or_else(|| std::env::var("EDITOR").ok().filter(|e| !e.trim().is_empty()))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TallyConfig::default()`.
pub fn load_config(path: &Path) -> Result<TallyConfig> {
    if !path.exists() {
        return Ok(TallyConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TallyConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join(CONFIG_FILE)).expect("load");
        assert_eq!(cfg, TallyConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "max_line_width = 80\neditor = \"vi\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_line_width, 80);
        assert_eq!(cfg.editor.as_deref(), Some("vi"));
        assert_eq!(cfg.interrupt_grace(), Duration::from_millis(200));
        assert!(cfg.precheck);
    }

    #[test]
    fn zero_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        for field in ["interrupt_grace_ms", "max_line_width", "poll_interval_ms"] {
            fs::write(&path, format!("{field} = 0\n")).expect("write");
            let err = load_config(&path).unwrap_err();
            assert!(format!("{err:#}").contains(field), "{err:#}");
        }
    }

    #[test]
    fn unknown_types_fail_to_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "precheck = \"sometimes\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
