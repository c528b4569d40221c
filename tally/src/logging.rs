//! Diagnostic tracing for tally.
//!
//! Output goes to stderr in compact form. `RUST_LOG` overrides the level
//! chosen on the command line. While the interactive view owns the screen,
//! output is held back with [`suppress`] so it cannot corrupt the display.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Level used when `RUST_LOG` is unset.
pub fn default_level(verbosity: u8, quiet: bool) -> &'static str {
    match (quiet, verbosity) {
        (true, _) | (false, 0) => "error",
        (false, 1) => "info",
        (false, _) => "debug",
    }
}

/// Install the global subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=tally=trace tally view
/// ```
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbosity, quiet)));
    let writer = std::io::stderr.with_filter(|_| !SUPPRESSED.load(Ordering::Relaxed));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).compact())
        .init();
}

/// Holds log output back until dropped.
#[must_use = "logging resumes as soon as the guard is dropped"]
pub struct Suppressed {
    previous: bool,
}

pub fn suppress() -> Suppressed {
    Suppressed {
        previous: SUPPRESSED.swap(true, Ordering::Relaxed),
    }
}

impl Drop for Suppressed {
    fn drop(&mut self) {
        SUPPRESSED.store(self.previous, Ordering::Relaxed);
    }
}
