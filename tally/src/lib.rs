//! Checklist-driven manual testing.
//!
//! Templates describe actors (devices under test) and tests; `tally new`
//! compiles them into a Markdown checklist inside a run directory, and
//! `tally view` walks a tester through it, running commands and collecting
//! attachments as it goes. The crate is split the usual way:
//!
//! - **[`core`]**: Pure logic (template resolution, compilation, rendering,
//!   document parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side effects (filesystem, git, child processes, terminal).
//!
//! Orchestration modules ([`session`], [`generate`], [`setup`], [`view`])
//! coordinate the two to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod session;
pub mod setup;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod view;
