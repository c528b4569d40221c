//! Side-effecting helpers for tally commands: files, git, child processes
//! and the terminal.

pub mod config;
pub mod git;
pub mod layout;
pub mod precheck;
pub mod process;
pub mod recorder;
pub mod scaffold;
pub mod template;
pub mod terminal;
