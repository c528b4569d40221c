//! Deterministic, pure logic for templates and checklist documents.
//!
//! Core modules perform no I/O. Includes are read through the
//! [`resolve::IncludeLoader`] seam so the resolver stays testable in memory.

pub mod checkbox;
pub mod compile;
pub mod error;
pub mod extends;
pub mod markdown;
pub mod model;
pub mod render;
pub mod resolve;
pub mod viewport;
