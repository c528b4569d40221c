//! Error taxonomy for template resolution, compilation, parsing and
//! interactive sessions.
//!
//! Resolution, compilation and parse errors are fatal to the whole operation:
//! no partial document is ever returned alongside them. Interaction errors are
//! local to a single session operation and leave the buffer in its last
//! consistent state.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while expanding `include`/`version`/`extends` in a template.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot include {path}: {source}")]
    Include {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot include \"{0}\" from a text stream without a base directory")]
    IncludeFromStream(String),

    #[error("invalid version line \"{0}\", expected an integer")]
    InvalidVersion(String),

    #[error("version mismatch in {origin}: expected {expected}, found {found}")]
    VersionMismatch {
        origin: String,
        expected: i64,
        found: i64,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid YAML data format, expected a mapping")]
    InvalidFormat,

    #[error("invalid section name \"{0}\", this is a reserved keyword")]
    ReservedKeyword(String),

    #[error("invalid section for \"extends: {referenced}\" in {section}")]
    InvalidReference { section: String, referenced: String },

    #[error("mismatched types for {key} in {section} vs {referenced}")]
    TypeMismatch {
        key: String,
        section: String,
        referenced: String,
    },
}

/// First structural problem found in the actor/test declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("template version must be 1, found {0}")]
    UnsupportedVersion(i64),

    #[error("section {0} must be a mapping")]
    NotAMapping(String),

    #[error("section name \"{0}\" is reserved")]
    ReservedSection(String),

    #[error("section {0} does not have a type")]
    MissingType(String),

    #[error("section {section} has invalid type \"{found}\"")]
    InvalidType { section: String, found: String },

    #[error("duplicate actor name \"{name}\" in section {section}")]
    DuplicateActorName { section: String, name: String },

    #[error("section {0} doesn't have tests or logs")]
    MissingTestsOrLogs(String),

    #[error("section {section} filter {filter} must be a list")]
    FilterNotAList { section: String, filter: String },

    #[error("section {0} doesn't have log files or commands")]
    EmptyLogs(String),

    #[error("section {section}: {field} must be a list")]
    NotAList { section: String, field: String },

    #[error("command in {0} doesn't declare what to run")]
    CommandWithoutRun(String),

    #[error("section {section}: invalid output mode \"{found}\"")]
    InvalidOutputMode { section: String, found: String },

    #[error("section {section}: {field} must be a string")]
    NotAString { section: String, field: String },

    #[error("template has no test sections")]
    MissingTests,
}

/// Failure to build a document tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty markdown document")]
    EmptyDocument,
}

/// Per-operation failure inside an interactive session.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("failed to match command line: {0}")]
    UnrecognizedCommand(String),

    #[error("failed to match attachment line: {0}")]
    UnrecognizedAttachment(String),

    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution of `{0}` aborted")]
    Interrupted(String),

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
