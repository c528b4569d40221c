//! Checklist entities built from a resolved template.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Id of the synthetic actor that receives every filter-less test.
pub const GENERIC_ACTOR_ID: &str = "generic";
pub const GENERIC_ACTOR_NAME: &str = "Generic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Actor {
    pub fn generic() -> Self {
        Self {
            id: GENERIC_ACTOR_ID.to_string(),
            name: GENERIC_ACTOR_NAME.to_string(),
            description: None,
            tags: BTreeMap::new(),
        }
    }

    /// Display name used when a section does not set `name`.
    pub fn default_name(id: &str) -> String {
        id.replace('_', "-")
    }
}

/// A test section. Acts as a template; each match with an actor produces a
/// [`TestInstance`] holding its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Tag name to allowed values; a `!` prefix marks an excluded value.
    pub filters: Vec<(String, Vec<String>)>,
    pub instructions: Vec<String>,
    pub files: Vec<FileAttachment>,
    pub commands: Vec<Command>,
}

impl Test {
    /// Whether this test should be instantiated for `actor`.
    ///
    /// Tests without filters go to untagged actors only. Tests with filters
    /// never go to untagged actors. Otherwise every filter must accept the
    /// actor's value for that tag.
    pub fn matches(&self, actor: &Actor) -> bool {
        if actor.tags.is_empty() || self.filters.is_empty() {
            return actor.tags.is_empty() && self.filters.is_empty();
        }

        self.filters.iter().all(|(key, values)| {
            let Some(tag) = actor.tags.get(key) else {
                return false;
            };
            let excluded: Vec<&str> = values.iter().filter_map(|v| v.strip_prefix('!')).collect();
            if excluded.contains(&tag.as_str()) {
                return false;
            }
            let mut required = values.iter().filter(|v| !v.starts_with('!')).peekable();
            if required.peek().is_none() && !excluded.is_empty() {
                return true;
            }
            required.any(|v| v == tag)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub filename: String,
    /// Path relative to the run directory, set once bound to an actor.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub run: String,
    pub description: Option<String>,
    pub output: OutputMode,
    /// Only attach-mode commands own a path.
    pub path: Option<PathBuf>,
}

/// How a command's result is represented in the checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    Exitcode,
    #[default]
    Single,
    Multi,
    Attach,
    Human,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exitcode => "exitcode",
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Attach => "attach",
            Self::Human => "human",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exitcode" => Ok(Self::Exitcode),
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            "attach" => Ok(Self::Attach),
            "human" => Ok(Self::Human),
            other => Err(other.to_string()),
        }
    }
}

/// A test bound to one actor, with paths resolved for that pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInstance {
    pub actor_id: String,
    pub test: Test,
}

/// A file to pre-create inside the run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Relative to the run directory.
    pub path: PathBuf,
    pub contents: String,
}

/// Everything produced by compiling a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checklist {
    pub actors: Vec<Actor>,
    pub instances: Vec<TestInstance>,
    pub document: String,
    pub artifacts: Vec<Artifact>,
}

impl Checklist {
    pub fn instances_for<'a>(&'a self, actor: &'a Actor) -> impl Iterator<Item = &'a TestInstance> {
        self.instances.iter().filter(move |i| i.actor_id == actor.id)
    }
}
