//! Template resolution: `include:` expansion, `version:` consistency and the
//! final key/value parse.
//!
//! Resolution is line-oriented. A line of the exact form `include: <path>` is
//! replaced by the contents of the referenced file (recursively, up to
//! [`MAX_INCLUDE_DEPTH`] levels). Every `version: <int>` line is removed from
//! the flattened text and checked against the first version seen. The
//! remaining text is parsed as YAML and must be a mapping; `extends` is then
//! applied by [`crate::core::extends`].

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument, trace};

use crate::core::error::ConfigError;
use crate::core::extends::{apply_extends, is_truthy};

/// Includes nested deeper than this are silently dropped.
pub const MAX_INCLUDE_DEPTH: usize = 10;

const VERSION_PREFIX: &str = "version:";
const INCLUDE_PREFIX: &str = "include: ";

/// Source of included template files.
///
/// Names are resolved relative to the directory of the template the
/// resolution started from, regardless of how deeply the include is nested.
pub trait IncludeLoader {
    fn load(&self, name: &str) -> Result<String, ConfigError>;
}

/// Loader for templates that come from a plain text stream.
///
/// Any `include:` line is an error since there is no directory to resolve it
/// against.
pub struct NoIncludes;

impl IncludeLoader for NoIncludes {
    fn load(&self, name: &str) -> Result<String, ConfigError> {
        Err(ConfigError::IncludeFromStream(name.to_string()))
    }
}

/// A fully resolved template.
///
/// The `version` line is kept out of the section mapping; a template without
/// any `version:` line has `version() == None`, which is distinct from
/// `Some(0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    version: Option<i64>,
    sections: Mapping,
}

impl ConfigDocument {
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn sections(&self) -> &Mapping {
        &self.sections
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.sections.get(key)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Serialize the resolved template back to YAML with `version` re-added
    /// as the first key.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let mut out = Mapping::new();
        if let Some(version) = self.version {
            out.insert(Value::from("version"), Value::from(version));
        }
        for (key, value) in &self.sections {
            out.insert(key.clone(), value.clone());
        }
        Ok(serde_yaml::to_string(&Value::Mapping(out))?)
    }
}

/// Resolve a template from text, using `loader` for `include:` lines.
#[instrument(skip_all, fields(bytes = source.len()))]
pub fn resolve(source: &str, loader: &dyn IncludeLoader) -> Result<ConfigDocument, ConfigError> {
    let mut expansion = Expansion::default();
    expand(source, "<template>", loader, 0, &mut expansion)?;
    debug!(version = ?expansion.version, bytes = expansion.text.len(), "includes expanded");

    let sections = match parse_yaml(&expansion.text)? {
        Value::Mapping(mapping) => mapping,
        _ => return Err(ConfigError::InvalidFormat),
    };
    if sections.get("extends").is_some_and(is_truthy) {
        return Err(ConfigError::ReservedKeyword("extends".to_string()));
    }
    let sections = apply_extends(sections)?;

    Ok(ConfigDocument {
        version: expansion.version,
        sections,
    })
}

/// Resolve a template that has no base directory.
pub fn resolve_str(source: &str) -> Result<ConfigDocument, ConfigError> {
    resolve(source, &NoIncludes)
}

#[derive(Default)]
struct Expansion {
    text: String,
    version: Option<i64>,
}

fn expand(
    source: &str,
    origin: &str,
    loader: &dyn IncludeLoader,
    level: usize,
    out: &mut Expansion,
) -> Result<(), ConfigError> {
    if level > MAX_INCLUDE_DEPTH {
        debug!(origin, "include depth exceeded, stopping expansion");
        return Ok(());
    }

    for line in source.split_inclusive('\n') {
        if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
            let found: i64 = rest
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVersion(line.trim_end().to_string()))?;
            match out.version {
                Some(expected) if expected != found => {
                    return Err(ConfigError::VersionMismatch {
                        origin: origin.to_string(),
                        expected,
                        found,
                    });
                }
                Some(_) => {}
                None => out.version = Some(found),
            }
            continue;
        }

        let Some(rest) = line.strip_prefix(INCLUDE_PREFIX) else {
            out.text.push_str(line);
            continue;
        };

        let name = rest.trim();
        trace!(name, level, "expanding include");
        let included = loader.load(name)?;
        expand(&included, name, loader, level + 1, out)?;
        if !out.text.is_empty() && !out.text.ends_with('\n') {
            out.text.push('\n');
        }
    }

    Ok(())
}

/// Parse YAML where a repeated mapping key replaces the earlier value.
///
/// Includes rely on this: a section defined again further down the flattened
/// text overrides the earlier definition instead of failing the load.
fn parse_yaml(text: &str) -> Result<Value, ConfigError> {
    let value = LastWins::deserialize(serde_yaml::Deserializer::from_str(text))?;
    Ok(value.0)
}

struct LastWins(Value);

impl<'de> Deserialize<'de> for LastWins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LastWinsVisitor).map(LastWins)
    }
}

struct LastWinsVisitor;

impl<'de> Visitor<'de> for LastWinsVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any YAML value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        LastWins::deserialize(deserializer).map(|v| v.0)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<LastWins>()? {
            items.push(item.0);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut mapping = Mapping::new();
        while let Some((key, value)) = map.next_entry::<LastWins, LastWins>()? {
            mapping.insert(key.0, value.0);
        }
        Ok(Value::Mapping(mapping))
    }
}
