//! Section inheritance via `extends: <section>`.

use serde_yaml::{Mapping, Value};
use tracing::trace;

use crate::core::error::ConfigError;

const EXTENDS: &str = "extends";

/// YAML truthiness: null, `false`, zero and empty values are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(s) => !s.is_empty(),
        Value::Mapping(m) => !m.is_empty(),
        Value::Tagged(_) => true,
    }
}

/// Printable form of a section or entry key.
pub fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => format!("{other:?}"),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "dict",
        Value::Tagged(_) => "tagged",
    }
}

/// Combine a base entry with the extending section's entry.
///
/// Lists are concatenated base first, mappings are shallow-merged with the
/// extending side winning, anything else is replaced. Returns `None` when the
/// two values have different types.
pub fn merge(base: &Value, value: &Value) -> Option<Value> {
    if kind(base) != kind(value) {
        return None;
    }
    let merged = match (base, value) {
        (Value::Sequence(a), Value::Sequence(b)) => {
            Value::Sequence(a.iter().chain(b.iter()).cloned().collect())
        }
        (Value::Mapping(a), Value::Mapping(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Value::Mapping(out)
        }
        _ => value.clone(),
    };
    Some(merged)
}

/// Replace every section carrying `extends: <name>` with the referenced
/// section merged with its own entries.
///
/// Sections are processed in document order and always read the current
/// state, so a section extending an already-extended section sees the merged
/// result. The `extends` key itself does not survive.
pub fn apply_extends(mut sections: Mapping) -> Result<Mapping, ConfigError> {
    let keys: Vec<Value> = sections.keys().cloned().collect();

    for key in keys {
        let Some(Value::Mapping(data)) = sections.get(&key) else {
            continue;
        };
        let Some(referenced) = data.get(EXTENDS).filter(|v| is_truthy(v)) else {
            continue;
        };

        let section = key_label(&key);
        let invalid = || ConfigError::InvalidReference {
            section: section.clone(),
            referenced: key_label(referenced),
        };

        if *referenced == key {
            return Err(invalid());
        }
        let Some(Value::Mapping(base)) = sections.get(referenced) else {
            return Err(invalid());
        };
        trace!(section, referenced = %key_label(referenced), "applying extends");

        let mut combined = base.clone();
        for (item, value) in data {
            if item.as_str() == Some(EXTENDS) {
                continue;
            }
            let entry = match combined.get(item) {
                None => value.clone(),
                Some(existing) => merge(existing, value).ok_or_else(|| ConfigError::TypeMismatch {
                    key: key_label(item),
                    section: section.clone(),
                    referenced: key_label(referenced),
                })?,
            };
            combined.insert(item.clone(), entry);
        }

        sections.insert(key, Value::Mapping(combined));
    }

    Ok(sections)
}
