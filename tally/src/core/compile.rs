//! Template compilation: validation, actor/test matching, path binding and
//! artifact manifest.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument};

use crate::core::error::ValidationError;
use crate::core::extends::{is_truthy, key_label};
use crate::core::model::{
    Actor, Artifact, Checklist, Command, FileAttachment, OutputMode, Test, TestInstance,
    GENERIC_ACTOR_ID,
};
use crate::core::render::render_checklist;
use crate::core::resolve::ConfigDocument;

pub const SUPPORTED_VERSION: i64 = 1;
pub const DEFAULT_TITLE: &str = "Checklist";

/// Top-level section holding free-form preamble paragraphs.
const FILE_SECTION: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Level-1 heading of the rendered document.
    pub title: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

/// Compile a resolved template into a checklist.
///
/// Fails on the first structural problem found. No filesystem access happens
/// here: artifact paths in the result are relative to the run directory.
#[instrument(skip_all, fields(sections = doc.len()))]
pub fn compile(doc: &ConfigDocument, options: &CompileOptions) -> Result<Checklist, ValidationError> {
    if let Some(version) = doc.version()
        && version != SUPPORTED_VERSION
    {
        return Err(ValidationError::UnsupportedVersion(version));
    }

    let mut actors = vec![Actor::generic()];
    let mut tests = Vec::new();
    let mut preamble = Vec::new();
    let mut actor_names = HashSet::new();

    for (key, value) in doc.sections() {
        let section = key_label(key);
        let Value::Mapping(data) = value else {
            return Err(ValidationError::NotAMapping(section));
        };

        if section == FILE_SECTION {
            for (name, text) in data {
                let text = scalar_text(text).ok_or_else(|| ValidationError::NotAString {
                    section: section.clone(),
                    field: key_label(name),
                })?;
                preamble.push(text);
            }
            continue;
        }
        if section == GENERIC_ACTOR_ID {
            return Err(ValidationError::ReservedSection(section));
        }

        let kind = data
            .get("type")
            .filter(|v| is_truthy(v))
            .ok_or_else(|| ValidationError::MissingType(section.clone()))?;
        match kind.as_str() {
            Some("actor") => {
                let actor = parse_actor(&section, data)?;
                if !actor_names.insert(actor.name.clone()) {
                    return Err(ValidationError::DuplicateActorName {
                        section,
                        name: actor.name,
                    });
                }
                debug!(id = %actor.id, name = %actor.name, tags = ?actor.tags, "actor");
                actors.push(actor);
            }
            Some("test") => {
                let test = parse_test(&section, data)?;
                debug!(id = %test.id, filters = ?test.filters, "test");
                tests.push(test);
            }
            Some("log") => debug!(section, "log section, not instantiated"),
            _ => {
                return Err(ValidationError::InvalidType {
                    section,
                    found: scalar_text(kind).unwrap_or_else(|| format!("{kind:?}")),
                });
            }
        }
    }

    if tests.is_empty() {
        return Err(ValidationError::MissingTests);
    }

    let instances = link_tests_with_actors(&actors, &tests);
    let artifacts = artifacts_for(&instances);
    let document = render_checklist(&options.title, &preamble, &actors, &instances);

    Ok(Checklist {
        actors,
        instances,
        document,
        artifacts,
    })
}

/// Match every test against every actor, in actor-then-test order, binding a
/// fresh copy of the test to each matching actor.
pub fn link_tests_with_actors(actors: &[Actor], tests: &[Test]) -> Vec<TestInstance> {
    let mut instances = Vec::new();
    for actor in actors {
        for test in tests.iter().filter(|t| t.matches(actor)) {
            debug!(test = %test.id, actor = %actor.id, "match");
            let mut test = test.clone();
            bind_paths(&mut test, &actor.id);
            instances.push(TestInstance {
                actor_id: actor.id.clone(),
                test,
            });
        }
    }
    instances
}

fn bind_paths(test: &mut Test, actor_id: &str) {
    let base = PathBuf::from(actor_id).join(&test.id);
    for file in &mut test.files {
        file.path = Some(base.join(file_path_name(&file.filename)));
    }
    for command in &mut test.commands {
        if command.output == OutputMode::Attach {
            command.path = Some(base.join(command_path_name(&command.run)));
        }
    }
}

/// `/` becomes U+2215 DIVISION SLASH so a name never creates a subdirectory.
pub fn file_path_name(name: &str) -> String {
    name.replace('/', "\u{2215}")
}

/// Like [`file_path_name`], with spaces as U+00A0 and hyphens as U+2212.
pub fn command_path_name(run: &str) -> String {
    file_path_name(run)
        .replace(' ', "\u{00a0}")
        .replace('-', "\u{2212}")
}

fn artifacts_for(instances: &[TestInstance]) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    for instance in instances {
        for file in &instance.test.files {
            if let Some(path) = &file.path {
                artifacts.push(Artifact {
                    path: path.clone(),
                    contents: format!("file: {}\n", file.filename),
                });
            }
        }
        for command in &instance.test.commands {
            if let Some(path) = &command.path {
                artifacts.push(Artifact {
                    path: path.clone(),
                    contents: format!("run: {}\n", command.run),
                });
            }
        }
    }
    artifacts
}

fn parse_actor(section: &str, data: &Mapping) -> Result<Actor, ValidationError> {
    let name = optional_text(section, data, "name")?.unwrap_or_else(|| Actor::default_name(section));
    let description = optional_text(section, data, "description")?;

    let mut tags = BTreeMap::new();
    if let Some(value) = data.get("tags").filter(|v| !v.is_null()) {
        let Value::Mapping(mapping) = value else {
            return Err(ValidationError::NotAMapping(format!("{section}.tags")));
        };
        for (tag, value) in mapping {
            let tag = key_label(tag);
            let value = scalar_text(value).ok_or_else(|| ValidationError::NotAString {
                section: section.to_string(),
                field: format!("tags.{tag}"),
            })?;
            tags.insert(tag, value);
        }
    }

    Ok(Actor {
        id: section.to_string(),
        name,
        description,
        tags,
    })
}

fn parse_test(section: &str, data: &Mapping) -> Result<Test, ValidationError> {
    if data.get("tests").is_none() && data.get("logs").is_none() {
        return Err(ValidationError::MissingTestsOrLogs(section.to_string()));
    }

    let mut filters = Vec::new();
    if let Some(value) = data.get("filter").filter(|v| !v.is_null()) {
        let Value::Mapping(mapping) = value else {
            return Err(ValidationError::NotAMapping(format!("{section}.filter")));
        };
        for (tag, values) in mapping {
            let tag = key_label(tag);
            if !values.is_sequence() {
                return Err(ValidationError::FilterNotAList {
                    section: section.to_string(),
                    filter: tag,
                });
            }
            let values = text_list(section, values, &format!("filter.{tag}"))?;
            filters.push((tag, values));
        }
    }

    let instructions = match data.get("tests").filter(|v| !v.is_null()) {
        Some(value) => text_list(section, value, "tests")?,
        None => Vec::new(),
    };

    let mut files = Vec::new();
    let mut commands = Vec::new();
    if let Some(logs) = data.get("logs") {
        let Value::Mapping(logs) = logs else {
            return Err(ValidationError::NotAMapping(format!("{section}.logs")));
        };
        if logs.get("files").is_none() && logs.get("commands").is_none() {
            return Err(ValidationError::EmptyLogs(section.to_string()));
        }
        if let Some(value) = logs.get("files") {
            files = text_list(section, value, "logs.files")?
                .into_iter()
                .map(|filename| FileAttachment {
                    filename,
                    path: None,
                })
                .collect();
        }
        if let Some(value) = logs.get("commands") {
            let Value::Sequence(entries) = value else {
                return Err(ValidationError::NotAList {
                    section: section.to_string(),
                    field: "logs.commands".to_string(),
                });
            };
            for entry in entries {
                commands.push(parse_command(section, entry)?);
            }
        }
    }

    Ok(Test {
        id: section.to_string(),
        name: optional_text(section, data, "name")?,
        description: optional_text(section, data, "description")?,
        filters,
        instructions,
        files,
        commands,
    })
}

fn parse_command(section: &str, entry: &Value) -> Result<Command, ValidationError> {
    let Value::Mapping(data) = entry else {
        return Err(ValidationError::CommandWithoutRun(section.to_string()));
    };
    let run = optional_text(section, data, "run")?
        .ok_or_else(|| ValidationError::CommandWithoutRun(section.to_string()))?;
    let output = match optional_text(section, data, "output")? {
        Some(mode) => mode
            .parse::<OutputMode>()
            .map_err(|found| ValidationError::InvalidOutputMode {
                section: section.to_string(),
                found,
            })?,
        None => OutputMode::default(),
    };

    Ok(Command {
        run,
        description: optional_text(section, data, "description")?,
        output,
        path: None,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_text(section: &str, data: &Mapping, field: &str) -> Result<Option<String>, ValidationError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_text(value).map(Some).ok_or_else(|| ValidationError::NotAString {
            section: section.to_string(),
            field: field.to_string(),
        }),
    }
}

fn text_list(section: &str, value: &Value, field: &str) -> Result<Vec<String>, ValidationError> {
    let Value::Sequence(items) = value else {
        return Err(ValidationError::NotAList {
            section: section.to_string(),
            field: field.to_string(),
        });
    };
    items
        .iter()
        .map(|item| {
            scalar_text(item).ok_or_else(|| ValidationError::NotAString {
                section: section.to_string(),
                field: field.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolve::resolve_str;

    fn compile_str(source: &str) -> Result<Checklist, ValidationError> {
        let doc = resolve_str(source).expect("resolve");
        compile(&doc, &CompileOptions::default())
    }

    fn pairs(checklist: &Checklist) -> Vec<(String, String)> {
        checklist
            .instances
            .iter()
            .map(|i| (i.actor_id.clone(), i.test.id.clone()))
            .collect()
    }

    const TAGGED: &str = "\
version: 1
actor1:
  type: actor
  tags:
    tag1: value1
actor2:
  type: actor
  name: Second
  tags:
    tag1: value2
test1:
  type: test
  filter:
    tag1: [value1]
  tests:
    - check one
test2:
  type: test
  tests:
    - check two
";

    #[test]
    fn generic_actor_comes_first() {
        let checklist = compile_str(TAGGED).expect("compile");
        let ids: Vec<&str> = checklist.actors.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["generic", "actor1", "actor2"]);
        assert_eq!(checklist.actors[0].name, "Generic");
        assert_eq!(checklist.actors[2].name, "Second");
    }

    #[test]
    fn tests_are_matched_in_actor_then_test_order() {
        let checklist = compile_str(TAGGED).expect("compile");
        assert_eq!(
            pairs(&checklist),
            vec![
                ("generic".to_string(), "test2".to_string()),
                ("actor1".to_string(), "test1".to_string()),
            ]
        );
    }

    #[test]
    fn untagged_tests_are_never_duplicated() {
        let checklist = compile_str(
            "a1:\n  type: actor\na2:\n  type: actor\nt1:\n  type: test\n  tests: [x]\nt2:\n  type: test\n  tests: [y]\n",
        )
        .expect("compile");
        assert_eq!(
            pairs(&checklist),
            vec![
                ("generic".to_string(), "t1".to_string()),
                ("generic".to_string(), "t2".to_string()),
            ]
        );
    }

    #[test]
    fn each_match_gets_its_own_paths() {
        let checklist = compile_str(
            "\
a1:
  type: actor
  tags: {kind: x}
a2:
  type: actor
  tags: {kind: y}
t:
  type: test
  filter: {kind: ['!z']}
  logs:
    files: [dmesg/log]
    commands:
      - run: uname -a
        output: attach
      - run: true
        output: exitcode
",
        )
        .expect("compile");
        assert_eq!(checklist.instances.len(), 2);
        let first = &checklist.instances[0].test;
        let second = &checklist.instances[1].test;
        assert_eq!(first.files[0].path, Some(PathBuf::from("a1/t/dmesg\u{2215}log")));
        assert_eq!(second.files[0].path, Some(PathBuf::from("a2/t/dmesg\u{2215}log")));
        assert_eq!(
            first.commands[0].path,
            Some(PathBuf::from("a1/t/uname\u{00a0}\u{2212}a"))
        );
        assert_eq!(first.commands[1].path, None);
        assert_eq!(first.commands[1].run, "true");

        let contents: Vec<&str> = checklist.artifacts.iter().map(|a| a.contents.as_str()).collect();
        assert_eq!(
            contents,
            vec!["file: dmesg/log\n", "run: uname -a\n", "file: dmesg/log\n", "run: uname -a\n"]
        );
    }

    #[test]
    fn actor_name_defaults_from_id() {
        let checklist =
            compile_str("my_box:\n  type: actor\nt:\n  type: test\n  tests: [x]\n").expect("compile");
        assert_eq!(checklist.actors[1].name, "my-box");
    }

    #[test]
    fn validation_errors() {
        let cases: &[(&str, ValidationError)] = &[
            ("version: 2\nt:\n  type: test\n  tests: [x]\n", ValidationError::UnsupportedVersion(2)),
            ("t: foo\n", ValidationError::NotAMapping("t".into())),
            ("generic:\n  type: actor\n", ValidationError::ReservedSection("generic".into())),
            ("t:\n  tests: [x]\n", ValidationError::MissingType("t".into())),
            (
                "t:\n  type: bogus\n",
                ValidationError::InvalidType {
                    section: "t".into(),
                    found: "bogus".into(),
                },
            ),
            (
                "a:\n  type: actor\n  name: X\nb:\n  type: actor\n  name: X\n",
                ValidationError::DuplicateActorName {
                    section: "b".into(),
                    name: "X".into(),
                },
            ),
            ("t:\n  type: test\n", ValidationError::MissingTestsOrLogs("t".into())),
            (
                "t:\n  type: test\n  filter: {a: b}\n  tests: [x]\n",
                ValidationError::FilterNotAList {
                    section: "t".into(),
                    filter: "a".into(),
                },
            ),
            ("t:\n  type: test\n  logs: {}\n", ValidationError::EmptyLogs("t".into())),
            (
                "t:\n  type: test\n  logs:\n    files: foo\n",
                ValidationError::NotAList {
                    section: "t".into(),
                    field: "logs.files".into(),
                },
            ),
            (
                "t:\n  type: test\n  logs:\n    commands:\n      - output: single\n",
                ValidationError::CommandWithoutRun("t".into()),
            ),
            (
                "t:\n  type: test\n  logs:\n    commands:\n      - run: ls\n        output: loud\n",
                ValidationError::InvalidOutputMode {
                    section: "t".into(),
                    found: "loud".into(),
                },
            ),
            ("a:\n  type: actor\n", ValidationError::MissingTests),
        ];

        for (source, expected) in cases {
            assert_eq!(compile_str(source).as_ref().err(), Some(expected), "{source}");
        }
    }

    #[test]
    fn log_sections_serve_as_bases_only() {
        let checklist = compile_str(
            "\
base:
  type: log
  logs:
    files: [a.log]
t:
  extends: base
  type: test
  tests: [x]
",
        )
        .expect("compile");
        assert_eq!(checklist.instances.len(), 1);
        assert_eq!(checklist.instances[0].test.files[0].filename, "a.log");
    }

    #[test]
    fn file_section_becomes_preamble() {
        let checklist = compile_str("file:\n  intro: Read me first\nt:\n  type: test\n  tests: [x]\n")
            .expect("compile");
        assert!(checklist.document.contains("\nRead me first\n"), "{}", checklist.document);
    }
}
