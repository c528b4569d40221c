//! Lifecycle tests: compile a template, write its run directory and drive a
//! session over the result with real shell commands.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tally::core::compile::{CompileOptions, compile};
use tally::core::markdown::{NodeKind, parse_str};
use tally::io::process::ShellRunner;
use tally::io::recorder::FileRecorder;
use tally::io::template::load_template;
use tally::session::{Session, Unattended};
use tally::test_support::fixture_path;

fn prepare(dir: &Path) -> std::path::PathBuf {
    let doc = load_template(&fixture_path("commands.yaml")).expect("load");
    let checklist = compile(&doc, &CompileOptions::default()).expect("compile");
    for artifact in &checklist.artifacts {
        let path = dir.join(&artifact.path);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, &artifact.contents).expect("write artifact");
    }
    let document = dir.join("commands.md");
    fs::write(&document, &checklist.document).expect("write document");
    document
}

fn goto(session: &mut Session<FileRecorder>, needle: &str) {
    let line = session
        .lines()
        .iter()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("no line containing {needle}"));
    session.move_to(line);
}

fn runner() -> ShellRunner {
    ShellRunner::new(Duration::from_millis(20), Duration::from_millis(100))
}

#[cfg(unix)]
#[test]
fn commands_run_and_land_in_the_document() {
    let temp = tempfile::tempdir().expect("tempdir");
    let document = prepare(temp.path());
    let text = fs::read_to_string(&document).expect("read");
    let mut session = Session::new(&text, temp.path(), FileRecorder::new(&document, None), 20).expect("parse");

    goto(&mut session, "printf");
    let code = session.execute_command(&runner(), &mut Unattended).expect("multi");
    assert_eq!(code, Some(0));

    goto(&mut session, "echo attached");
    session.execute_command(&runner(), &mut Unattended).expect("attach");

    goto(&mut session, "`true`");
    session.execute_command(&runner(), &mut Unattended).expect("exitcode");

    let on_disk = fs::read_to_string(&document).expect("read");
    assert_eq!(on_disk, session.text());
    assert!(on_disk.contains("```\nline one\nline two\n```"), "{on_disk}");
    assert!(!on_disk.contains("COMMAND OUTPUT"));
    assert_eq!(on_disk.matches("- result code: 0").count(), 3);

    let attached = temp.path().join("generic/smoke/echo\u{00a0}attached");
    assert_eq!(fs::read_to_string(attached).expect("read"), "attached\n");

    let tree = parse_str(&on_disk).expect("reparse");
    let checked = tree
        .checkboxes()
        .filter(|(_, node)| matches!(node.kind, NodeKind::Checkbox { checked: true, .. }))
        .count();
    assert_eq!(checked, 3);
}

#[cfg(unix)]
#[test]
fn rerunning_a_command_keeps_a_single_output_block() {
    let temp = tempfile::tempdir().expect("tempdir");
    let document = prepare(temp.path());
    let text = fs::read_to_string(&document).expect("read");
    let mut session = Session::new(&text, temp.path(), FileRecorder::new(&document, None), 20).expect("parse");

    for _ in 0..2 {
        goto(&mut session, "printf");
        session.execute_command(&runner(), &mut Unattended).expect("multi");
    }
    let on_disk = fs::read_to_string(&document).expect("read");
    assert_eq!(on_disk.lines().filter(|l| *l == "line one").count(), 1);
    assert_eq!(on_disk.matches("result code").count(), 1);
}

#[test]
fn uploads_and_status_survive_a_reload() {
    let temp = tempfile::tempdir().expect("tempdir");
    let document = prepare(temp.path());
    let source = temp.path().join("measured.txt");
    fs::write(&source, "42\n").expect("write");
    let text = fs::read_to_string(&document).expect("read");
    let mut session = Session::new(&text, temp.path(), FileRecorder::new(&document, None), 20).expect("parse");

    goto(&mut session, "notes.txt");
    assert!(session.upload(Some(&source)).expect("upload"));
    assert_eq!(
        fs::read_to_string(temp.path().join("generic/smoke/notes.txt")).expect("read"),
        "42\n"
    );

    goto(&mut session, "check the lights");
    session.prefix_status(tally::core::checkbox::Status::Skip).expect("status");

    let on_disk = fs::read_to_string(&document).expect("read");
    session.reload(&on_disk).expect("reload");
    assert!(session.lines().iter().any(|l| l == " - [x] **SKIP** check the lights"));
    assert!(session.lines().iter().any(|l| l.starts_with(" - [x] 📎 [`notes.txt`]")));
}
