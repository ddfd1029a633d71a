//! CLI tests for the `buildloop` binary.
//!
//! Spawns the binary and checks exit codes and the persisted state it leaves.

use std::fs;
use std::process::Command;

use buildloop::core::types::ProjectKind;
use buildloop::exit_codes;
use buildloop::io::session::{ProjectPaths, SessionState, load_session, write_session};

fn buildloop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_buildloop"))
}

#[test]
fn status_prints_a_saved_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = ProjectPaths::new(&temp.path().join("snake"));
    let session = SessionState::new("snake", "a snake game", ProjectKind::Web, "2026-01-01T00:00:00Z");
    write_session(&paths.session_path, &session).expect("write session");

    let output = buildloop()
        .args(["status", "snake", "--output"])
        .arg(temp.path())
        .output()
        .expect("buildloop status");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("buildloop-snake"));
    assert!(stdout.contains("a snake game"));
}

#[test]
fn status_of_missing_project_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = buildloop()
        .args(["status", "nothing-here", "--output"])
        .arg(temp.path())
        .status()
        .expect("buildloop status");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn resume_of_missing_project_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = buildloop()
        .args(["resume", "nothing-here", "--output"])
        .arg(temp.path())
        .status()
        .expect("buildloop resume");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn missing_agent_stops_before_any_cycle() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("engine.toml");
    fs::write(
        &config,
        "[agent]\ncommand = [\"definitely-not-an-agent-xyz\"]\n\n[vision]\nenabled = false\n",
    )
    .expect("write config");

    let output = buildloop()
        .args(["run", "a browser snake game", "--name", "snake", "--output"])
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .output()
        .expect("buildloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("precondition failed"));
    assert!(stderr.contains("definitely-not-an-agent-xyz"));

    // The project is laid out and the session saved, so a later resume works.
    let paths = ProjectPaths::new(&temp.path().join("snake"));
    let session = load_session(&paths.session_path).expect("session");
    assert_eq!(session.cycle, 0);
    assert!(!session.bootstrapped);
}

#[test]
fn empty_description_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = buildloop()
        .args(["run", "   ", "--output"])
        .arg(temp.path())
        .status()
        .expect("buildloop run");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
    assert!(fs::read_dir(temp.path()).expect("read dir").next().is_none());
}
