//! Orchestration for starting or resuming a build session.
//!
//! Starting lays out the project directory (git repository, ignore rules,
//! `docs/` and `screenshots/`), creates or loads the session file, and checks
//! that the external services the loop depends on are there before any cycle
//! runs.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::core::types::ProjectKind;
use crate::io::config::EngineConfig;
use crate::io::git::Git;
use crate::io::process::find_program;
use crate::io::service::SupervisedService;
use crate::io::session::{ProjectPaths, SessionState, load_session, write_session};

const GITIGNORE_ENTRIES: [&str; 4] = [
    ".buildloop/cycles/",
    ".buildloop/captures/",
    "node_modules/",
    "__pycache__/",
];
const GIT_NAME: &str = "buildloop";
const GIT_EMAIL: &str = "buildloop@localhost";

/// A required external service is missing; the run must not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionError {
    pub reason: String,
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "precondition failed: {}", self.reason)
    }
}

impl std::error::Error for PreconditionError {}

fn precondition(reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(PreconditionError {
        reason: reason.into(),
    })
}

/// Project directory name derived from a description, e.g. `a-snake-game`.
pub fn slugify(description: &str) -> String {
    let words: Vec<String> = description
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(5)
        .map(str::to_ascii_lowercase)
        .collect();
    if words.is_empty() {
        "project".to_string()
    } else {
        words.join("-")
    }
}

/// Create the project layout. Safe to run on an existing project.
pub fn prepare_project(paths: &ProjectPaths) -> Result<()> {
    debug!(root = %paths.root.display(), "preparing project");
    for dir in [&paths.root, &paths.state_dir, &paths.docs_dir, &paths.screenshots_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let git = Git::new(&paths.root);
    if !paths.root.join(".git").exists() {
        info!(root = %paths.root.display(), "initializing git repository");
        git.init()?;
    }
    git.ensure_identity(GIT_NAME, GIT_EMAIL)?;
    ensure_gitignore(&paths.root.join(".gitignore"))
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    } else {
        String::new()
    };
    let missing: Vec<&str> = GITIGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    for entry in missing {
        contents.push_str(entry);
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Create and persist a fresh session.
///
/// Refuses to overwrite an existing session; those are resumed instead.
pub fn new_session(
    paths: &ProjectPaths,
    name: &str,
    description: &str,
    entry_file: &str,
) -> Result<SessionState> {
    if paths.session_path.exists() {
        return Err(anyhow!(
            "project {name} already has a session at {} (use `buildloop resume {name}`)",
            paths.session_path.display()
        ));
    }
    let kind = if paths.root.join(entry_file).is_file() {
        ProjectKind::Web
    } else {
        ProjectKind::infer(description)
    };
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let session = SessionState::new(name, description, kind, &now);
    write_session(&paths.session_path, &session)?;
    info!(project = name, kind = kind.as_str(), "session created");
    Ok(session)
}

/// Load an existing session to continue at its next cycle.
pub fn resume_session(paths: &ProjectPaths) -> Result<SessionState> {
    if !paths.session_path.exists() {
        return Err(anyhow!(
            "no session found at {}",
            paths.session_path.display()
        ));
    }
    let session = load_session(&paths.session_path)?;
    info!(
        project = %session.project_name,
        cycle = session.cycle,
        elapsed_secs = session.elapsed_secs,
        "resuming session"
    );
    Ok(session)
}

/// Verify the agent command and, when needed, the model runtime.
///
/// `runtime_reachable` probes the runtime. If it is down and an autostart
/// command is configured, the runtime is started and returned; dropping the
/// service stops it again.
pub fn check_preconditions<F: Fn() -> bool>(
    config: &EngineConfig,
    runtime_reachable: F,
) -> Result<Option<SupervisedService>> {
    let program = config
        .agent
        .command
        .first()
        .ok_or_else(|| precondition("agent command is empty"))?;
    if find_program(program).is_none() {
        return Err(precondition(format!(
            "coding agent `{program}` not found on PATH"
        )));
    }

    let needs_runtime = config.vision.enabled || config.runtime.coding_model.is_some();
    if !needs_runtime {
        debug!("model runtime not required");
        return Ok(None);
    }
    if runtime_reachable() {
        debug!(base_url = %config.runtime.base_url, "model runtime reachable");
        return Ok(None);
    }
    if config.runtime.autostart.is_empty() {
        return Err(precondition(format!(
            "model runtime not reachable at {}",
            config.runtime.base_url
        )));
    }

    warn!(base_url = %config.runtime.base_url, "model runtime down, starting it");
    let mut service = SupervisedService::spawn("model-runtime", &config.runtime.autostart)
        .map_err(|err| precondition(format!("start model runtime: {err:#}")))?;
    service
        .wait_ready(
            Duration::from_secs(config.runtime.autostart_ready_secs),
            &runtime_reachable,
        )
        .map_err(|err| precondition(format!("{err:#}")))?;
    Ok(Some(service))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn paths() -> (tempfile::TempDir, ProjectPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(&temp.path().join("demo"));
        (temp, paths)
    }

    fn config_with_agent(program: &str) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.agent.command = vec![program.to_string()];
        config
    }

    #[test]
    fn slug_from_description() {
        assert_eq!(slugify("A Snake game, with power-ups!"), "a-snake-game-with-power");
        assert_eq!(slugify("!!!"), "project");
    }

    #[test]
    fn prepare_is_idempotent() {
        let (_temp, paths) = paths();
        prepare_project(&paths).expect("first");
        prepare_project(&paths).expect("second");
        assert!(paths.root.join(".git").is_dir());
        assert!(paths.docs_dir.is_dir());
        assert!(paths.screenshots_dir.is_dir());
        let ignore = fs::read_to_string(paths.root.join(".gitignore")).expect("read");
        assert_eq!(ignore.matches(".buildloop/cycles/").count(), 1);
    }

    #[test]
    fn gitignore_keeps_user_entries() {
        let (_temp, paths) = paths();
        fs::create_dir_all(&paths.root).expect("mkdir");
        fs::write(paths.root.join(".gitignore"), "dist").expect("write");
        prepare_project(&paths).expect("prepare");
        let ignore = fs::read_to_string(paths.root.join(".gitignore")).expect("read");
        assert!(ignore.starts_with("dist\n"));
        assert!(ignore.contains(".buildloop/captures/"));
    }

    #[test]
    fn new_session_infers_kind_and_refuses_overwrite() {
        let (_temp, paths) = paths();
        prepare_project(&paths).expect("prepare");
        let session = new_session(&paths, "demo", "a browser puzzle game", "index.html").expect("new");
        assert_eq!(session.project_kind, ProjectKind::Web);
        assert_eq!(session.session_id, "buildloop-demo");

        let err = new_session(&paths, "demo", "again", "index.html").unwrap_err();
        assert!(err.to_string().contains("resume"));

        let resumed = resume_session(&paths).expect("resume");
        assert_eq!(resumed, session);
    }

    #[test]
    fn existing_entry_file_means_web() {
        let (_temp, paths) = paths();
        prepare_project(&paths).expect("prepare");
        fs::write(paths.root.join("index.html"), "<html></html>").expect("write");
        let session = new_session(&paths, "demo", "a log parser", "index.html").expect("new");
        assert_eq!(session.project_kind, ProjectKind::Web);
    }

    #[test]
    fn resume_without_session_fails() {
        let (_temp, paths) = paths();
        assert!(resume_session(&paths).is_err());
    }

    #[test]
    fn missing_agent_is_a_precondition_error() {
        let config = config_with_agent("definitely-not-an-agent-xyz");
        let err = check_preconditions(&config, || true).unwrap_err();
        assert!(err.downcast_ref::<PreconditionError>().is_some());
    }

    #[test]
    fn runtime_not_needed_without_vision_or_local_model() {
        let mut config = config_with_agent("sh");
        config.vision.enabled = false;
        let service = check_preconditions(&config, || false).expect("ok");
        assert!(service.is_none());
    }

    #[test]
    fn unreachable_runtime_without_autostart_is_fatal() {
        let config = config_with_agent("sh");
        let err = check_preconditions(&config, || false).unwrap_err();
        let precondition = err.downcast_ref::<PreconditionError>().expect("typed");
        assert!(precondition.reason.contains("not reachable"));
    }

    #[test]
    fn autostart_brings_the_runtime_up() {
        let mut config = config_with_agent("sh");
        config.runtime.autostart = vec!["sleep".to_string(), "30".to_string()];
        config.runtime.autostart_ready_secs = 5;
        let probes = Cell::new(0);
        let service = check_preconditions(&config, || {
            probes.set(probes.get() + 1);
            probes.get() > 2
        })
        .expect("started");
        let mut service = service.expect("service");
        assert!(service.is_running());
        service.shutdown();
    }
}
