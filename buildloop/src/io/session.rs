//! Session storage for resumable runs (`<project>/.buildloop/session.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{CycleRecord, HealthStatus, Phase, ProjectKind};

/// Engine-owned directory inside every project.
pub const STATE_DIR: &str = ".buildloop";

/// Resolved paths of engine-owned files inside a project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub session_path: PathBuf,
    pub config_path: PathBuf,
    pub cycles_dir: PathBuf,
    pub captures_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub docs_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: &Path) -> Self {
        let state_dir = root.join(STATE_DIR);
        Self {
            root: root.to_path_buf(),
            session_path: state_dir.join("session.json"),
            config_path: state_dir.join("config.toml"),
            cycles_dir: state_dir.join("cycles"),
            captures_dir: state_dir.join("captures"),
            screenshots_dir: root.join("screenshots"),
            docs_dir: root.join("docs"),
            state_dir,
        }
    }
}

/// Running average of self-reported confidence for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfidence {
    pub samples: u32,
    pub total: u32,
}

impl PhaseConfidence {
    pub fn record(&mut self, score: u8) {
        self.samples += 1;
        self.total += u32::from(score);
    }

    pub fn average(&self) -> Option<f64> {
        (self.samples > 0).then(|| f64::from(self.total) / f64::from(self.samples))
    }
}

/// Persisted record of one run, written after every cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub project_name: String,
    pub project_kind: ProjectKind,
    pub description: String,
    /// Stable agent session id, so the agent keeps memory across cycles.
    pub session_id: String,
    /// Last completed cycle (0 before the first cycle).
    pub cycle: u32,
    pub last_health: Option<HealthStatus>,
    pub last_phase: Option<Phase>,
    #[serde(default)]
    pub consecutive_fails: u32,
    /// Most recent cycles, oldest first.
    #[serde(default)]
    pub history: Vec<CycleRecord>,
    #[serde(default)]
    pub phase_confidence: BTreeMap<Phase, PhaseConfidence>,
    /// Elapsed seconds summed over every invocation of this session.
    pub elapsed_secs: u64,
    /// True once the initial build has been attempted.
    #[serde(default)]
    pub bootstrapped: bool,
    pub created_at: String,
}

impl SessionState {
    pub fn new(project_name: &str, description: &str, kind: ProjectKind, now: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            project_kind: kind,
            description: description.to_string(),
            session_id: format!("buildloop-{project_name}"),
            cycle: 0,
            last_health: None,
            last_phase: None,
            consecutive_fails: 0,
            history: Vec::new(),
            phase_confidence: BTreeMap::new(),
            elapsed_secs: 0,
            bootstrapped: false,
            created_at: now.to_string(),
        }
    }
}

/// Load session state from disk.
pub fn load_session(path: &Path) -> Result<SessionState> {
    debug!(path = %path.display(), "loading session");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let state: SessionState = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    debug!(project = %state.project_name, cycle = state.cycle, "session loaded");
    Ok(state)
}

/// Atomically write session state to disk (temp file + rename).
pub fn write_session(path: &Path, state: &SessionState) -> Result<()> {
    debug!(path = %path.display(), cycle = state.cycle, "writing session");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("session path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace session {}", path.display()))?;
    Ok(())
}
