//! Scripted collaborators and scratch projects for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::ProjectKind;
use crate::io::agent::{AgentClient, AgentReply, AgentRequest};
use crate::io::browser::{
    BrowserDriver, CaptureRequest, CaptureResult, ProbeRequest, ProbeResult, Screenshot,
};
use crate::io::git::Git;
use crate::io::models::{ModelRuntime, VisionModel};
use crate::io::session::{ProjectPaths, SessionState};
use crate::start::prepare_project;

/// One scripted agent reply, optionally writing files into the project.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub reply: Result<AgentReply, String>,
    pub writes: Vec<(String, String)>,
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self {
            reply: Ok(AgentReply {
                text: text.to_string(),
                timed_out: false,
            }),
            writes: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            reply: Ok(AgentReply {
                text: String::new(),
                timed_out: true,
            }),
            writes: Vec::new(),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            writes: Vec::new(),
        }
    }

    /// Write `contents` to `path` (relative to the workdir) when replying.
    pub fn writing(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((path.to_string(), contents.to_string()));
        self
    }
}

/// Agent that replays scripted replies, then answers `done`.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl AgentClient for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply> {
        self.requests.borrow_mut().push(request.clone());
        let scripted = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text("done"));
        for (path, contents) in &scripted.writes {
            let full = request.workdir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full, contents)?;
        }
        scripted.reply.map_err(|msg| anyhow!(msg))
    }
}

/// Browser driver with scripted probe results and generated screenshots.
#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    available: bool,
    probes: RefCell<VecDeque<Result<ProbeResult, String>>>,
    probe_default: Option<ProbeResult>,
    capture_labels: Option<Vec<String>>,
    capture_errors: Vec<String>,
    probe_calls: Cell<usize>,
    capture_calls: Cell<usize>,
}

impl ScriptedBrowser {
    /// Probes answer from `probes` in order; captures fail.
    pub fn with_probes(probes: Vec<Result<ProbeResult, String>>) -> Self {
        Self {
            available: true,
            probes: RefCell::new(probes.into()),
            ..Self::default()
        }
    }

    /// Captures write one PNG per label (up to the request cap).
    pub fn capturing(labels: &[&str], console_errors: &[&str]) -> Self {
        Self {
            available: true,
            capture_labels: Some(labels.iter().map(|l| l.to_string()).collect()),
            capture_errors: console_errors.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_capture() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Answer probes with `probe` once the scripted ones run out.
    pub fn with_probe_default(mut self, probe: ProbeResult) -> Self {
        self.probe_default = Some(probe);
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.get()
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.get()
    }
}

impl BrowserDriver for ScriptedBrowser {
    fn available(&self) -> bool {
        self.available
    }

    fn render_and_probe(&self, _request: &ProbeRequest, _timeout: Duration) -> Result<ProbeResult> {
        self.probe_calls.set(self.probe_calls.get() + 1);
        match self.probes.borrow_mut().pop_front() {
            Some(result) => result.map_err(|msg| anyhow!(msg)),
            None => self
                .probe_default
                .clone()
                .ok_or_else(|| anyhow!("no probe scripted")),
        }
    }

    fn capture_interaction_screenshots(
        &self,
        request: &CaptureRequest,
        _timeout: Duration,
    ) -> Result<CaptureResult> {
        self.capture_calls.set(self.capture_calls.get() + 1);
        let labels = self
            .capture_labels
            .as_ref()
            .ok_or_else(|| anyhow!("capture not scripted"))?;
        fs::create_dir_all(&request.out_dir)?;
        let mut screenshots = Vec::new();
        for (idx, label) in labels.iter().take(request.max_shots).enumerate() {
            let path = request.out_dir.join(format!("{idx:02}-{label}.png"));
            fs::write(&path, b"\x89PNG fake")?;
            screenshots.push(Screenshot {
                label: label.clone(),
                path,
            });
        }
        Ok(CaptureResult {
            screenshots,
            console_errors: self.capture_errors.clone(),
        })
    }
}

/// Vision model answering from a script, or with a fixed critique.
#[derive(Debug, Default)]
pub struct ScriptedVision {
    replies: RefCell<VecDeque<Result<String, String>>>,
    fixed: Option<String>,
    calls: Cell<usize>,
}

impl ScriptedVision {
    /// Replies in order, then empty critiques.
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn always(critique: &str) -> Self {
        Self {
            fixed: Some(critique.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VisionModel for ScriptedVision {
    fn critique(&self, image: &Path, _prompt: &str, _timeout: Duration) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        if !image.is_file() {
            return Err(anyhow!("missing screenshot {}", image.display()));
        }
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        match self.replies.borrow_mut().pop_front() {
            Some(reply) => reply.map_err(|msg| anyhow!(msg)),
            None => Ok(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Load(String),
    Unload(String),
}

/// Model runtime that only records calls.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    calls: RefCell<Vec<RuntimeCall>>,
}

impl RecordingRuntime {
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.borrow().clone()
    }
}

impl ModelRuntime for RecordingRuntime {
    fn load(&self, model: &str, _keep_alive: &str) {
        self.calls
            .borrow_mut()
            .push(RuntimeCall::Load(model.to_string()));
    }

    fn unload(&self, model: &str) {
        self.calls
            .borrow_mut()
            .push(RuntimeCall::Unload(model.to_string()));
    }
}

/// Scratch project directory named `demo`.
pub struct TestProject {
    _temp: TempDir,
    paths: ProjectPaths,
    kind: ProjectKind,
    description: String,
}

impl TestProject {
    /// Bare git repository with a commit identity and nothing else.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = ProjectPaths::new(&temp.path().join("demo"));
        fs::create_dir_all(&paths.root)?;
        let git = Git::new(&paths.root);
        git.init()?;
        git.ensure_identity("test", "test@example.com")?;
        Ok(Self {
            _temp: temp,
            paths,
            kind: ProjectKind::Program,
            description: String::new(),
        })
    }

    /// Prepared web project with an entry page.
    pub fn web(description: &str) -> Result<Self> {
        let project = Self::prepared(ProjectKind::Web, description)?;
        fs::write(
            project.root().join("index.html"),
            "<!doctype html>\n<html><body><canvas></canvas></body></html>\n",
        )?;
        Ok(project)
    }

    /// Prepared non-browser project with no files yet.
    pub fn program(description: &str) -> Result<Self> {
        Self::prepared(ProjectKind::Program, description)
    }

    fn prepared(kind: ProjectKind, description: &str) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = ProjectPaths::new(&temp.path().join("demo"));
        prepare_project(&paths)?;
        Ok(Self {
            _temp: temp,
            paths,
            kind,
            description: description.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Fresh session for this project (not written to disk).
    pub fn session(&self) -> SessionState {
        SessionState::new("demo", &self.description, self.kind, "2026-01-01T00:00:00Z")
    }
}
