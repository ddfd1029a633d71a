//! Engine configuration stored under `<project>/.buildloop/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Missing fields default to values that work against a local Ollama runtime
/// and a CLI coding agent on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// No new cycle starts once the remaining budget drops to this.
    pub min_cycle_secs: u64,

    /// The vision gate only runs while more than this remains.
    pub vision_min_remaining_secs: u64,

    /// Cycle history entries kept in the session and the prompt.
    pub history_limit: usize,

    /// Stop after this many cycles in one invocation, even with budget left.
    pub max_cycles: Option<u32>,

    pub agent: AgentConfig,
    pub health: HealthConfig,
    pub runtime: RuntimeConfig,
    pub vision: VisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent argv. `{session_id}` and `{timeout_secs}` are substituted per call;
    /// the prompt is written to stdin.
    pub command: Vec<String>,

    /// Default timeout of one phase invocation.
    pub phase_timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "openclaw".to_string(),
                "agent".to_string(),
                "--session-id".to_string(),
                "{session_id}".to_string(),
                "--timeout".to_string(),
                "{timeout_secs}".to_string(),
                "--message".to_string(),
                "-".to_string(),
            ],
            phase_timeout_secs: 15 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Browser driver argv (JSON request on stdin, JSON response on stdout).
    /// Empty disables browser automation.
    pub browser_command: Vec<String>,

    /// Entry file of web artifacts, relative to the project root.
    pub entry_file: String,

    pub load_timeout_secs: u64,
    pub survival_secs: u64,

    /// Console errors collected by the probe.
    pub max_console_errors: usize,

    /// Error messages kept in the report and shown to the agent.
    pub reported_errors: usize,

    /// Canvas pixels that must be non-blank for a canvas to count as rendered.
    pub canvas_nonblank_threshold: u64,

    /// Keys pressed during the interaction check.
    pub keys: Vec<String>,

    /// Timeout for each static check.
    pub static_check_timeout_secs: u64,

    /// Files above this many lines are flagged as refactor candidates.
    pub oversized_file_lines: usize,

    /// The largest file above this many lines forces a `refactor` phase.
    pub refactor_trigger_lines: usize,

    /// Extensions counted by the oversized-file scan.
    pub source_extensions: Vec<String>,

    pub viewport: Viewport,

    /// Static check argv per file extension; `{file}` is substituted.
    pub static_checks: BTreeMap<String, Vec<String>>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let mut static_checks = BTreeMap::new();
        static_checks.insert(
            "py".to_string(),
            vec![
                "python3".to_string(),
                "-m".to_string(),
                "py_compile".to_string(),
                "{file}".to_string(),
            ],
        );
        static_checks.insert(
            "js".to_string(),
            vec!["node".to_string(), "--check".to_string(), "{file}".to_string()],
        );
        static_checks.insert(
            "sh".to_string(),
            vec!["bash".to_string(), "-n".to_string(), "{file}".to_string()],
        );
        Self {
            browser_command: vec!["buildloop-browser".to_string()],
            entry_file: "index.html".to_string(),
            viewport: Viewport {
                label: "health".to_string(),
                width: 1280,
                height: 720,
            },
            load_timeout_secs: 15,
            survival_secs: 10,
            max_console_errors: 30,
            reported_errors: 10,
            canvas_nonblank_threshold: 100,
            keys: ["ArrowUp", "ArrowLeft", "ArrowRight", "ArrowDown", "Space", "Enter"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            static_checks,
            static_check_timeout_secs: 30,
            oversized_file_lines: 1500,
            refactor_trigger_lines: 2500,
            source_extensions: ["js", "mjs", "ts", "py", "html", "css", "rs", "go", "sh"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base URL of the Ollama-compatible model runtime.
    pub base_url: String,

    /// Local model used by the coding agent, if any. Unloaded before the
    /// vision model is loaded and re-warmed afterwards.
    pub coding_model: Option<String>,

    pub keep_alive: String,
    pub request_timeout_secs: u64,

    /// Command that starts the runtime when it is not reachable at start-up.
    pub autostart: Vec<String>,

    pub autostart_ready_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            coding_model: None,
            keep_alive: "30m".to_string(),
            request_timeout_secs: 30,
            autostart: Vec::new(),
            autostart_ready_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub model: String,
    pub image_timeout_secs: u64,
    /// Timeout of one viewport's scripted capture run.
    pub capture_timeout_secs: u64,
    pub max_screenshots_per_viewport: usize,
    /// UI states whose screenshots are kept under `screenshots/`.
    pub curated_states: Vec<String>,
    pub viewports: Vec<Viewport>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "qwen2.5vl:7b".to_string(),
            image_timeout_secs: 180,
            capture_timeout_secs: 120,
            max_screenshots_per_viewport: 8,
            viewports: vec![
                Viewport::new("desktop", 1920, 1080),
                Viewport::new("laptop", 1366, 768),
                Viewport::new("tablet-portrait", 768, 1024),
                Viewport::new("mobile", 390, 844),
                Viewport::new("ultrawide", 2560, 1080),
            ],
            curated_states: vec![
                "loaded".to_string(),
                "gameplay".to_string(),
                "paused".to_string(),
            ],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_cycle_secs: 5 * 60,
            vision_min_remaining_secs: 10 * 60,
            history_limit: 10,
            max_cycles: None,
            agent: AgentConfig::default(),
            health: HealthConfig::default(),
            runtime: RuntimeConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == Some(0) {
            return Err(anyhow!("max_cycles must be > 0 when set"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.phase_timeout_secs == 0 {
            return Err(anyhow!("agent.phase_timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.health.load_timeout_secs == 0 || self.health.static_check_timeout_secs == 0 {
            return Err(anyhow!("health timeouts must be > 0"));
        }
        if self.health.refactor_trigger_lines < self.health.oversized_file_lines {
            return Err(anyhow!(
                "health.refactor_trigger_lines must be >= health.oversized_file_lines"
            ));
        }
        if self.vision.enabled && self.vision.viewports.is_empty() {
            return Err(anyhow!("vision.viewports must not be empty when vision is enabled"));
        }
        if self.vision.image_timeout_secs == 0 || self.vision.capture_timeout_secs == 0 {
            return Err(anyhow!("vision timeouts must be > 0"));
        }
        Ok(())
    }

    pub fn min_cycle(&self) -> Duration {
        Duration::from_secs(self.min_cycle_secs)
    }

    pub fn vision_min_remaining(&self) -> Duration {
        Duration::from_secs(self.vision_min_remaining_secs)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.phase_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = EngineConfig::default();
        cfg.runtime.coding_model = Some("qwen2.5-coder:14b".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "min_cycle_secs = 60\n[vision]\nenabled = false\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.min_cycle_secs, 60);
        assert!(!cfg.vision.enabled);
        assert_eq!(cfg.vision.viewports.len(), 5);
        assert_eq!(cfg.health.oversized_file_lines, 1500);
    }

    #[test]
    fn rejects_inverted_refactor_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.health.refactor_trigger_lines = 100;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("refactor_trigger_lines"));
    }

    #[test]
    fn rejects_empty_agent_command() {
        let mut cfg = EngineConfig::default();
        cfg.agent.command.clear();
        assert!(cfg.validate().is_err());
    }
}
