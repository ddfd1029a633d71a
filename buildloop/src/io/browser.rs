//! Browser automation driver adapter.
//!
//! The driver is an external command speaking a one-shot JSON protocol: one
//! request object on stdin, one response object on stdout. The engine owns the
//! interpretation of raw measurements (see `health`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::io::config::Viewport;
use crate::io::process::{command_from_argv, find_program, run_command_with_timeout};

const DRIVER_OUTPUT_LIMIT_BYTES: usize = 2_000_000;

/// Cheap DOM signature used to detect whether input changed the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomSignature {
    pub text_len: u64,
    pub html_len: u64,
}

/// Probe request for the health check.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRequest {
    pub entry: PathBuf,
    pub viewport: Viewport,
    pub load_timeout_secs: u64,
    pub survival_secs: u64,
    pub keys: Vec<String>,
    pub max_errors: usize,
}

/// Raw measurements returned by a probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeResult {
    pub loaded: bool,
    pub load_error: Option<String>,
    /// Elements with a non-zero bounding box.
    pub visible_elements: u64,
    /// Non-blank canvas pixels sampled, `None` if the page has no canvas.
    pub canvas_nonblank_pixels: Option<u64>,
    pub signature_before: DomSignature,
    pub signature_after: DomSignature,
    /// Seconds the page stayed alive during the survival window.
    pub survival_secs: f64,
    pub console_errors: Vec<String>,
}

/// One step of the scripted interaction sequence used for screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStep {
    Load,
    Wait,
    Start,
    Gameplay,
    Pause,
    Resume,
    Stress,
    ClickProbe,
    Resize,
    Scroll,
}

impl InteractionStep {
    pub const SEQUENCE: [InteractionStep; 10] = [
        InteractionStep::Load,
        InteractionStep::Wait,
        InteractionStep::Start,
        InteractionStep::Gameplay,
        InteractionStep::Pause,
        InteractionStep::Resume,
        InteractionStep::Stress,
        InteractionStep::ClickProbe,
        InteractionStep::Resize,
        InteractionStep::Scroll,
    ];

    /// UI-state label of the screenshot taken after this step.
    pub fn state_label(self) -> &'static str {
        match self {
            InteractionStep::Load => "loaded",
            InteractionStep::Wait => "idle",
            InteractionStep::Start => "started",
            InteractionStep::Gameplay => "gameplay",
            InteractionStep::Pause => "paused",
            InteractionStep::Resume => "resumed",
            InteractionStep::Stress => "stress",
            InteractionStep::ClickProbe => "clicked",
            InteractionStep::Resize => "resized",
            InteractionStep::Scroll => "scrolled",
        }
    }
}

/// Screenshot capture request for the vision gate.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRequest {
    pub entry: PathBuf,
    pub viewport: Viewport,
    pub steps: Vec<InteractionStep>,
    pub max_shots: usize,
    pub out_dir: PathBuf,
}

/// A captured screenshot on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    /// UI-state label, e.g. `gameplay`.
    pub label: String,
    pub path: PathBuf,
}

/// Screenshots and console errors from one viewport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureResult {
    pub screenshots: Vec<Screenshot>,
    pub console_errors: Vec<String>,
}

/// Abstraction over browser automation backends.
pub trait BrowserDriver {
    /// True if the driver can run at all.
    fn available(&self) -> bool;

    fn render_and_probe(&self, request: &ProbeRequest, timeout: Duration) -> Result<ProbeResult>;

    fn capture_interaction_screenshots(
        &self,
        request: &CaptureRequest,
        timeout: Duration,
    ) -> Result<CaptureResult>;
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DriverRequest<'a> {
    Probe(&'a ProbeRequest),
    Capture(&'a CaptureRequest),
}

/// Driver backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandBrowserDriver {
    command: Vec<String>,
}

impl CommandBrowserDriver {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn call<T: for<'de> Deserialize<'de>>(
        &self,
        request: &DriverRequest<'_>,
        timeout: Duration,
    ) -> Result<T> {
        let payload = serde_json::to_vec(request).context("serialize driver request")?;
        let cmd = command_from_argv(&self.command)?;
        let output = run_command_with_timeout(cmd, Some(&payload), timeout, DRIVER_OUTPUT_LIMIT_BYTES)
            .context("run browser driver")?;
        if output.timed_out {
            return Err(anyhow!("browser driver timed out after {:?}", timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "browser driver exited with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        parse_last_json_line(&output.stdout_lossy())
    }
}

impl BrowserDriver for CommandBrowserDriver {
    fn available(&self) -> bool {
        self.command
            .first()
            .is_some_and(|program| find_program(program).is_some())
    }

    #[instrument(skip_all, fields(entry = %request.entry.display(), viewport = %request.viewport.label))]
    fn render_and_probe(&self, request: &ProbeRequest, timeout: Duration) -> Result<ProbeResult> {
        debug!("probing artifact");
        self.call(&DriverRequest::Probe(request), timeout)
    }

    #[instrument(skip_all, fields(viewport = %request.viewport.label, max_shots = request.max_shots))]
    fn capture_interaction_screenshots(
        &self,
        request: &CaptureRequest,
        timeout: Duration,
    ) -> Result<CaptureResult> {
        debug!(out_dir = %request.out_dir.display(), "capturing screenshots");
        self.call(&DriverRequest::Capture(request), timeout)
    }
}

/// Drivers may log before the result; the response is the last JSON line.
fn parse_last_json_line<T: for<'de> Deserialize<'de>>(stdout: &str) -> Result<T> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .ok_or_else(|| anyhow!("browser driver printed no JSON response"))?;
    serde_json::from_str(line).context("parse browser driver response")
}

/// Resolve `path` inside `root` for the driver, which runs elsewhere.
pub fn entry_path(root: &Path, entry_file: &str) -> PathBuf {
    root.join(entry_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_after_log_lines() {
        let stdout = "launching chromium\n{\"loaded\":true,\"visible_elements\":3,\"survival_secs\":10.0}\n";
        let result: ProbeResult = parse_last_json_line(stdout).expect("parse");
        assert!(result.loaded);
        assert_eq!(result.visible_elements, 3);
        assert_eq!(result.canvas_nonblank_pixels, None);
        assert!(result.console_errors.is_empty());
    }

    #[test]
    fn missing_json_is_an_error() {
        let err = parse_last_json_line::<ProbeResult>("crashed\n").unwrap_err();
        assert!(err.to_string().contains("no JSON"));
    }

    #[test]
    fn request_is_tagged_with_action() {
        let request = CaptureRequest {
            entry: PathBuf::from("/p/index.html"),
            viewport: Viewport::new("mobile", 390, 844),
            steps: vec![InteractionStep::Load, InteractionStep::ClickProbe],
            max_shots: 2,
            out_dir: PathBuf::from("/p/.buildloop/captures/mobile"),
        };
        let json = serde_json::to_value(DriverRequest::Capture(&request)).expect("serialize");
        assert_eq!(json["action"], "capture");
        assert_eq!(json["steps"][1], "click_probe");
        assert_eq!(json["viewport"]["width"], 390);
    }

    #[test]
    fn command_driver_round_trips_through_process() {
        let driver = CommandBrowserDriver::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null; echo '{\"screenshots\":[{\"label\":\"loaded\",\"path\":\"/tmp/a.png\"}]}'"
                .to_string(),
        ]);
        assert!(driver.available());
        let request = CaptureRequest {
            entry: PathBuf::from("/p/index.html"),
            viewport: Viewport::new("desktop", 1920, 1080),
            steps: InteractionStep::SEQUENCE.to_vec(),
            max_shots: 8,
            out_dir: PathBuf::from("/tmp"),
        };
        let result = driver
            .capture_interaction_screenshots(&request, Duration::from_secs(5))
            .expect("capture");
        assert_eq!(result.screenshots.len(), 1);
        assert_eq!(result.screenshots[0].label, "loaded");
    }

    #[test]
    fn every_step_has_a_distinct_label() {
        let mut labels: Vec<&str> = InteractionStep::SEQUENCE
            .iter()
            .map(|s| s.state_label())
            .collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), InteractionStep::SEQUENCE.len());
    }
}
