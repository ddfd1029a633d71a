//! Multi-resolution screenshot review.
//!
//! The gate swaps the coding model out for the vision model, drives the
//! artifact through a scripted interaction at every configured viewport,
//! critiques each screenshot and folds the critiques into one feedback block.
//! Nothing here fails the cycle: every error degrades to less feedback.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::Budget;
use crate::core::types::{HealthStatus, Phase};
use crate::io::browser::{
    BrowserDriver, CaptureRequest, CaptureResult, InteractionStep, Screenshot, entry_path,
};
use crate::io::config::{RuntimeConfig, Viewport, VisionConfig};
use crate::io::models::{ModelRuntime, VisionModel};
use crate::io::prompt::{PromptBuilder, VisionPromptInputs};
use crate::io::session::ProjectPaths;

/// Whether a completed phase may enter the gate.
///
/// A failing artifact is never reviewed, even when the phase was the
/// diagnostic `runtests` chosen because of a failure streak.
pub fn gate_allowed(
    phase: Phase,
    health: Option<HealthStatus>,
    remaining: Duration,
    minimum: Duration,
) -> bool {
    phase.triggers_vision() && health != Some(HealthStatus::Fail) && remaining > minimum
}

/// What one gate pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionOutcome {
    /// Aggregated critiques, `None` when nothing was said.
    pub feedback: Option<String>,
    pub screenshots: usize,
    pub critiques: usize,
    /// Screenshots copied into the project's `screenshots/` directory.
    pub curated: Vec<PathBuf>,
}

/// Goal text the critique prompt is anchored to.
#[derive(Debug, Clone, Copy)]
pub struct ReviewSubject<'a> {
    pub project_kind: &'a str,
    pub goal: &'a str,
}

struct ViewportShots {
    viewport: Viewport,
    screenshots: Vec<Screenshot>,
    console_errors: Vec<String>,
}

pub struct VisionGate<'a, B, R, V>
where
    B: BrowserDriver + ?Sized,
    R: ModelRuntime + ?Sized,
    V: VisionModel + ?Sized,
{
    pub paths: &'a ProjectPaths,
    pub entry_file: &'a str,
    pub config: &'a VisionConfig,
    pub runtime_config: &'a RuntimeConfig,
    pub browser: &'a B,
    pub runtime: &'a R,
    pub vision: &'a V,
    pub prompts: &'a PromptBuilder,
}

impl<B, R, V> VisionGate<'_, B, R, V>
where
    B: BrowserDriver + ?Sized,
    R: ModelRuntime + ?Sized,
    V: VisionModel + ?Sized,
{
    /// Screenshot capability is present and the gate is switched on.
    pub fn ready(&self) -> bool {
        self.config.enabled && self.browser.available()
    }

    #[instrument(skip_all, fields(viewports = self.config.viewports.len()))]
    pub fn run(&self, subject: ReviewSubject<'_>, budget: &Budget) -> VisionOutcome {
        if let Err(err) = reset_dir(&self.paths.captures_dir) {
            warn!(err = %format!("{err:#}"), "cannot prepare capture dir, skipping vision gate");
            return VisionOutcome::default();
        }

        if let Some(coding) = &self.runtime_config.coding_model {
            self.runtime.unload(coding);
        }

        let captured = self.capture_all(budget);
        let screenshots = captured.iter().map(|v| v.screenshots.len()).sum::<usize>();
        let mut outcome = VisionOutcome {
            screenshots,
            ..VisionOutcome::default()
        };

        if screenshots == 0 {
            info!("no screenshots captured, vision gate produced no feedback");
        } else {
            self.runtime.load(&self.config.model, &self.runtime_config.keep_alive);
            let sections = self.critique_all(&captured, subject, budget);
            self.runtime.unload(&self.config.model);

            outcome.critiques = sections.len();
            outcome.curated = self.curate(&captured);
            outcome.feedback = aggregate_feedback(&sections, &captured);
        }

        if let Err(err) = fs::remove_dir_all(&self.paths.captures_dir) {
            debug!(err = %err, "capture dir cleanup failed");
        }
        if let Some(coding) = &self.runtime_config.coding_model {
            self.runtime.load(coding, &self.runtime_config.keep_alive);
        }

        info!(
            screenshots = outcome.screenshots,
            critiques = outcome.critiques,
            curated = outcome.curated.len(),
            "vision gate finished"
        );
        outcome
    }

    fn capture_all(&self, budget: &Budget) -> Vec<ViewportShots> {
        let entry = entry_path(&self.paths.root, self.entry_file);
        let default_timeout = Duration::from_secs(self.config.capture_timeout_secs);
        let mut captured = Vec::new();

        for viewport in &self.config.viewports {
            let timeout = budget.clamp(default_timeout);
            if timeout.is_zero() {
                warn!(viewport = %viewport.label, "no time left for capture");
                break;
            }
            let out_dir = self.paths.captures_dir.join(&viewport.label);
            let request = CaptureRequest {
                entry: entry.clone(),
                viewport: viewport.clone(),
                steps: InteractionStep::SEQUENCE.to_vec(),
                max_shots: self.config.max_screenshots_per_viewport,
                out_dir,
            };

            let mut result = match self.browser.capture_interaction_screenshots(&request, timeout) {
                Ok(result) if !result.screenshots.is_empty() => result,
                Ok(_) => {
                    warn!(viewport = %viewport.label, "capture returned no screenshots, retrying load only");
                    self.best_effort_capture(&request, budget.clamp(default_timeout))
                }
                Err(err) => {
                    warn!(viewport = %viewport.label, err = %format!("{err:#}"), "capture failed, retrying load only");
                    self.best_effort_capture(&request, budget.clamp(default_timeout))
                }
            };
            result.screenshots.truncate(self.config.max_screenshots_per_viewport);
            debug!(viewport = %viewport.label, shots = result.screenshots.len(), "viewport captured");
            captured.push(ViewportShots {
                viewport: viewport.clone(),
                screenshots: result.screenshots,
                console_errors: result.console_errors,
            });
        }
        captured
    }

    /// A single screenshot right after load.
    fn best_effort_capture(&self, full: &CaptureRequest, timeout: Duration) -> CaptureResult {
        if timeout.is_zero() {
            return CaptureResult::default();
        }
        let request = CaptureRequest {
            steps: vec![InteractionStep::Load],
            max_shots: 1,
            ..full.clone()
        };
        match self.browser.capture_interaction_screenshots(&request, timeout) {
            Ok(mut result) => {
                result.screenshots.truncate(1);
                result
            }
            Err(err) => {
                warn!(viewport = %full.viewport.label, err = %format!("{err:#}"), "best-effort capture failed");
                CaptureResult::default()
            }
        }
    }

    fn critique_all(
        &self,
        captured: &[ViewportShots],
        subject: ReviewSubject<'_>,
        budget: &Budget,
    ) -> Vec<String> {
        let default_timeout = Duration::from_secs(self.config.image_timeout_secs);
        let mut sections = Vec::new();

        for shots in captured {
            for shot in &shots.screenshots {
                let timeout = budget.clamp(default_timeout);
                if timeout.is_zero() {
                    warn!("no time left for critiques");
                    return sections;
                }
                let prompt = match self.prompts.render_vision(&VisionPromptInputs {
                    project_kind: subject.project_kind,
                    goal: subject.goal,
                    viewport: &shots.viewport.label,
                    width: shots.viewport.width,
                    height: shots.viewport.height,
                    state: &shot.label,
                    console_errors: &shots.console_errors,
                }) {
                    Ok(prompt) => prompt,
                    Err(err) => {
                        warn!(err = %format!("{err:#}"), "render vision prompt failed");
                        continue;
                    }
                };
                match self.vision.critique(&shot.path, &prompt, timeout) {
                    Ok(text) if !text.trim().is_empty() => {
                        sections.push(format!(
                            "### {} ({}x{}) / {}\n{}",
                            shots.viewport.label,
                            shots.viewport.width,
                            shots.viewport.height,
                            shot.label,
                            text.trim()
                        ));
                    }
                    Ok(_) => debug!(state = %shot.label, "empty critique"),
                    Err(err) => {
                        warn!(state = %shot.label, err = %format!("{err:#}"), "critique failed");
                    }
                }
            }
        }
        sections
    }

    /// Copy one screenshot per curated UI state and viewport into `screenshots/`.
    fn curate(&self, captured: &[ViewportShots]) -> Vec<PathBuf> {
        let mut kept = Vec::new();
        if let Err(err) = fs::create_dir_all(&self.paths.screenshots_dir) {
            warn!(err = %err, "cannot create screenshots dir");
            return kept;
        }
        for shots in captured {
            for state in &self.config.curated_states {
                let Some(shot) = shots.screenshots.iter().find(|s| &s.label == state) else {
                    continue;
                };
                let dest = self
                    .paths
                    .screenshots_dir
                    .join(format!("{}-{}.png", shots.viewport.label, state));
                match fs::copy(&shot.path, &dest) {
                    Ok(_) => kept.push(dest),
                    Err(err) => warn!(src = %shot.path.display(), err = %err, "copy screenshot failed"),
                }
            }
        }
        kept
    }
}

fn aggregate_feedback(sections: &[String], captured: &[ViewportShots]) -> Option<String> {
    if sections.is_empty() {
        return None;
    }
    let mut feedback = sections.join("\n\n");
    for shots in captured.iter().filter(|s| !s.console_errors.is_empty()) {
        feedback.push_str(&format!("\n\n### Console errors ({})\n", shots.viewport.label));
        for err in &shots.console_errors {
            feedback.push_str(&format!("- {err}\n"));
        }
    }
    Some(feedback.trim_end().to_string())
}

fn reset_dir(dir: &std::path::Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}
