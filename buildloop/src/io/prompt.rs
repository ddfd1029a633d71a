//! Prompt assembly for agent and vision calls.
//!
//! Every phase prompt is the shared context block followed by the phase's
//! task template. All dynamic content reaches the templates as typed context
//! values, never by string splicing.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::health::HealthReport;
use crate::core::types::{CycleRecord, MaturityTier, Phase};
use crate::io::session::SessionState;

const CONTEXT_TEMPLATE: &str = include_str!("prompts/context.md");
const CREATE_TEMPLATE: &str = include_str!("prompts/create.md");
const VISION_TEMPLATE: &str = include_str!("prompts/vision.md");

const PHASE_TEMPLATES: [(Phase, &str); 9] = [
    (Phase::Fix, include_str!("prompts/fix.md")),
    (Phase::Improve, include_str!("prompts/improve.md")),
    (Phase::Features, include_str!("prompts/features.md")),
    (Phase::Test, include_str!("prompts/test.md")),
    (Phase::Runtests, include_str!("prompts/runtests.md")),
    (Phase::Polish, include_str!("prompts/polish.md")),
    (Phase::Refactor, include_str!("prompts/refactor.md")),
    (Phase::Consolidate, include_str!("prompts/consolidate.md")),
    (Phase::Docs, include_str!("prompts/docs.md")),
];

/// Project-level guidance files, in lookup order.
const GUIDANCE_DOCS: [&str; 3] = ["AGENTS.md", "CLAUDE.md", "CONTRIBUTING.md"];

/// Health section of the shared context.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub checked: bool,
    pub status: String,
    pub details: String,
    pub loads: bool,
    pub renders: bool,
    pub interactive: bool,
    pub error_count: usize,
    pub survival_secs: f64,
    pub errors: Vec<String>,
}

impl HealthView {
    fn from_report(report: Option<&HealthReport>) -> Self {
        match report {
            Some(r) => Self {
                checked: true,
                status: r.status().to_string(),
                details: r.details().to_string(),
                loads: r.loads,
                renders: r.renders,
                interactive: r.interactive,
                error_count: r.error_count,
                survival_secs: (r.survival_secs * 10.0).round() / 10.0,
                errors: r.errors.clone(),
            },
            None => Self {
                checked: false,
                status: "UNKNOWN".to_string(),
                details: String::new(),
                loads: false,
                renders: false,
                interactive: false,
                error_count: 0,
                survival_secs: 0.0,
                errors: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OversizedFile {
    pub path: String,
    pub lines: usize,
}

/// Shared context prepended to every phase prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub guidance_doc: Option<String>,
    pub goal: String,
    pub project_name: String,
    pub project_kind: String,
    pub cycle: u32,
    pub tier: String,
    pub tier_guidance: String,
    pub health: HealthView,
    /// Largest first.
    pub oversized: Vec<OversizedFile>,
    /// Oldest first.
    pub history: Vec<CycleRecord>,
}

impl PromptContext {
    pub fn new(
        root: &Path,
        session: &SessionState,
        cycle: u32,
        health: Option<&HealthReport>,
        history_limit: usize,
    ) -> Self {
        let tier = MaturityTier::for_cycle(cycle);
        let mut oversized: Vec<OversizedFile> = health
            .map(|r| {
                r.oversized_files
                    .iter()
                    .map(|(path, lines)| OversizedFile {
                        path: path.clone(),
                        lines: *lines,
                    })
                    .collect()
            })
            .unwrap_or_default();
        oversized.sort_by(|a, b| b.lines.cmp(&a.lines).then_with(|| a.path.cmp(&b.path)));

        let skip = session.history.len().saturating_sub(history_limit);
        Self {
            guidance_doc: find_guidance_doc(root),
            goal: session.description.clone(),
            project_name: session.project_name.clone(),
            project_kind: session.project_kind.as_str().to_string(),
            cycle,
            tier: tier.as_str().to_string(),
            tier_guidance: tier.guidance().to_string(),
            health: HealthView::from_report(health),
            oversized,
            history: session.history[skip..].to_vec(),
        }
    }
}

/// Phase-specific inputs that only some templates use.
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    /// Most severe failing health signal (fix).
    pub problem: Option<String>,
    /// Aggregated vision critique (vision fix pass).
    pub vision_feedback: Option<String>,
    pub consecutive_fails: u32,
    pub screenshots_dir: Option<String>,
}

/// Inputs for the per-screenshot critique prompt.
#[derive(Debug, Clone, Serialize)]
pub struct VisionPromptInputs<'a> {
    pub project_kind: &'a str,
    pub goal: &'a str,
    pub viewport: &'a str,
    pub width: u32,
    pub height: u32,
    pub state: &'a str,
    pub console_errors: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("context", CONTEXT_TEMPLATE)
            .expect("context template should be valid");
        env.add_template("create", CREATE_TEMPLATE)
            .expect("create template should be valid");
        env.add_template("vision", VISION_TEMPLATE)
            .expect("vision template should be valid");
        for (phase, source) in PHASE_TEMPLATES {
            env.add_template(phase.as_str(), source)
                .expect("phase template should be valid");
        }
        Self { env }
    }

    /// Render the shared context block.
    pub fn render_context(&self, ctx: &PromptContext) -> Result<String> {
        let rendered = self.env.get_template("context")?.render(ctx)?;
        Ok(rendered.trim().to_string())
    }

    /// Render the full prompt for `phase`: context first, then the task.
    pub fn render_phase(&self, phase: Phase, ctx: &PromptContext, task: &TaskInputs) -> Result<String> {
        let context_block = self.render_context(ctx)?;
        let template = self.env.get_template(phase.as_str())?;
        let task_block = template.render(context! {
            problem => task.problem.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            vision_feedback => task.vision_feedback.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            consecutive_fails => task.consecutive_fails,
            screenshots_dir => task.screenshots_dir.as_deref(),
            health => &ctx.health,
            oversized => &ctx.oversized,
        })?;
        debug!(
            phase = %phase,
            context_len = context_block.len(),
            task_len = task_block.len(),
            "rendered phase prompt"
        );
        Ok(format!("{}\n\n{}\n", context_block, task_block.trim()))
    }

    /// Render the initial build prompt.
    pub fn render_create(&self, ctx: &PromptContext, entry_file: &str) -> Result<String> {
        let context_block = self.render_context(ctx)?;
        let task_block = self.env.get_template("create")?.render(context! {
            project_kind => &ctx.project_kind,
            entry_file => entry_file,
        })?;
        Ok(format!("{}\n\n{}\n", context_block, task_block.trim()))
    }

    /// Render the structured critique prompt for one screenshot.
    pub fn render_vision(&self, input: &VisionPromptInputs<'_>) -> Result<String> {
        let rendered = self.env.get_template("vision")?.render(input)?;
        Ok(rendered.trim().to_string())
    }
}

/// First guidance document present at the project root.
pub fn find_guidance_doc(root: &Path) -> Option<String> {
    GUIDANCE_DOCS
        .iter()
        .find(|name| root.join(name).is_file())
        .map(|name| name.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::*;
    use crate::core::health::HealthSignals;
    use crate::core::types::ProjectKind;

    fn session_with_history(entries: u32) -> SessionState {
        let mut session = SessionState::new("snake", "A snake game with levels", ProjectKind::Web, "t0");
        for cycle in 1..=entries {
            session.history.push(CycleRecord {
                cycle,
                phase: Phase::Improve,
                summary: format!("summary {cycle}"),
                confidence: Some(6),
                started_at: "t".to_string(),
                duration_secs: 1,
                vision_fix: false,
            });
        }
        session
    }

    fn failing_report() -> HealthReport {
        let signals = HealthSignals {
            loads: true,
            renders: true,
            interactive: true,
            error_count: 2,
            survival_secs: 10.0,
        };
        let mut oversized = BTreeMap::new();
        oversized.insert("game.js".to_string(), 1800);
        oversized.insert("ui.js".to_string(), 2200);
        HealthReport::from_signals(
            signals,
            vec!["TypeError: a is null".to_string(), "second error".to_string()],
            10,
            None,
        )
        .with_oversized(oversized)
    }

    /// Context sections appear in a fixed order: guidance, goal, health,
    /// oversized files, history.
    #[test]
    fn context_ordering_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("AGENTS.md"), "rules").expect("write guidance");
        let session = session_with_history(3);
        let report = failing_report();
        let ctx = PromptContext::new(temp.path(), &session, 3, Some(&report), 10);

        let content = PromptBuilder::new().render_context(&ctx).expect("render");
        let guidance = content.find("AGENTS.md").expect("guidance");
        let goal = content.find("## Project goal").expect("goal");
        let health = content.find("## Current health: WARN").expect("health");
        let oversized = content.find("## Oversized files").expect("oversized");
        let history = content.find("do not repeat").expect("history");
        assert!(guidance < goal);
        assert!(goal < health);
        assert!(health < oversized);
        assert!(oversized < history);
        assert!(content.find("ui.js").expect("ui") < content.find("game.js").expect("game"));
    }

    #[test]
    fn history_is_limited_to_most_recent_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = session_with_history(14);
        let ctx = PromptContext::new(temp.path(), &session, 15, None, 10);
        assert_eq!(ctx.history.len(), 10);
        assert_eq!(ctx.history[0].cycle, 5);

        let content = PromptBuilder::new().render_context(&ctx).expect("render");
        assert!(!content.contains("summary 4\n"));
        assert!(content.contains("summary 14"));
        assert!(content.contains("No health check has run yet"));
    }

    #[test]
    fn fix_prompt_narrows_to_primary_problem() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = session_with_history(0);
        let report = failing_report();
        let ctx = PromptContext::new(temp.path(), &session, 2, Some(&report), 10);
        let task = TaskInputs {
            problem: report.primary_problem(),
            ..TaskInputs::default()
        };

        let prompt = PromptBuilder::new()
            .render_phase(Phase::Fix, &ctx, &task)
            .expect("render");
        let goal = prompt.find("## Project goal").expect("goal");
        let task_pos = prompt.find("## Task: fix").expect("task");
        assert!(goal < task_pos, "context is prepended");
        assert!(prompt.contains("> 2 console error(s); fix the first one: TypeError: a is null"));
    }

    #[test]
    fn vision_fix_prompt_carries_feedback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = session_with_history(0);
        let ctx = PromptContext::new(temp.path(), &session, 6, None, 10);
        let task = TaskInputs {
            vision_feedback: Some("### mobile / gameplay\nScore overlaps the board".to_string()),
            ..TaskInputs::default()
        };
        let prompt = PromptBuilder::new()
            .render_phase(Phase::Fix, &ctx, &task)
            .expect("render");
        assert!(prompt.contains("<vision_feedback>"));
        assert!(prompt.contains("Score overlaps the board"));
    }

    #[test]
    fn untrusted_text_is_inserted_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session_with_history(0);
        session.description = "{{ health.status }} {% if true %}x{% endif %}".to_string();
        let ctx = PromptContext::new(temp.path(), &session, 1, None, 10);
        let content = PromptBuilder::new().render_context(&ctx).expect("render");
        assert!(content.contains("{{ health.status }} {% if true %}x{% endif %}"));
    }

    #[test]
    fn every_phase_renders() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = session_with_history(2);
        let report = failing_report();
        let ctx = PromptContext::new(temp.path(), &session, 12, Some(&report), 10);
        let builder = PromptBuilder::new();
        for phase in Phase::ALL {
            let prompt = builder
                .render_phase(phase, &ctx, &TaskInputs::default())
                .expect("render phase");
            assert!(prompt.contains("## Task:"), "{phase} has a task section");
            assert!(prompt.contains("confidence: N"), "{phase} asks for confidence");
        }
        let refactor = builder
            .render_phase(Phase::Refactor, &ctx, &TaskInputs::default())
            .expect("render");
        assert!(refactor.contains("`ui.js`, 2200 lines"));
    }

    #[test]
    fn vision_prompt_lists_console_errors() {
        let errors = vec!["Uncaught TypeError".to_string()];
        let prompt = PromptBuilder::new()
            .render_vision(&VisionPromptInputs {
                project_kind: "web",
                goal: "snake",
                viewport: "mobile",
                width: 390,
                height: 844,
                state: "gameplay",
                console_errors: &errors,
            })
            .expect("render");
        assert!(prompt.contains("mobile (390x844)"));
        assert!(prompt.contains("Visual quality: rate 1-10"));
        assert!(prompt.contains("- Uncaught TypeError"));
    }
}
