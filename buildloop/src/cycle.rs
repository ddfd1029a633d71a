//! The cycle controller.
//!
//! One cycle is: health check, phase selection, prompt assembly, agent call,
//! bookkeeping, an optional checkpoint, an optional vision review with its
//! single fix pass, and a session write. The loop runs while the wall-clock
//! budget leaves more than the minimum cycle time; no failure inside a cycle
//! ends the run.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{CheckpointOutcome, checkpoint, cycle_message};
use crate::core::budget::{Budget, can_start_cycle};
use crate::core::health::{FailureStreak, HealthReport};
use crate::core::selector::{SelectorInput, select_phase};
use crate::core::types::{
    CycleRecord, HealthStatus, NO_RESPONSE, Phase, ProjectKind, push_capped, summarize_response,
};
use crate::health::{HealthChecker, source_files};
use crate::io::agent::{AgentClient, AgentRequest, AgentResponse, invoke_agent};
use crate::io::browser::BrowserDriver;
use crate::io::config::EngineConfig;
use crate::io::cycle_log::{CycleMeta, CycleWriteRequest, write_cycle};
use crate::io::models::{ModelRuntime, VisionModel};
use crate::io::prompt::{PromptBuilder, PromptContext, TaskInputs};
use crate::io::session::{ProjectPaths, SessionState, write_session};
use crate::vision_gate::{ReviewSubject, VisionGate, VisionOutcome, gate_allowed};

/// The final health check may overrun an exhausted budget by at most this.
const FINAL_CHECK_FLOOR: Duration = Duration::from_secs(30);

/// Mutable state threaded through the loop.
#[derive(Debug, Clone)]
pub struct RunState {
    pub session: SessionState,
    /// Last known health report; `None` until a check runs in this process.
    pub health: Option<HealthReport>,
    pub streak: FailureStreak,
    /// Produced by the vision gate, consumed by exactly one fix pass.
    pub vision_feedback: Option<String>,
}

impl RunState {
    pub fn new(session: SessionState) -> Self {
        let streak = FailureStreak::new(session.consecutive_fails);
        Self {
            session,
            health: None,
            streak,
            vision_feedback: None,
        }
    }

    fn health_status(&self) -> Option<HealthStatus> {
        self.health.as_ref().map(HealthReport::status)
    }
}

/// External services the controller drives.
pub struct Collaborators<'a, A, B, R, V>
where
    A: AgentClient + ?Sized,
    B: BrowserDriver + ?Sized,
    R: ModelRuntime + ?Sized,
    V: VisionModel + ?Sized,
{
    pub agent: &'a A,
    pub browser: &'a B,
    pub runtime: &'a R,
    pub vision: &'a V,
}

/// What happened in one cycle, handed to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u32,
    pub phase: Phase,
    pub health: Option<HealthStatus>,
    pub response_len: usize,
    pub confidence: Option<u8>,
    pub checkpoint: Option<CheckpointOutcome>,
    pub vision: Option<VisionOutcome>,
    pub vision_fix: bool,
}

/// Reported after the loop, however many cycles degraded.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Cycles executed by this invocation.
    pub cycles: u32,
    /// Cycle counter of the session after this invocation.
    pub total_cycles: u32,
    pub elapsed: Duration,
    pub final_health: HealthStatus,
    pub final_details: String,
    /// Project files, relative to the project root.
    pub files: Vec<String>,
    /// Average self-reported confidence per phase.
    pub phase_confidence: BTreeMap<Phase, f64>,
}

pub struct CycleController<'a, A, B, R, V>
where
    A: AgentClient + ?Sized,
    B: BrowserDriver + ?Sized,
    R: ModelRuntime + ?Sized,
    V: VisionModel + ?Sized,
{
    paths: &'a ProjectPaths,
    config: &'a EngineConfig,
    collab: Collaborators<'a, A, B, R, V>,
    prompts: PromptBuilder,
    budget: Budget,
    /// Session elapsed seconds accumulated by earlier invocations.
    prior_elapsed_secs: u64,
}

struct PassResult {
    prompt: String,
    response: AgentResponse,
    started_at: String,
    duration_secs: u64,
}

impl<'a, A, B, R, V> CycleController<'a, A, B, R, V>
where
    A: AgentClient + ?Sized,
    B: BrowserDriver + ?Sized,
    R: ModelRuntime + ?Sized,
    V: VisionModel + ?Sized,
{
    pub fn new(
        paths: &'a ProjectPaths,
        config: &'a EngineConfig,
        collab: Collaborators<'a, A, B, R, V>,
        budget: Budget,
        state: &RunState,
    ) -> Self {
        Self {
            paths,
            config,
            collab,
            prompts: PromptBuilder::new(),
            budget,
            prior_elapsed_secs: state.session.elapsed_secs,
        }
    }

    /// Run cycles until the budget (or `max_cycles`) is exhausted, then do the
    /// final health check and checkpoint.
    #[instrument(skip_all, fields(project = %state.session.project_name))]
    pub fn run<F: FnMut(&CycleReport)>(&self, state: &mut RunState, mut on_cycle: F) -> RunSummary {
        let first_cycle = state.session.cycle;
        info!(
            resume_from = first_cycle,
            budget_secs = self.budget.remaining().as_secs(),
            "build loop starting"
        );

        if !state.session.bootstrapped && self.can_start() {
            self.initial_build(state);
        }

        while self.can_start() {
            if let Some(max) = self.config.max_cycles
                && state.session.cycle - first_cycle >= max
            {
                info!(max, "cycle limit reached");
                break;
            }
            let report = self.run_cycle(state);
            on_cycle(&report);
        }

        self.finish(state, first_cycle)
    }

    fn can_start(&self) -> bool {
        can_start_cycle(self.budget.remaining(), self.config.min_cycle())
    }

    /// First agent call of a fresh session; not counted as a cycle.
    fn initial_build(&self, state: &mut RunState) {
        info!("initial build");
        let ctx = self.context(state, 0);
        let prompt = match self
            .prompts
            .render_create(&ctx, &self.config.health.entry_file)
        {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "render create prompt failed");
                return;
            }
        };
        let pass = self.invoke(state, prompt);
        let outcome = checkpoint(&self.paths.root, "buildloop: initial build");

        self.log_cycle(
            state,
            "create",
            &pass,
            CycleFacts {
                cycle: 0,
                phase: None,
                checkpointed: outcome.committed(),
                vision_feedback: None,
            },
        );
        state.session.bootstrapped = true;
        self.persist(state);
    }

    fn run_cycle(&self, state: &mut RunState) -> CycleReport {
        let cycle = state.session.cycle + 1;
        debug_assert!(state.vision_feedback.is_none());
        info!(cycle, remaining_secs = self.budget.remaining().as_secs(), "cycle starting");

        let checker = self.checker(state);
        if cycle == 1 || checker.available() {
            let report = checker.run(self.budget.clamp(checker.default_timeout()));
            self.observe_health(state, report);
        } else {
            debug!("health check unavailable, keeping last known report");
        }

        let phase = select_phase(&SelectorInput {
            cycle,
            health: state.health.as_ref(),
            consecutive_fails: state.streak.count(),
            refactor_trigger_lines: self.config.health.refactor_trigger_lines,
        });
        info!(cycle, phase = %phase, health = ?state.health_status(), "phase selected");

        let ctx = self.context(state, cycle);
        let task = TaskInputs {
            problem: match phase {
                Phase::Fix => state.health.as_ref().and_then(HealthReport::primary_problem),
                _ => None,
            },
            vision_feedback: None,
            consecutive_fails: state.streak.count(),
            screenshots_dir: Some(relative_dir(&self.paths.root, &self.paths.screenshots_dir)),
        };
        let pass = self.run_phase(state, phase, &ctx, &task);

        state.session.cycle = cycle;
        state.session.last_phase = Some(phase);
        self.record(state, cycle, phase, &pass, false);

        let checkpoint_outcome = phase
            .is_constructive()
            .then(|| checkpoint(&self.paths.root, &cycle_message(cycle, phase)));

        self.log_cycle(
            state,
            "main",
            &pass,
            CycleFacts {
                cycle,
                phase: Some(phase),
                checkpointed: checkpoint_outcome.as_ref().is_some_and(CheckpointOutcome::committed),
                vision_feedback: None,
            },
        );

        let mut report = CycleReport {
            cycle,
            phase,
            health: state.health_status(),
            response_len: pass.response.len(),
            confidence: pass.response.confidence,
            checkpoint: checkpoint_outcome,
            vision: None,
            vision_fix: false,
        };

        if self.vision_wanted(state, phase) {
            let outcome = self.vision_gate().run(
                ReviewSubject {
                    project_kind: state.session.project_kind.as_str(),
                    goal: &state.session.description,
                },
                &self.budget,
            );
            state.vision_feedback = outcome.feedback.clone();
            report.vision = Some(outcome);

            if let Some(feedback) = state.vision_feedback.take() {
                self.vision_fix(state, cycle, &feedback);
                report.vision_fix = true;
            }
        }

        self.persist(state);
        report
    }

    /// One bounded fix pass against vision feedback.
    fn vision_fix(&self, state: &mut RunState, cycle: u32, feedback: &str) {
        info!(cycle, feedback_len = feedback.len(), "vision fix pass");
        let ctx = self.context(state, cycle);
        let task = TaskInputs {
            vision_feedback: Some(feedback.to_string()),
            consecutive_fails: state.streak.count(),
            ..TaskInputs::default()
        };
        let pass = self.run_phase(state, Phase::Fix, &ctx, &task);
        self.record(state, cycle, Phase::Fix, &pass, true);
        self.log_cycle(
            state,
            "vision-fix",
            &pass,
            CycleFacts {
                cycle,
                phase: Some(Phase::Fix),
                checkpointed: false,
                vision_feedback: Some(feedback),
            },
        );
    }

    fn vision_wanted(&self, state: &RunState, phase: Phase) -> bool {
        if state.session.project_kind != ProjectKind::Web {
            return false;
        }
        if !gate_allowed(
            phase,
            state.health_status(),
            self.budget.remaining(),
            self.config.vision_min_remaining(),
        ) {
            return false;
        }
        let ready = self.vision_gate().ready();
        if !ready {
            debug!("vision gate not ready, skipping");
        }
        ready
    }

    fn run_phase(&self, state: &RunState, phase: Phase, ctx: &PromptContext, task: &TaskInputs) -> PassResult {
        match self.prompts.render_phase(phase, ctx, task) {
            Ok(prompt) => self.invoke(state, prompt),
            Err(err) => {
                warn!(phase = %phase, err = %format!("{err:#}"), "render prompt failed");
                PassResult {
                    prompt: String::new(),
                    response: AgentResponse {
                        text: String::new(),
                        timed_out: false,
                        failed: true,
                        confidence: None,
                    },
                    started_at: now_rfc3339(),
                    duration_secs: 0,
                }
            }
        }
    }

    fn invoke(&self, state: &RunState, prompt: String) -> PassResult {
        let started_at = now_rfc3339();
        let started = Instant::now();
        let request = AgentRequest {
            session_id: state.session.session_id.clone(),
            prompt,
            timeout: self.budget.clamp(self.config.phase_timeout()),
            workdir: self.paths.root.clone(),
        };
        let response = invoke_agent(self.collab.agent, &request);
        PassResult {
            prompt: request.prompt,
            response,
            started_at,
            duration_secs: started.elapsed().as_secs(),
        }
    }

    fn record(&self, state: &mut RunState, cycle: u32, phase: Phase, pass: &PassResult, vision_fix: bool) {
        let summary = if pass.response.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            summarize_response(&pass.response.text)
        };
        if let Some(score) = pass.response.confidence {
            state
                .session
                .phase_confidence
                .entry(phase)
                .or_default()
                .record(score);
        }
        push_capped(
            &mut state.session.history,
            CycleRecord {
                cycle,
                phase,
                summary,
                confidence: pass.response.confidence,
                started_at: pass.started_at.clone(),
                duration_secs: pass.duration_secs,
                vision_fix,
            },
            self.config.history_limit,
        );
    }

    fn observe_health(&self, state: &mut RunState, report: HealthReport) {
        state.streak.observe(report.status());
        state.session.last_health = Some(report.status());
        state.session.consecutive_fails = state.streak.count();
        state.health = Some(report);
    }

    fn finish(&self, state: &mut RunState, first_cycle: u32) -> RunSummary {
        info!(cycles = state.session.cycle - first_cycle, "budget exhausted, final pass");
        let checker = self.checker(state);
        let timeout = self
            .budget
            .clamp(checker.default_timeout())
            .max(FINAL_CHECK_FLOOR.min(checker.default_timeout()));
        let report = checker.run(timeout);
        self.observe_health(state, report);

        let message = format!(
            "buildloop: final checkpoint after cycle {}",
            state.session.cycle
        );
        checkpoint(&self.paths.root, &message);
        self.persist(state);

        let files = source_files(&self.paths.root)
            .iter()
            .filter_map(|path| path.strip_prefix(&self.paths.root).ok())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect();
        let phase_confidence = state
            .session
            .phase_confidence
            .iter()
            .filter_map(|(phase, scores)| scores.average().map(|avg| (*phase, avg)))
            .collect();
        let (final_health, final_details) = match &state.health {
            Some(report) => (report.status(), report.details().to_string()),
            None => (HealthStatus::Fail, "no health check ran".to_string()),
        };

        RunSummary {
            cycles: state.session.cycle - first_cycle,
            total_cycles: state.session.cycle,
            elapsed: self.budget.elapsed(),
            final_health,
            final_details,
            files,
            phase_confidence,
        }
    }

    fn persist(&self, state: &mut RunState) {
        state.session.elapsed_secs = self.prior_elapsed_secs + self.budget.elapsed().as_secs();
        if let Err(err) = write_session(&self.paths.session_path, &state.session) {
            warn!(err = %format!("{err:#}"), "session write failed");
        }
    }

    fn log_cycle(&self, state: &RunState, label: &str, pass: &PassResult, facts: CycleFacts<'_>) {
        let meta = CycleMeta {
            cycle: facts.cycle,
            phase: facts.phase,
            health: state.health_status(),
            health_details: state.health.as_ref().map(|h| h.details().to_string()),
            consecutive_fails: state.streak.count(),
            response_len: pass.response.len(),
            timed_out: pass.response.timed_out,
            failed: pass.response.failed,
            confidence: pass.response.confidence,
            checkpointed: facts.checkpointed,
            vision_feedback: facts.vision_feedback.is_some(),
            started_at: pass.started_at.clone(),
            duration_secs: pass.duration_secs,
        };
        let written = write_cycle(&CycleWriteRequest {
            cycles_dir: &self.paths.cycles_dir,
            label,
            meta: &meta,
            prompt: &pass.prompt,
            response: &pass.response.text,
            vision_feedback: facts.vision_feedback,
        });
        if let Err(err) = written {
            warn!(err = %format!("{err:#}"), "cycle log write failed");
        }
    }

    fn context(&self, state: &RunState, cycle: u32) -> PromptContext {
        PromptContext::new(
            &self.paths.root,
            &state.session,
            cycle,
            state.health.as_ref(),
            self.config.history_limit,
        )
    }

    fn checker(&self, state: &RunState) -> HealthChecker<'_, B> {
        HealthChecker::new(
            &self.paths.root,
            state.session.project_kind,
            &self.config.health,
            self.collab.browser,
        )
    }

    fn vision_gate(&self) -> VisionGate<'_, B, R, V> {
        VisionGate {
            paths: self.paths,
            entry_file: &self.config.health.entry_file,
            config: &self.config.vision,
            runtime_config: &self.config.runtime,
            browser: self.collab.browser,
            runtime: self.collab.runtime,
            vision: self.collab.vision,
            prompts: &self.prompts,
        }
    }
}

struct CycleFacts<'a> {
    cycle: u32,
    phase: Option<Phase>,
    checkpointed: bool,
    vision_feedback: Option<&'a str>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn relative_dir(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .to_string_lossy()
        .into_owned()
}
