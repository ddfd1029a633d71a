//! Loop-level tests for full session lifecycles.
//!
//! These drive `CycleController::run` across a start and a resume with
//! scripted collaborators and check what ends up on disk: session file,
//! cycle logs, git history, curated screenshots.

use std::fs;
use std::time::Duration;

use buildloop::core::budget::Budget;
use buildloop::core::types::{HealthStatus, Phase};
use buildloop::cycle::{Collaborators, CycleController, RunState};
use buildloop::io::browser::{DomSignature, ProbeResult};
use buildloop::io::config::{EngineConfig, Viewport};
use buildloop::io::git::Git;
use buildloop::io::session::{load_session, write_session};
use buildloop::start::resume_session;
use buildloop::test_support::{
    RecordingRuntime, ScriptedAgent, ScriptedBrowser, ScriptedReply, ScriptedVision, TestProject,
};

fn healthy() -> ProbeResult {
    ProbeResult {
        loaded: true,
        visible_elements: 20,
        signature_before: DomSignature {
            text_len: 100,
            html_len: 900,
        },
        signature_after: DomSignature {
            text_len: 120,
            html_len: 950,
        },
        survival_secs: 10.0,
        ..ProbeResult::default()
    }
}

fn config(max_cycles: u32) -> EngineConfig {
    let mut config = EngineConfig {
        max_cycles: Some(max_cycles),
        ..EngineConfig::default()
    };
    config.vision.viewports = vec![
        Viewport::new("desktop", 1920, 1080),
        Viewport::new("mobile", 390, 844),
    ];
    config
}

/// Start a session, run four cycles, then resume for three more.
///
/// Sequence:
/// 1. Initial build (not a cycle), committed.
/// 2. Cycle 1: improve (committed), cycle 2: test, cycle 3: runtests, then the
///    vision gate and one fix pass. Cycle 4 is mid tier: polish (committed),
///    again followed by the gate and a fix pass.
/// 3. Resume: cycle 5 is rotation index 4 (test), then docs, then improve.
#[test]
fn start_then_resume_keeps_counting() {
    let project = TestProject::web("a browser snake game").expect("project");
    let paths = project.paths().clone();
    let session = project.session();
    write_session(&paths.session_path, &session).expect("write session");

    let agent = ScriptedAgent::new(vec![
        ScriptedReply::text("scaffolded the game").writing("game.js", "let score = 0;\n"),
        ScriptedReply::text("smoother movement\nconfidence: 8").writing("game.js", "let score = 1;\n"),
        ScriptedReply::text("added tests confidence: 6").writing("test.html", "<p>tests</p>\n"),
        ScriptedReply::text("ran the tests, all green"),
        ScriptedReply::text("fixed mobile layout").writing("style.css", "body{margin:0}\n"),
        ScriptedReply::text("power-ups").writing("powerups.js", "export {}\n"),
    ]);
    let browser = ScriptedBrowser::capturing(&["loaded", "gameplay", "paused"], &[])
        .with_probe_default(healthy());
    let runtime = RecordingRuntime::default();
    let vision = ScriptedVision::always("Score text is cut off at the top.");

    let cfg = config(4);
    let mut state = RunState::new(session);
    let controller = CycleController::new(
        &paths,
        &cfg,
        Collaborators {
            agent: &agent,
            browser: &browser,
            runtime: &runtime,
            vision: &vision,
        },
        Budget::new(Duration::from_secs(4 * 3600)),
        &state,
    );
    let mut phases = Vec::new();
    let summary = controller.run(&mut state, |report| phases.push((report.phase, report.vision_fix)));

    assert_eq!(
        phases,
        vec![
            (Phase::Improve, false),
            (Phase::Test, false),
            (Phase::Runtests, true),
            (Phase::Polish, true),
        ]
    );
    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.final_health, HealthStatus::Pass);
    assert!(summary.files.iter().any(|f| f == "powerups.js"));
    assert_eq!(summary.phase_confidence.get(&Phase::Improve), Some(&8.0));
    // Initial build, improve, polish, final checkpoint.
    assert_eq!(Git::new(&paths.root).commit_count().expect("count"), 4);

    // Two viewports, three curated states each.
    assert!(paths.screenshots_dir.join("desktop-gameplay.png").is_file());
    assert!(paths.screenshots_dir.join("mobile-paused.png").is_file());
    assert!(!paths.captures_dir.exists());

    let saved = load_session(&paths.session_path).expect("load");
    assert_eq!(saved.cycle, 4);
    assert!(saved.bootstrapped);
    assert_eq!(saved.history.len(), 6);
    assert!(saved.history.iter().any(|r| r.vision_fix && r.cycle == 3));

    // Resume: new process, new controller, same session id.
    let resumed = resume_session(&paths).expect("resume");
    let agent = ScriptedAgent::new(Vec::new());
    let cfg = config(3);
    let mut state = RunState::new(resumed);
    let controller = CycleController::new(
        &paths,
        &cfg,
        Collaborators {
            agent: &agent,
            browser: &browser,
            runtime: &runtime,
            vision: &vision,
        },
        Budget::new(Duration::from_secs(3600)),
        &state,
    );
    let mut phases = Vec::new();
    let summary = controller.run(&mut state, |report| phases.push(report.phase));

    assert_eq!(phases, vec![Phase::Test, Phase::Docs, Phase::Improve]);
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.total_cycles, 7);
    assert!(agent.requests().iter().all(|r| r.session_id == "buildloop-demo"));
    // The resumed session never re-runs the initial build.
    assert_eq!(agent.calls(), 3);

    let saved = load_session(&paths.session_path).expect("load");
    assert_eq!(saved.cycle, 7);
    assert!(saved.elapsed_secs >= summary.elapsed.as_secs());
}

/// Three failing health checks in a row switch `fix` to diagnostic `runtests`,
/// and a later pass resets the streak.
#[test]
fn failure_streak_escalates_then_recovers() {
    let project = TestProject::web("a canvas drawing app").expect("project");
    let paths = project.paths().clone();
    let mut session = project.session();
    session.bootstrapped = true;

    let crash = ProbeResult {
        survival_secs: 2.0,
        ..healthy()
    };
    let browser = ScriptedBrowser::with_probes(vec![
        Ok(crash.clone()),
        Ok(crash.clone()),
        Ok(crash),
        Ok(healthy()),
    ])
    .with_probe_default(healthy());
    let agent = ScriptedAgent::new(Vec::new());
    let runtime = RecordingRuntime::default();
    let vision = ScriptedVision::always("looks fine");

    let mut cfg = config(4);
    cfg.vision.enabled = false;
    let mut state = RunState::new(session);
    let controller = CycleController::new(
        &paths,
        &cfg,
        Collaborators {
            agent: &agent,
            browser: &browser,
            runtime: &runtime,
            vision: &vision,
        },
        Budget::new(Duration::from_secs(3600)),
        &state,
    );
    let mut seen = Vec::new();
    controller.run(&mut state, |report| seen.push((report.phase, report.health)));

    assert_eq!(
        seen,
        vec![
            (Phase::Fix, Some(HealthStatus::Fail)),
            (Phase::Fix, Some(HealthStatus::Fail)),
            (Phase::Runtests, Some(HealthStatus::Fail)),
            (Phase::Polish, Some(HealthStatus::Pass)),
        ]
    );
    assert_eq!(state.session.consecutive_fails, 0);
    assert_eq!(vision.calls(), 0);
    assert!(runtime.calls().is_empty());

    let prompt = &agent.requests()[0].prompt;
    assert!(prompt.contains("stops responding after 2.0s"));
}

/// A dead agent never stops the loop; every cycle records "no response".
#[test]
fn agent_failures_degrade_to_no_response() {
    let project = TestProject::program("a command line todo manager").expect("project");
    let paths = project.paths().clone();
    let mut session = project.session();
    session.bootstrapped = true;

    let agent = ScriptedAgent::new(vec![
        ScriptedReply::failure("gateway unreachable"),
        ScriptedReply::timeout(),
    ]);
    let browser = ScriptedBrowser::unavailable();
    let runtime = RecordingRuntime::default();
    let vision = ScriptedVision::always("unused");

    let cfg = config(2);
    let mut state = RunState::new(session);
    let controller = CycleController::new(
        &paths,
        &cfg,
        Collaborators {
            agent: &agent,
            browser: &browser,
            runtime: &runtime,
            vision: &vision,
        },
        Budget::new(Duration::from_secs(3600)),
        &state,
    );
    let summary = controller.run(&mut state, |_| {});

    assert_eq!(summary.cycles, 2);
    assert!(
        state
            .session
            .history
            .iter()
            .all(|r| r.summary == "no response" && r.confidence.is_none())
    );
    let meta = fs::read_to_string(paths.cycles_dir.join("0001-main/meta.json")).expect("meta");
    assert!(meta.contains("\"failed\": true"));
}
