//! Shared deterministic types for the iteration engine.
//!
//! These types define stable contracts between core components and the
//! persisted session file. They must not depend on external state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Pass => "PASS",
            HealthStatus::Warn => "WARN",
            HealthStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single task type executed by the coding agent in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Fix,
    Improve,
    Features,
    Test,
    Runtests,
    Polish,
    Refactor,
    Consolidate,
    Docs,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Fix,
        Phase::Improve,
        Phase::Features,
        Phase::Test,
        Phase::Runtests,
        Phase::Polish,
        Phase::Refactor,
        Phase::Consolidate,
        Phase::Docs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Fix => "fix",
            Phase::Improve => "improve",
            Phase::Features => "features",
            Phase::Test => "test",
            Phase::Runtests => "runtests",
            Phase::Polish => "polish",
            Phase::Refactor => "refactor",
            Phase::Consolidate => "consolidate",
            Phase::Docs => "docs",
        }
    }

    /// Constructive phases leave work worth committing.
    pub fn is_constructive(self) -> bool {
        matches!(
            self,
            Phase::Improve
                | Phase::Features
                | Phase::Polish
                | Phase::Docs
                | Phase::Refactor
                | Phase::Consolidate
        )
    }

    /// Phases after which the vision gate may run.
    pub fn triggers_vision(self) -> bool {
        matches!(self, Phase::Runtests | Phase::Polish)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse project age, derived from the cycle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityTier {
    Early,
    Mid,
    Late,
}

impl MaturityTier {
    /// `early` for cycles 0..=3, `mid` for 4..=10, `late` afterwards.
    pub fn for_cycle(cycle: u32) -> Self {
        match cycle {
            0..=3 => MaturityTier::Early,
            4..=10 => MaturityTier::Mid,
            _ => MaturityTier::Late,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MaturityTier::Early => "early",
            MaturityTier::Mid => "mid",
            MaturityTier::Late => "late",
        }
    }

    /// Guidance string handed to the agent alongside the project goal.
    pub fn guidance(self) -> &'static str {
        match self {
            MaturityTier::Early => {
                "The project is young. Get the core experience working end to end before adding breadth."
            }
            MaturityTier::Mid => {
                "The core works. Deepen it: add meaningful features, harden behavior, and keep tests green."
            }
            MaturityTier::Late => {
                "The project is mature. Prefer consolidation, polish, and documentation over new surface area."
            }
        }
    }
}

/// What kind of artifact the project produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    /// Rendered in a browser from an HTML entry file.
    Web,
    /// Anything else: checked statically.
    Program,
}

/// Words that only make sense for something opened in a browser.
const BROWSER_KEYWORDS: &[&str] = &[
    "browser", "html", "html5", "canvas", "website", "webapp", "webgl", "javascript", "css",
];
/// Explicit non-browser targets; these beat the generic web words.
const NON_WEB_KEYWORDS: &[&str] = &[
    "terminal", "cli", "curses", "ncurses", "tui", "console", "shell", "command", "desktop",
    "python", "pygame", "tkinter", "rust", "golang", "java", "kotlin", "cpp", "daemon",
];
/// Generic words that lean towards a browser artifact.
const WEB_KEYWORDS: &[&str] = &["game", "web", "page", "dashboard"];

impl ProjectKind {
    /// Infer the project kind from its description.
    ///
    /// Browser-specific words win, then explicit non-browser targets, then
    /// the generic web words. Anything else is a program.
    pub fn infer(description: &str) -> Self {
        let lower = description.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mentions = |keywords: &[&str]| words.iter().any(|w| keywords.contains(w));

        if mentions(BROWSER_KEYWORDS) {
            ProjectKind::Web
        } else if mentions(NON_WEB_KEYWORDS) {
            ProjectKind::Program
        } else if mentions(WEB_KEYWORDS) {
            ProjectKind::Web
        } else {
            ProjectKind::Program
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectKind::Web => "web",
            ProjectKind::Program => "program",
        }
    }
}

/// One recorded iteration, immutable once pushed into history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u32,
    pub phase: Phase,
    /// Short summary of the agent response, or `no response`.
    pub summary: String,
    pub confidence: Option<u8>,
    /// RFC 3339 timestamp taken when the cycle started.
    pub started_at: String,
    pub duration_secs: u64,
    /// True for the bounded fix pass that consumed vision feedback.
    #[serde(default)]
    pub vision_fix: bool,
}

/// Summary text used when the agent returned nothing or timed out.
pub const NO_RESPONSE: &str = "no response";

/// Maximum characters of agent output kept in a history summary.
pub const SUMMARY_MAX_CHARS: usize = 400;

/// Condense an agent response into a one-paragraph history summary.
pub fn summarize_response(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return NO_RESPONSE.to_string();
    }
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_MAX_CHARS {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(SUMMARY_MAX_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Append a record, keeping only the most recent `limit` entries.
pub fn push_capped(history: &mut Vec<CycleRecord>, record: CycleRecord, limit: usize) {
    history.push(record);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle: u32) -> CycleRecord {
        CycleRecord {
            cycle,
            phase: Phase::Improve,
            summary: format!("cycle {cycle}"),
            confidence: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            duration_secs: 1,
            vision_fix: false,
        }
    }

    #[test]
    fn maturity_tier_boundaries() {
        assert_eq!(MaturityTier::for_cycle(1), MaturityTier::Early);
        assert_eq!(MaturityTier::for_cycle(3), MaturityTier::Early);
        assert_eq!(MaturityTier::for_cycle(4), MaturityTier::Mid);
        assert_eq!(MaturityTier::for_cycle(10), MaturityTier::Mid);
        assert_eq!(MaturityTier::for_cycle(11), MaturityTier::Late);
    }

    #[test]
    fn maturity_tier_is_monotonic() {
        let mut prev = MaturityTier::for_cycle(0);
        for cycle in 1..200 {
            let tier = MaturityTier::for_cycle(cycle);
            assert!(tier >= prev, "tier regressed at cycle {cycle}");
            prev = tier;
        }
    }

    #[test]
    fn constructive_phases_match_checkpoint_set() {
        let constructive: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|p| p.is_constructive())
            .collect();
        assert_eq!(
            constructive,
            vec![
                Phase::Improve,
                Phase::Features,
                Phase::Polish,
                Phase::Refactor,
                Phase::Consolidate,
                Phase::Docs
            ]
        );
        assert!(!Phase::Fix.is_constructive());
        assert!(!Phase::Runtests.is_constructive());
    }

    #[test]
    fn infer_kind_from_description() {
        assert_eq!(ProjectKind::infer("A snake game"), ProjectKind::Web);
        assert_eq!(ProjectKind::infer("HTML5 todo app"), ProjectKind::Web);
        assert_eq!(
            ProjectKind::infer("a python cli that renames photos"),
            ProjectKind::Program
        );
        // "pager" must not match "page".
        assert_eq!(ProjectKind::infer("terminal pager"), ProjectKind::Program);
    }

    #[test]
    fn named_non_browser_target_beats_generic_game() {
        assert_eq!(
            ProjectKind::infer("a terminal snake game in python using curses"),
            ProjectKind::Program
        );
        assert_eq!(
            ProjectKind::infer("a rust cli game of chess for the terminal"),
            ProjectKind::Program
        );
        assert_eq!(ProjectKind::infer("a pygame platformer"), ProjectKind::Program);
    }

    #[test]
    fn browser_words_beat_language_names() {
        assert_eq!(
            ProjectKind::infer("a browser snake game written in rust via wasm"),
            ProjectKind::Web
        );
        assert_eq!(
            ProjectKind::infer("an html dashboard for python test results"),
            ProjectKind::Web
        );
    }

    #[test]
    fn summary_of_empty_response_is_no_response() {
        assert_eq!(summarize_response("  \n "), NO_RESPONSE);
    }

    #[test]
    fn summary_is_collapsed_and_truncated() {
        let long = "word\n".repeat(500);
        let summary = summarize_response(&long);
        assert!(!summary.contains('\n'));
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 3);
    }

    #[test]
    fn history_is_capped_to_most_recent() {
        let mut history = Vec::new();
        for cycle in 1..=13 {
            push_capped(&mut history, record(cycle), 10);
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().map(|r| r.cycle), Some(4));
        assert_eq!(history.last().map(|r| r.cycle), Some(13));
    }

    #[test]
    fn phase_serializes_lowercase() {
        let json = serde_json::to_string(&Phase::Runtests).expect("serialize");
        assert_eq!(json, "\"runtests\"");
        let status = serde_json::to_string(&HealthStatus::Warn).expect("serialize");
        assert_eq!(status, "\"WARN\"");
    }
}
