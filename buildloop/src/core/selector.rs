//! Deterministic phase selection.

use crate::core::health::HealthReport;
use crate::core::types::{HealthStatus, MaturityTier, Phase};

/// Consecutive failures after which `runtests` replaces another blind `fix`.
pub const DIAGNOSTIC_AFTER_FAILS: u32 = 3;

/// Round-robin phase order per maturity tier.
const TIER_ROTATION: [(MaturityTier, &[Phase]); 3] = [
    (
        MaturityTier::Early,
        &[Phase::Improve, Phase::Test, Phase::Runtests, Phase::Features],
    ),
    (
        MaturityTier::Mid,
        &[
            Phase::Improve,
            Phase::Runtests,
            Phase::Features,
            Phase::Polish,
            Phase::Test,
            Phase::Docs,
        ],
    ),
    (
        MaturityTier::Late,
        &[
            Phase::Consolidate,
            Phase::Runtests,
            Phase::Polish,
            Phase::Docs,
            Phase::Refactor,
            Phase::Test,
        ],
    ),
];

/// Ordered phase list for a tier.
pub fn rotation(tier: MaturityTier) -> &'static [Phase] {
    TIER_ROTATION
        .iter()
        .find(|(t, _)| *t == tier)
        .map(|(_, phases)| *phases)
        .unwrap_or(&[Phase::Improve])
}

/// Inputs to [`select_phase`].
#[derive(Debug, Clone, Copy)]
pub struct SelectorInput<'a> {
    /// 1-indexed cycle number.
    pub cycle: u32,
    /// Latest health report, `None` if no check has run in this process.
    pub health: Option<&'a HealthReport>,
    pub consecutive_fails: u32,
    /// Line count above which the largest oversized file forces `refactor`.
    pub refactor_trigger_lines: usize,
}

/// Pick the next phase. First matching rule wins.
pub fn select_phase(input: &SelectorInput<'_>) -> Phase {
    let Some(health) = input.health else {
        if input.cycle != 1 {
            return Phase::Fix;
        }
        return by_maturity(input.cycle);
    };

    match health.status() {
        HealthStatus::Fail if input.consecutive_fails >= DIAGNOSTIC_AFTER_FAILS => {
            return Phase::Runtests;
        }
        HealthStatus::Fail | HealthStatus::Warn => return Phase::Fix,
        HealthStatus::Pass => {}
    }

    if let Some((_, lines)) = health.largest_oversized()
        && lines > input.refactor_trigger_lines
    {
        return Phase::Refactor;
    }

    by_maturity(input.cycle)
}

fn by_maturity(cycle: u32) -> Phase {
    let phases = rotation(MaturityTier::for_cycle(cycle));
    let idx = (cycle.saturating_sub(1) as usize) % phases.len();
    phases[idx]
}
