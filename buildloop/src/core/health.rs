//! Health report model and status derivation.
//!
//! The status of a report is never set directly: it is always derived from
//! the measured signals by [`derive_status`] (browser artifacts) or
//! [`derive_static_status`] (everything else).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::HealthStatus;

/// More console errors than this is treated as critically broken.
pub const CRITICAL_ERROR_COUNT: usize = 5;
/// Pages that die before this many seconds count as crashed.
pub const MIN_SURVIVAL_SECS: f64 = 5.0;

/// Raw signals measured by the browser health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSignals {
    pub loads: bool,
    pub renders: bool,
    pub interactive: bool,
    pub error_count: usize,
    pub survival_secs: f64,
}

/// Map signals to a status and a short reason.
///
/// Rules are evaluated in strict priority order and the first match wins.
pub fn derive_status(signals: &HealthSignals) -> (HealthStatus, &'static str) {
    if !signals.loads {
        return (HealthStatus::Fail, "failed to load");
    }
    if !signals.renders {
        return (HealthStatus::Fail, "blank render");
    }
    if signals.error_count > CRITICAL_ERROR_COUNT {
        return (HealthStatus::Fail, "critically broken");
    }
    if signals.survival_secs < MIN_SURVIVAL_SECS {
        return (HealthStatus::Fail, "crashed early");
    }
    if signals.error_count > 0 {
        return (HealthStatus::Warn, "console errors");
    }
    if !signals.interactive {
        return (HealthStatus::Warn, "not interactive");
    }
    (HealthStatus::Pass, "healthy")
}

/// Static checks only distinguish broken from not broken.
pub fn derive_static_status(failed_checks: usize) -> (HealthStatus, &'static str) {
    if failed_checks > 0 {
        (HealthStatus::Fail, "static checks failed")
    } else {
        (HealthStatus::Pass, "static checks passed")
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    status: HealthStatus,
    details: String,
    pub loads: bool,
    pub renders: bool,
    pub interactive: bool,
    pub error_count: usize,
    /// First few error messages, in capture order.
    pub errors: Vec<String>,
    pub survival_secs: f64,
    /// Oversized source files (relative path -> line count).
    pub oversized_files: BTreeMap<String, usize>,
}

impl HealthReport {
    /// Build a report from browser signals.
    ///
    /// `errors` is truncated to `reported_errors` entries; `error_count` keeps
    /// the full count from `signals`.
    pub fn from_signals(
        signals: HealthSignals,
        mut errors: Vec<String>,
        reported_errors: usize,
        detail: Option<String>,
    ) -> Self {
        let (status, reason) = derive_status(&signals);
        errors.truncate(reported_errors);
        let details = match detail {
            Some(extra) if !extra.trim().is_empty() => format!("{reason}: {}", extra.trim()),
            _ => reason.to_string(),
        };
        Self {
            status,
            details,
            loads: signals.loads,
            renders: signals.renders,
            interactive: signals.interactive,
            error_count: signals.error_count,
            errors,
            survival_secs: signals.survival_secs,
            oversized_files: BTreeMap::new(),
        }
    }

    /// Build a report from static check failures (one message per failed check).
    pub fn from_static(mut failures: Vec<String>, reported_errors: usize) -> Self {
        let error_count = failures.len();
        let (status, reason) = derive_static_status(error_count);
        failures.truncate(reported_errors);
        let ok = status != HealthStatus::Fail;
        Self {
            status,
            details: reason.to_string(),
            loads: ok,
            renders: ok,
            interactive: ok,
            error_count,
            errors: failures,
            survival_secs: 0.0,
            oversized_files: BTreeMap::new(),
        }
    }

    /// Report used when the check harness itself failed.
    pub fn crashed(reason: &str) -> Self {
        Self {
            status: HealthStatus::Fail,
            details: format!("check crashed: {}", reason.trim()),
            loads: false,
            renders: false,
            interactive: false,
            error_count: 0,
            errors: Vec::new(),
            survival_secs: 0.0,
            oversized_files: BTreeMap::new(),
        }
    }

    pub fn with_oversized(mut self, oversized: BTreeMap<String, usize>) -> Self {
        self.oversized_files = oversized;
        self
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// Largest oversized file by line count, ties broken by path order.
    pub fn largest_oversized(&self) -> Option<(&str, usize)> {
        self.oversized_files
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(path, lines)| (path.as_str(), *lines))
    }

    /// The single most severe failing signal, for narrowing a fix pass.
    pub fn primary_problem(&self) -> Option<String> {
        if self.status == HealthStatus::Pass {
            return None;
        }
        let first_error = self.errors.first().map(String::as_str);
        let problem = match (self.loads, self.renders, first_error) {
            (false, _, Some(err)) => format!("The artifact fails to load: {err}"),
            (false, _, None) => format!("The artifact fails to load ({})", self.details),
            (true, false, _) => {
                "The page loads but renders nothing visible (blank screen).".to_string()
            }
            (true, true, Some(err)) => format!(
                "{} console error(s); fix the first one: {err}",
                self.error_count
            ),
            (true, true, None) if self.survival_secs < MIN_SURVIVAL_SECS => format!(
                "The page stops responding after {:.1}s.",
                self.survival_secs
            ),
            (true, true, None) => {
                "Keyboard input does not change anything on the page.".to_string()
            }
        };
        Some(problem)
    }
}

/// Tracks consecutive `FAIL` outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureStreak(u32);

impl FailureStreak {
    pub fn new(count: u32) -> Self {
        Self(count)
    }

    pub fn count(self) -> u32 {
        self.0
    }

    /// `FAIL` increments by one, `PASS` resets, `WARN` leaves the streak alone.
    pub fn observe(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Fail => self.0 = self.0.saturating_add(1),
            HealthStatus::Pass => self.0 = 0,
            HealthStatus::Warn => {}
        }
    }
}
