//! Health checks for the current artifact.
//!
//! Web projects are probed through the browser driver; everything else gets
//! per-file static checks. Both paths finish with an oversized-file scan.
//! A check never returns an error: harness failures become a crashed report.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::health::{HealthReport, HealthSignals};
use crate::core::types::ProjectKind;
use crate::io::browser::{BrowserDriver, ProbeRequest, ProbeResult, entry_path};
use crate::io::config::HealthConfig;
use crate::io::process::{command_from_argv, find_program, render_argv, run_command_with_timeout};
use crate::io::session::STATE_DIR;

const STATIC_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;
/// Extra time the driver gets beyond load + survival for startup and teardown.
const PROBE_SLACK: Duration = Duration::from_secs(30);
const SKIPPED_DIRS: [&str; 5] = [".git", "node_modules", "target", "screenshots", STATE_DIR];

pub struct HealthChecker<'a, B: BrowserDriver + ?Sized> {
    root: &'a Path,
    kind: ProjectKind,
    config: &'a HealthConfig,
    browser: &'a B,
}

impl<'a, B: BrowserDriver + ?Sized> HealthChecker<'a, B> {
    pub fn new(root: &'a Path, kind: ProjectKind, config: &'a HealthConfig, browser: &'a B) -> Self {
        Self {
            root,
            kind,
            config,
            browser,
        }
    }

    /// Whether a check can run without the forced first-cycle check.
    pub fn available(&self) -> bool {
        match self.kind {
            ProjectKind::Web => self.browser.available(),
            ProjectKind::Program => true,
        }
    }

    /// Default time one full check may take.
    pub fn default_timeout(&self) -> Duration {
        match self.kind {
            ProjectKind::Web => {
                Duration::from_secs(self.config.load_timeout_secs + self.config.survival_secs)
                    + PROBE_SLACK
            }
            ProjectKind::Program => Duration::from_secs(self.config.static_check_timeout_secs) * 4,
        }
    }

    /// Run one check bounded by `timeout`.
    #[instrument(skip_all, fields(kind = %self.kind.as_str(), timeout_secs = timeout.as_secs()))]
    pub fn run(&self, timeout: Duration) -> HealthReport {
        let report = if timeout.is_zero() {
            HealthReport::crashed("no time left for a health check")
        } else {
            match self.kind {
                ProjectKind::Web => self.probe_browser(timeout),
                ProjectKind::Program => self.run_static_checks(timeout),
            }
        };
        let oversized = scan_oversized(self.root, self.config);
        let report = report.with_oversized(oversized);
        info!(
            status = %report.status(),
            details = %report.details(),
            errors = report.error_count,
            oversized = report.oversized_files.len(),
            "health check finished"
        );
        report
    }

    fn probe_browser(&self, timeout: Duration) -> HealthReport {
        let entry = entry_path(self.root, &self.config.entry_file);
        if !entry.is_file() {
            let missing = format!("entry file {} not found", self.config.entry_file);
            return self.report_from_probe(&ProbeResult {
                loaded: false,
                load_error: Some(missing),
                ..ProbeResult::default()
            });
        }
        if !self.browser.available() {
            info!("browser driver not available, falling back to static checks");
            return self.run_static_checks(timeout);
        }

        let request = ProbeRequest {
            entry,
            viewport: self.config.viewport.clone(),
            load_timeout_secs: self.config.load_timeout_secs,
            survival_secs: self.config.survival_secs,
            keys: self.config.keys.clone(),
            max_errors: self.config.max_console_errors,
        };
        match self.browser.render_and_probe(&request, timeout) {
            Ok(result) => self.report_from_probe(&result),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "browser probe crashed");
                HealthReport::crashed(&format!("{err:#}"))
            }
        }
    }

    /// Interpret raw probe measurements.
    fn report_from_probe(&self, result: &ProbeResult) -> HealthReport {
        let mut errors: Vec<String> = Vec::new();
        if let Some(load_error) = &result.load_error {
            errors.push(load_error.clone());
        }
        errors.extend(result.console_errors.iter().cloned());
        errors.truncate(self.config.max_console_errors);

        let signals = probe_signals(result, self.config);
        HealthReport::from_signals(
            signals,
            errors,
            self.config.reported_errors,
            result.load_error.clone().filter(|_| !result.loaded),
        )
    }

    fn run_static_checks(&self, timeout: Duration) -> HealthReport {
        let deadline = Instant::now() + timeout;
        let per_file = Duration::from_secs(self.config.static_check_timeout_secs);
        let mut failures = Vec::new();

        for path in source_files(self.root) {
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(template) = self.config.static_checks.get(ext) else {
                continue;
            };
            let Some(program) = template.first() else {
                continue;
            };
            if find_program(program).is_none() {
                debug!(program = %program, ext, "static checker not installed, skipping");
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("static checks ran out of time");
                failures.push("static checks ran out of time".to_string());
                break;
            }

            let rel = relative_path(self.root, &path);
            if let Some(failure) = self.check_file(template, &path, per_file.min(remaining)) {
                failures.push(format!("{rel}: {failure}"));
            }
        }

        HealthReport::from_static(failures, self.config.reported_errors)
    }

    /// One static check. Returns the failure message, if any.
    fn check_file(&self, template: &[String], path: &Path, timeout: Duration) -> Option<String> {
        let file = path.to_string_lossy();
        let argv = render_argv(template, &[("file", file.as_ref())]);
        let mut cmd = match command_from_argv(&argv) {
            Ok(cmd) => cmd,
            Err(err) => return Some(format!("{err:#}")),
        };
        cmd.current_dir(self.root);
        match run_command_with_timeout(cmd, None, timeout, STATIC_OUTPUT_LIMIT_BYTES) {
            Ok(output) if output.timed_out => Some(format!("check timed out after {timeout:?}")),
            Ok(output) if output.success() => None,
            Ok(output) => {
                let stderr = output.stderr_lossy();
                let stdout = output.stdout_lossy();
                let message = first_meaningful_line(&stderr)
                    .or_else(|| first_meaningful_line(&stdout))
                    .unwrap_or("check failed");
                Some(message.to_string())
            }
            Err(err) => Some(format!("{err:#}")),
        }
    }
}

/// Derive health signals from probe measurements.
pub fn probe_signals(result: &ProbeResult, config: &HealthConfig) -> HealthSignals {
    if !result.loaded {
        return HealthSignals {
            loads: false,
            renders: false,
            interactive: false,
            error_count: result.console_errors.len().min(config.max_console_errors),
            survival_secs: 0.0,
        };
    }
    let canvas_nonblank = result
        .canvas_nonblank_pixels
        .is_some_and(|pixels| pixels > config.canvas_nonblank_threshold);
    HealthSignals {
        loads: true,
        renders: result.visible_elements > 0 || canvas_nonblank,
        interactive: result.signature_before != result.signature_after,
        error_count: result.console_errors.len().min(config.max_console_errors),
        survival_secs: result.survival_secs,
    }
}

/// Source files whose line count exceeds the configured threshold.
pub fn scan_oversized(root: &Path, config: &HealthConfig) -> BTreeMap<String, usize> {
    let mut oversized = BTreeMap::new();
    for path in source_files(root) {
        let tracked = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| config.source_extensions.iter().any(|s| s == ext));
        if !tracked {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        let lines = count_lines(&bytes);
        if lines > config.oversized_file_lines {
            oversized.insert(relative_path(root, &path), lines);
        }
    }
    oversized
}

/// Regular files under `root`, skipping VCS, dependency and engine directories.
pub fn source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn count_lines(bytes: &[u8]) -> usize {
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    match bytes.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn first_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}
