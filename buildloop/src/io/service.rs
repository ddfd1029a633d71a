//! Supervised background services (e.g. the model runtime).
//!
//! A [`SupervisedService`] owns its child process: readiness is a single
//! bounded wait and shutdown kills and reaps the child, also on drop.

use std::process::{Child, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::io::process::command_from_argv;

const READY_RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct SupervisedService {
    name: String,
    child: Option<Child>,
}

impl SupervisedService {
    /// Spawn `argv` with its output discarded.
    pub fn spawn(name: &str, argv: &[String]) -> Result<Self> {
        let mut cmd = command_from_argv(argv)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().with_context(|| format!("spawn service {name}"))?;
        info!(service = name, pid = child.id(), "service started");
        Ok(Self {
            name: name.to_string(),
            child: Some(child),
        })
    }

    /// Block until `probe` succeeds, the child exits, or `timeout` elapses.
    pub fn wait_ready<F: FnMut() -> bool>(&mut self, timeout: Duration, mut probe: F) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if probe() {
                debug!(service = %self.name, "service ready");
                return Ok(());
            }
            if let Some(child) = self.child.as_mut()
                && let Some(status) = child.try_wait().context("poll service")?
            {
                self.child = None;
                return Err(anyhow!("service {} exited early with {status}", self.name));
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "service {} not ready after {:?}",
                    self.name,
                    timeout
                ));
            }
            thread::sleep(READY_RETRY_INTERVAL);
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill and reap the child. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(err) = child.kill() {
            debug!(service = %self.name, err = %err, "kill failed (already exited?)");
        }
        match child.wait() {
            Ok(status) => info!(service = %self.name, %status, "service stopped"),
            Err(err) => warn!(service = %self.name, err = %err, "failed to reap service"),
        }
    }
}

impl Drop for SupervisedService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ready_probe_and_shutdown() {
        let mut service = SupervisedService::spawn("sleeper", &argv(&["sleep", "30"])).expect("spawn");
        let mut calls = 0;
        service
            .wait_ready(Duration::from_secs(5), || {
                calls += 1;
                calls >= 2
            })
            .expect("ready");
        assert!(service.is_running());
        service.shutdown();
        assert!(!service.is_running());
    }

    #[test]
    fn early_exit_is_reported() {
        let mut service = SupervisedService::spawn("quitter", &argv(&["true"])).expect("spawn");
        thread::sleep(Duration::from_millis(100));
        let err = service
            .wait_ready(Duration::from_secs(5), || false)
            .unwrap_err();
        assert!(err.to_string().contains("exited early"));
    }

    #[test]
    fn readiness_times_out() {
        let mut service = SupervisedService::spawn("sleeper", &argv(&["sleep", "30"])).expect("spawn");
        let err = service
            .wait_ready(Duration::from_millis(300), || false)
            .unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }
}
