//! Coding agent abstraction.
//!
//! The [`AgentClient`] trait decouples the cycle controller from the actual
//! agent backend (a CLI that talks to the agent gateway). Tests use scripted
//! agents that return predetermined text without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::confidence::extract_confidence;
use crate::io::process::{command_from_argv, render_argv, run_command_with_timeout};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Stable per run, so the agent keeps conversational memory.
    pub session_id: String,
    pub prompt: String,
    pub timeout: Duration,
    /// Working directory for the agent process (the project root).
    pub workdir: PathBuf,
}

/// Abstraction over coding agent backends.
pub trait AgentClient {
    /// Send the prompt and return the agent's free-form reply.
    ///
    /// Timeouts are reported as `Ok` with [`AgentReply::timed_out`] set.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply>;
}

/// Raw reply from an agent backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub timed_out: bool,
}

/// Agent reply after degradation and confidence extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    /// Empty when the call failed or timed out.
    pub text: String,
    pub timed_out: bool,
    pub failed: bool,
    pub confidence: Option<u8>,
}

impl AgentResponse {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Invoke the agent, degrading any failure to an empty response.
#[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
pub fn invoke_agent<A: AgentClient + ?Sized>(agent: &A, request: &AgentRequest) -> AgentResponse {
    if request.timeout.is_zero() {
        warn!("no budget left for agent call, skipping");
        return AgentResponse {
            text: String::new(),
            timed_out: true,
            failed: false,
            confidence: None,
        };
    }
    match agent.invoke(request) {
        Ok(reply) => {
            let text = if reply.timed_out {
                // Partial output from a killed agent is not trusted.
                String::new()
            } else {
                reply.text
            };
            let confidence = extract_confidence(&text);
            info!(
                response_len = text.len(),
                timed_out = reply.timed_out,
                confidence = ?confidence,
                "agent call finished"
            );
            AgentResponse {
                text,
                timed_out: reply.timed_out,
                failed: false,
                confidence,
            }
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "agent call failed");
            AgentResponse {
                text: String::new(),
                timed_out: false,
                failed: true,
                confidence: None,
            }
        }
    }
}

/// Agent that spawns a CLI with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }
}

impl AgentClient for CommandAgent {
    #[instrument(skip_all, fields(session_id = %request.session_id))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply> {
        let timeout_secs = request.timeout.as_secs().to_string();
        let argv = render_argv(
            &self.command,
            &[
                ("session_id", request.session_id.as_str()),
                ("timeout_secs", timeout_secs.as_str()),
            ],
        );
        let mut cmd = command_from_argv(&argv)?;
        cmd.current_dir(&request.workdir);
        debug!(program = %argv[0], prompt_len = request.prompt.len(), "starting agent");

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )?;

        if output.timed_out {
            return Ok(AgentReply {
                text: output.stdout_lossy(),
                timed_out: true,
            });
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            return Err(anyhow!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(AgentReply {
            text: output.stdout_lossy(),
            timed_out: false,
        })
    }
}
