//! Autonomous build-and-improve loop.
//!
//! Given a project description, the engine repeatedly asks a coding agent to
//! work on the project, checks whether the result actually works, and picks
//! the next action from the observed health and the project's maturity, until
//! a wall-clock budget runs out. The code is split the same way throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (status derivation, phase
//!   selection, confidence extraction, budget math). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, session file, git,
//!   subprocesses, agent, browser driver, model runtime, prompts).
//!
//! Orchestration modules ([`health`], [`vision_gate`], [`checkpoint`],
//! [`cycle`], [`start`]) combine the two and back the CLI commands.

pub mod checkpoint;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod health;
pub mod io;
pub mod logging;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vision_gate;
