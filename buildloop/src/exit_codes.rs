//! Stable exit codes for buildloop CLI commands.

/// The run finished and the final health check did not fail.
pub const OK: i32 = 0;
/// Invalid arguments, config or session, or a missing external service.
pub const INVALID: i32 = 1;
/// The run finished but the artifact's final health is `FAIL`.
pub const UNHEALTHY: i32 = 2;
