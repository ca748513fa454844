//! Stable exit codes for avatar CLI commands.

/// Command succeeded, or the poll loop stopped cleanly.
pub const OK: i32 = 0;
/// Invalid configuration, workspace, or any other error.
pub const INVALID: i32 = 1;
/// `avatar run` could not reach the backend health endpoint.
pub const BACKEND_UNAVAILABLE: i32 = 2;
/// `avatar run` could not resolve the queue topic.
pub const SUBSCRIPTION_FAILED: i32 = 3;
/// `avatar exec` finished with the task reported `failed`.
pub const TASK_FAILED: i32 = 4;
