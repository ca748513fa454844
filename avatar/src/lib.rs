//! Unattended development-task agent.
//!
//! The agent polls a backend queue for tasks and drives each one through a
//! fixed pipeline: clone, branch, analyze, generate, write, test, commit, push.
//! Progress is checkpointed to the backend after every step. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, generated-file grammar,
//!   path safety, status transitions, step order). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, git, workspace, HTTP).
//!   Each sits behind a trait where tests need a double.
//!
//! Orchestration modules ([`pipeline`], [`poller`], [`agent`]) compose the
//! adapters into the task executor, the poll loop and the startup sequence.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod poller;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
