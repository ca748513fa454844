//! Side-effecting adapters: processes, git, filesystem, HTTP.

pub mod backend;
pub mod codegen;
pub mod completion;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod status;
pub mod task_log;
pub mod test_command;
pub mod workspace;
