//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod grammar;
pub mod path;
pub mod pipeline;
pub mod transition;
pub mod types;
