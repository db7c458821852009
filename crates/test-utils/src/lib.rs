//! Shared fixtures for procworker's integration tests: config builders and a
//! scripted worker.

pub mod builders;
pub mod scripted;
