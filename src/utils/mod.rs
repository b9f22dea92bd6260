//! Shared helpers for binaries and connection management.

pub mod bootstrap;
pub mod retry;
