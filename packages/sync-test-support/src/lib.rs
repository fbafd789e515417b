//! Shared helpers for the state-sync test suites.

pub mod logging;
