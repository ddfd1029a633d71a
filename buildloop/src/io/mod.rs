//! I/O adapters for the build loop.

pub mod agent;
pub mod browser;
pub mod config;
pub mod cycle_log;
pub mod git;
pub mod models;
pub mod process;
pub mod prompt;
pub mod service;
pub mod session;
