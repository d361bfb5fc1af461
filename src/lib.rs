//! json-exec library
//!
//! Runs a command and reports it as JSON log records. This module exports
//! the core components for testing and integration.

pub mod build_info;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
