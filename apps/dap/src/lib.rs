//! # DAP Library
//!
//! This library exposes the DAP application modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod api;
pub mod cli;
pub mod config;

// Re-export dap_core for convenience
pub use dap_core;
