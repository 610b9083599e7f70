//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the preparation core:
//! - Logging and tracing infrastructure
//! - Configuration management (the context object handed to the pipeline)
//!
//! ## Overview
//!
//! Nothing in this workspace reads process-wide mutable state. A host builds
//! one [`CoreConfig`](config::CoreConfig) at startup, optionally calls
//! [`init_logging`](logging::init_logging), and passes the config by value to
//! the components that need it.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
