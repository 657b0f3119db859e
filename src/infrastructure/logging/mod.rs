//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, configured
//! once at process start and then accessed through the ordinary
//! `tracing` macros everywhere else in the crate.

pub mod config;
pub mod logger;
pub mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
pub use secret_scrubbing::SecretScrubbingLayer;
