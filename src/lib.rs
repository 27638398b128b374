// src/lib.rs

//! gptbuilder
//!
//! Turns a plain-language requirement into code, runs it locally or in a
//! container, deploys it to a timestamped directory (or a git repository)
//! and health-checks the result.
//!
//! Each stage is usable on its own:
//! - `generator`: prompt building over a chat-completion backend
//! - `executor`: time-bounded execution with a uniform result shape
//! - `deployer`: filesystem and git deployments
//! - `monitor`: health checks, log analysis and reports
//!
//! `engine` chains them into the autonomous pipeline used by `auto`.

pub mod cli;
pub mod config;
pub mod deployer;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod language;
pub mod logging;
pub mod monitor;
pub mod run_id;
pub mod runner;
pub mod sinks;
pub mod util;
