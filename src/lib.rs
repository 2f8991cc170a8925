// src/lib.rs
// Library surface for the binary and integration tests.

pub mod config;
pub mod error;

// Stages, leaves first
pub mod catalog;
pub mod process;
pub mod provision;
pub mod benchmark;
pub mod transform;
pub mod assets;
pub mod publish;
pub mod rundown;
pub mod change_detector;

// Orchestration & ambient concerns
pub mod pipeline;
pub mod run_lock;
pub mod telemetry;

pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{Action, Pipeline};
