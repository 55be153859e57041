//! # stratum-build
//!
//! The layer build planner and the engine that executes its plans.
//!
//! Handles:
//! - **Context**: Resolving build arguments from defaults and overrides.
//! - **Planner**: Selecting branches, substituting arguments, and chaining
//!   cache keys so identical prefixes share layers.
//! - **Executor**: The seam through which `RUN` commands are executed.
//! - **Engine**: Running a plan against the layer store, replaying cache
//!   hits and recording new layers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod context;
pub mod engine;
pub mod executor;
pub mod planner;

pub use context::BuildContext;
pub use engine::{BuildOutput, BuildRequest, BuiltLayer, Engine, LayerStatus};
pub use executor::{HostExecutor, RunOutput, RunRequest, StepExecutor};
pub use planner::{Plan, PlannedStep, Planner};
