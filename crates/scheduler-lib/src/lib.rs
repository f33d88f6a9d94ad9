//! Tarema placement library
//!
//! This crate provides the core functionality for:
//! - Node speed estimation from task runtimes
//! - Node and task labelling
//! - Label-aware task placement
//! - Health checks and observability

pub mod clustering;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod export;
pub mod health;
pub mod labels;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod placement;
pub mod store;
pub mod trace;

pub use config::TaremaConfig;
pub use engine::{EngineStatus, Tarema, TerminationOutcome};
pub use error::{EstimatorError, Result, TaremaError, TraceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use labels::{NodeLabels, TaskLabels};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
pub use placement::{Alignment, PlacementMode, SchedulingPlan};
