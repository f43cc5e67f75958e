//! `RigFleet` Core Library
//!
//! Shared functionality for `RigFleet` components:
//! - Telemetry model for rig hardware snapshots
//! - Agent and dashboard wire protocol frames
//! - Configuration resolution and hierarchy
//! - Storage helpers and common error types

pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod telemetry;
pub mod tracing_init;

pub use config::HubConfig;
pub use error::{Error, Result};
pub use telemetry::{RigStatus, TelemetrySnapshot};
