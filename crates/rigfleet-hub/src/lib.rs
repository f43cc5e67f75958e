//! RigFleet Hub Library
//!
//! Core functionality for the hub:
//! - SQLite storage for provisioned rigs and their last telemetry
//! - Rig token and dashboard JWT authentication
//! - Connection registry, liveness monitor and command dispatch
//! - Agent and dashboard sessions over WebSocket, plus a REST surface

pub mod auth;
pub mod dashboard;
pub mod dispatch;
pub mod events;
pub mod hub;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod telemetry;
