//! `SQLite` storage for the `RigFleet` hub.
//!
//! Persists provisioned rigs: identity, hashed agent token, last status and
//! the most recent telemetry snapshot.

mod db;
mod models;
mod queries;

#[cfg(test)]
mod tests;

pub use db::HubDatabase;
pub use models::Rig;
pub use rigfleet_core::db::DatabaseError;
