//! Authentication for the hub.
//!
//! Rig agents present an opaque provisioning token, stored only as a SHA-256
//! digest. Dashboards and REST callers present a JWT access token.

pub mod claims;
pub mod jwt;
pub mod rig_token;

pub use claims::Claims;
pub use jwt::{AuthError, JwtManager};
pub use rig_token::{generate_rig_token, hash_token};
