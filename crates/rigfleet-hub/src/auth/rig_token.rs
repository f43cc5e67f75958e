//! Agent provisioning tokens.

use sha2::{Digest, Sha256};

/// Hash a token for storage (raw tokens are never persisted).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mint a fresh agent token. Shown to the operator once, at provisioning.
pub fn generate_rig_token() -> String {
    format!(
        "rig_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
