//! Claims carried by dashboard and REST access tokens.

use serde::{Deserialize, Serialize};

/// Audience every hub token is minted for and checked against.
pub const AUDIENCE: &str = "rigfleet-hub";

/// What a token lets its holder do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Watch the fleet and send commands to rigs.
    Operator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Unique per token, logged with every command it authorizes.
    pub jti: String,
    /// Operator user ID.
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: TokenScope,
}

impl Claims {
    /// Claims for an operator token valid for `ttl_secs` from `issued_at`.
    pub fn operator(user_id: &str, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: user_id.to_string(),
            aud: AUDIENCE.to_string(),
            iat: issued_at,
            exp: issued_at + ttl_secs,
            scope: TokenScope::Operator,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.sub
    }
}
