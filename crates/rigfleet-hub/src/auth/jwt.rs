//! JWT token issuance and validation.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use rigfleet_core::db::unix_timestamp;

use super::claims::{AUDIENCE, Claims};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Manages JWT token creation and validation.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl_secs: i64,
}

impl JwtManager {
    /// Create a new `JwtManager` with the given secret.
    pub fn new(secret: &[u8], access_ttl_secs: i64) -> Self {
        let mut validation = Validation::default();
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl_secs,
        }
    }

    /// Issue an access token for the given operator. Returns the token and its TTL.
    pub fn issue_access_token(&self, user_id: &str) -> Result<(String, i64), AuthError> {
        let claims = Claims::operator(user_id, unix_timestamp(), self.access_ttl_secs);
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, self.access_ttl_secs))
    }

    /// Check signature, expiry and audience of an operator token.
    pub fn validate_access(&self, token: &str) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_jwt() -> JwtManager {
        JwtManager::new(b"test-secret-key-for-testing", 3600)
    }

    #[test]
    fn issue_and_validate_access_token() {
        let jwt = test_jwt();
        let (token, ttl) = jwt.issue_access_token("operator-1").unwrap();
        assert_eq!(ttl, 3600);

        let claims = jwt.validate_access(&token).unwrap();
        assert_eq!(claims.sub, "operator-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn invalid_token_fails_validation() {
        let jwt = test_jwt();
        assert!(matches!(
            jwt.validate_access("not-a-valid-token"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn wrong_secret_fails_validation() {
        let jwt1 = test_jwt();
        let jwt2 = JwtManager::new(b"different-secret", 3600);

        let (token, _) = jwt1.issue_access_token("operator-1").unwrap();
        assert!(jwt2.validate_access(&token).is_err());
    }

    #[test]
    fn token_for_another_audience_is_rejected() {
        let jwt = test_jwt();
        let mut claims = Claims::operator("operator-1", unix_timestamp(), 60);
        claims.aud = "some-other-service".into();
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &jwt.encoding_key).unwrap();
        assert!(matches!(
            jwt.validate_access(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = test_jwt();
        let claims = Claims::operator("operator-1", unix_timestamp() - 3_600, 60);
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &jwt.encoding_key).unwrap();
        assert!(jwt.validate_access(&token).is_err());
    }
}
