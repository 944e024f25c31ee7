//! Builders for principal tokens accepted by the control API.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

/// Signing secret the test server trusts for principal tokens.
pub const TEST_AUTH_JWT_SECRET: &str = "test-auth-secret-0123456789abcdef0123";

/// Builder for principal JWTs.
///
/// # Example
/// ```rust,ignore
/// let token = PrincipalTokenBuilder::new()
///     .for_principal("alice")
///     .expires_in(600)
///     .build();
/// ```
pub struct PrincipalTokenBuilder {
    sub: String,
    exp: i64,
    iat: i64,
    secret: String,
}

impl PrincipalTokenBuilder {
    /// Create a new builder: subject `test-user`, valid for one hour.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "test-user".to_string(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            secret: TEST_AUTH_JWT_SECRET.to_string(),
        }
    }

    /// Set the principal id (`sub`).
    pub fn for_principal(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for an expired token).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp.
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with a different secret (for rejection tests).
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    /// Sign the token with HS256.
    pub fn build(self) -> String {
        let claims = json!({
            "sub": self.sub,
            "exp": self.exp,
            "iat": self.iat,
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("HS256 signing of test claims should not fail")
    }
}

impl Default for PrincipalTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
