//! Principal token validation for the control API.
//!
//! Callers of the conversion and stop endpoints present an HS256 bearer JWT
//! issued by the identity provider. The `sub` claim becomes the principal id
//! and is used as a path component, so it must be path-safe.

use crate::auth::claims::PrincipalClaims;
use crate::errors::GatewayError;
use common::jwt::{check_token_size, validate_iat};
use common::secret::{ExposeSecret, SecretString};
use common::types::is_path_safe_id;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::fmt;
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN: &str = "The access token is invalid or expired";

/// An authenticated caller of the control API.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &"[REDACTED]")
            .finish()
    }
}

/// Validates principal bearer tokens.
pub struct PrincipalValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl PrincipalValidator {
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        // Identity provider tokens carry an `aud` we do not pin
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew,
        }
    }

    /// Validate a bearer token and return the principal.
    ///
    /// # Security Checks
    ///
    /// 1. Size check - reject tokens > 8KB before parsing
    /// 2. Verify HS256 signature
    /// 3. Validate exp claim
    /// 4. Validate iat claim with clock skew tolerance
    /// 5. Require a path-safe `sub`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthorized` with a generic message for every
    /// failure.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<Principal, GatewayError> {
        check_token_size(token).map_err(|e| {
            tracing::debug!(target: "sg.auth.principal", error = ?e, "Token rejected before parsing");
            GatewayError::Unauthorized(INVALID_TOKEN.to_string())
        })?;

        let claims = decode::<PrincipalClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(target: "sg.auth.principal", error = %e, "Token verification failed");
                GatewayError::Unauthorized(INVALID_TOKEN.to_string())
            })?
            .claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "sg.auth.principal", error = ?e, "Token iat validation failed");
            return Err(GatewayError::Unauthorized(INVALID_TOKEN.to_string()));
        }

        if !is_path_safe_id(&claims.sub) {
            tracing::debug!(target: "sg.auth.principal", "Token subject is not path-safe");
            return Err(GatewayError::Unauthorized(INVALID_TOKEN.to_string()));
        }

        tracing::debug!(target: "sg.auth.principal", "Token validated successfully");
        Ok(Principal { id: claims.sub })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::jwt::DEFAULT_CLOCK_SKEW;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "principal-secret-principal-secret";

    fn validator() -> PrincipalValidator {
        PrincipalValidator::new(&SecretString::from(SECRET), DEFAULT_CLOCK_SKEW)
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({"sub": "user-1", "iat": now, "exp": now + 600, "aud": "authenticated"}),
            SECRET,
        );

        let principal = validator().validate(&token).unwrap();
        assert_eq!(principal.id, "user-1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({"sub": "user-1", "iat": now - 7200, "exp": now - 3600}),
            SECRET,
        );

        assert!(matches!(
            validator().validate(&token),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({"sub": "user-1", "iat": now, "exp": now + 600}),
            "some-other-secret-some-other-secret",
        );

        assert!(matches!(
            validator().validate(&token),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_future_iat_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(
            &json!({"sub": "user-1", "iat": now + 3600, "exp": now + 7200}),
            SECRET,
        );

        assert!(matches!(
            validator().validate(&token),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_unsafe_subject_rejected() {
        let now = Utc::now().timestamp();
        for sub in ["../etc", "a/b", ""] {
            let token = sign(&json!({"sub": sub, "iat": now, "exp": now + 600}), SECRET);
            assert!(
                matches!(
                    validator().validate(&token),
                    Err(GatewayError::Unauthorized(_))
                ),
                "sub {sub:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_claims_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(&json!({"sub": "user-1", "exp": now + 600}), SECRET);

        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_principal_debug_redacts_id() {
        let principal = Principal {
            id: "user-secret".to_string(),
        };
        assert!(!format!("{principal:?}").contains("user-secret"));
    }
}
