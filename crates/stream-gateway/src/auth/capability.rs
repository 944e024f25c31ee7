//! Stream capability issuance and verification.
//!
//! A capability is an HS256 JWT asserting `{session, owner, resource}` plus an
//! absolute expiry. It is minted once when a session becomes active and is
//! never stored server-side; expiry is the only revocation mechanism.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only HS256 is accepted; `alg: none` and asymmetric headers are rejected
//! - Validity is `now < exp` with zero leeway
//! - Every failure collapses to [`CapabilityError::Invalid`]

use crate::auth::claims::CapabilityClaims;
use chrono::{DateTime, Utc};
use common::jwt::{check_token_size, validate_exp_at, validate_iat_at};
use common::secret::{ExposeSecret, SecretString};
use common::types::SessionId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The tuple a capability is bound to.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityScope {
    pub session_id: SessionId,
    pub owner: String,
    pub resource: String,
}

impl fmt::Debug for CapabilityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityScope")
            .field("session_id", &self.session_id)
            .field("owner", &"[REDACTED]")
            .field("resource", &self.resource)
            .finish()
    }
}

/// A freshly minted capability.
#[derive(Clone)]
pub struct IssuedCapability {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCapability")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Expired, malformed, oversized, tampered or signed with another key.
    #[error("The stream capability is invalid or expired")]
    Invalid,

    #[error("Failed to sign stream capability: {0}")]
    Signing(String),
}

/// Issues and verifies stream capabilities with a process-local symmetric key.
pub struct CapabilityService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl CapabilityService {
    /// Create a service signing with `secret`.
    ///
    /// `clock_skew` bounds how far in the future an `iat` may lie.
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        // exp and iat are checked against an explicit clock in verify_at
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation,
            clock_skew,
        }
    }

    /// Mint a capability for `scope` valid for `ttl` from now.
    pub fn issue(
        &self,
        scope: &CapabilityScope,
        ttl: Duration,
    ) -> Result<IssuedCapability, CapabilityError> {
        self.issue_at(scope, ttl, Utc::now().timestamp())
    }

    /// Mint a capability as if the current time were `now` (Unix seconds).
    pub fn issue_at(
        &self,
        scope: &CapabilityScope,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedCapability, CapabilityError> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| CapabilityError::Signing("ttl out of range".to_string()))?;
        let exp = now
            .checked_add(ttl_secs)
            .ok_or_else(|| CapabilityError::Signing("expiry out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| CapabilityError::Signing("expiry out of range".to_string()))?;

        let claims = CapabilityClaims {
            sid: scope.session_id,
            sub: scope.owner.clone(),
            res: scope.resource.clone(),
            iat: now,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CapabilityError::Signing(e.to_string()))?;

        Ok(IssuedCapability { token, expires_at })
    }

    /// Verify `token` against the current time.
    pub fn verify(&self, token: &str) -> Result<CapabilityScope, CapabilityError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify `token` as if the current time were `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Invalid`] for every failure.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<CapabilityScope, CapabilityError> {
        check_token_size(token).map_err(|_| CapabilityError::Invalid)?;

        let claims = decode::<CapabilityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(target: "sg.auth.capability", error = %e, "Capability verification failed");
                CapabilityError::Invalid
            })?
            .claims;

        validate_exp_at(claims.exp, now).map_err(|_| CapabilityError::Invalid)?;
        validate_iat_at(claims.iat, self.clock_skew, now).map_err(|_| CapabilityError::Invalid)?;

        Ok(CapabilityScope {
            session_id: claims.sid,
            owner: claims.sub,
            resource: claims.res,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_JWT_SIZE_BYTES};

    const T0: i64 = 1_700_000_000;
    const HOUR: Duration = Duration::from_secs(3600);

    fn service(secret: &str) -> CapabilityService {
        CapabilityService::new(&SecretString::from(secret), DEFAULT_CLOCK_SKEW)
    }

    fn scope() -> CapabilityScope {
        CapabilityScope {
            session_id: SessionId::new(),
            owner: "user-1".to_string(),
            resource: "camera-1".to_string(),
        }
    }

    #[test]
    fn test_issue_then_verify_returns_tuple() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let scope = scope();

        let issued = svc.issue_at(&scope, HOUR, T0).unwrap();
        assert_eq!(issued.expires_at.timestamp(), T0 + 3600);

        let verified = svc.verify_at(&issued.token, T0 + 1).unwrap();
        assert_eq!(verified, scope);
    }

    #[test]
    fn test_expiry_boundaries() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let issued = svc.issue_at(&scope(), HOUR, T0).unwrap();

        assert!(svc.verify_at(&issued.token, T0 + 3599).is_ok());
        assert_eq!(
            svc.verify_at(&issued.token, T0 + 3600),
            Err(CapabilityError::Invalid)
        );
        assert_eq!(
            svc.verify_at(&issued.token, T0 + 3601),
            Err(CapabilityError::Invalid)
        );
    }

    #[test]
    fn test_wrong_key_is_invalid() {
        let issuer = service("0123456789abcdef0123456789abcdef");
        let verifier = service("fedcba9876543210fedcba9876543210");

        let issued = issuer.issue_at(&scope(), HOUR, T0).unwrap();
        assert_eq!(
            verifier.verify_at(&issued.token, T0 + 1),
            Err(CapabilityError::Invalid)
        );
    }

    #[test]
    fn test_tampered_payload_is_invalid() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let mine = svc.issue_at(&scope(), HOUR, T0).unwrap().token;
        let other = svc.issue_at(&scope(), HOUR, T0).unwrap().token;

        // Splice another capability's payload under this one's signature
        let mine_parts: Vec<&str> = mine.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", mine_parts[0], other_parts[1], mine_parts[2]);

        assert_eq!(svc.verify_at(&forged, T0 + 1), Err(CapabilityError::Invalid));
    }

    #[test]
    fn test_alg_none_is_invalid() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let token = svc.issue_at(&scope(), HOUR, T0).unwrap().token;
        let payload = token.split('.').nth(1).unwrap();

        // {"alg":"none","typ":"JWT"}
        let forged = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{payload}.x");
        assert_eq!(svc.verify_at(&forged, T0 + 1), Err(CapabilityError::Invalid));
    }

    #[test]
    fn test_malformed_and_oversized_are_invalid() {
        let svc = service("0123456789abcdef0123456789abcdef");

        for token in ["", "garbage", "a.b", "a.b.c"] {
            assert_eq!(svc.verify_at(token, T0), Err(CapabilityError::Invalid));
        }

        let oversized = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES));
        assert_eq!(svc.verify_at(&oversized, T0), Err(CapabilityError::Invalid));
    }

    #[test]
    fn test_future_iat_beyond_skew_is_invalid() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let issued = svc.issue_at(&scope(), HOUR, T0 + 3000).unwrap();

        assert_eq!(
            svc.verify_at(&issued.token, T0),
            Err(CapabilityError::Invalid)
        );
    }

    #[test]
    fn test_issue_uses_wall_clock() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let scope = scope();
        let before = Utc::now().timestamp();

        let issued = svc.issue(&scope, HOUR).unwrap();

        assert!(issued.expires_at.timestamp() >= before + 3600);
        assert_eq!(svc.verify(&issued.token).unwrap(), scope);
    }

    #[test]
    fn test_debug_redacts_owner_and_token() {
        let svc = service("0123456789abcdef0123456789abcdef");
        let scope = scope();
        let issued = svc.issue_at(&scope, HOUR, T0).unwrap();

        assert!(!format!("{scope:?}").contains("user-1"));
        assert!(!format!("{issued:?}").contains(&issued.token));
    }
}
