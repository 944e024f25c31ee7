//! JWT utilities shared by the stream gateway crates.
//!
//! Both token families handled by the gateway are compact HS256 JWTs:
//!
//! - principal tokens presented by callers of the control API
//! - stream capabilities minted by the gateway itself
//!
//! This module holds the checks that apply to both before and after
//! signature verification:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - iat and exp validation against an explicit clock
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Every error variant renders the same message, so callers cannot
//!   distinguish an oversized token from an expired one
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{check_token_size, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! check_token_size(token)?;
//! // ... verify signature, decode claims ...
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Capabilities travel in query strings and are typically ~300 bytes.
/// Anything larger than this is rejected before base64 decoding or HMAC
/// computation.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with an `iat` more than this far in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Minimum length of an HMAC-SHA256 signing secret in bytes.
pub const MIN_HMAC_SECRET_BYTES: usize = 32;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Error messages are intentionally identical. Details are logged at debug
/// level where the error is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a three-part compact JWS.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Token `exp` claim is at or before the current instant.
    #[error("The access token is invalid or expired")]
    Expired,
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens that are too large or not shaped like `header.payload.sig`.
///
/// Does not decode anything; this is the cheap gate in front of
/// `jsonwebtoken::decode`.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if the token does not have exactly three non-empty parts
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let parts = token.split('.').collect::<Vec<_>>();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds)
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Deterministic `exp` validation with zero leeway.
///
/// A token is valid strictly before its `exp` second.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` if `now >= exp`.
pub fn validate_exp_at(exp: i64, now: i64) -> Result<(), JwtValidationError> {
    if now >= exp {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_default_clock_skew_is_5_minutes() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(300));
    }

    #[test]
    fn test_max_clock_skew_is_10_minutes() {
        assert_eq!(MAX_CLOCK_SKEW, Duration::from_secs(600));
    }

    // -------------------------------------------------------------------------
    // check_token_size
    // -------------------------------------------------------------------------

    #[test]
    fn test_check_token_size_accepts_three_parts() {
        assert!(check_token_size("aaa.bbb.ccc").is_ok());
    }

    #[test]
    fn test_check_token_size_rejects_wrong_part_count() {
        for token in ["", "single", "only.two", "a.b.c.d"] {
            assert_eq!(
                check_token_size(token),
                Err(JwtValidationError::MalformedToken),
                "token {token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_check_token_size_rejects_empty_parts() {
        assert_eq!(
            check_token_size(".payload.sig"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            check_token_size("header..sig"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_check_token_size_oversized() {
        let token = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES));
        assert_eq!(
            check_token_size(&token),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_check_token_size_at_limit() {
        let token = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES - 4));
        assert_eq!(token.len(), MAX_JWT_SIZE_BYTES);
        assert!(check_token_size(&token).is_ok());
    }

    // -------------------------------------------------------------------------
    // validate_iat
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_iat_current_time() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_past_time() {
        let past = chrono::Utc::now().timestamp() - 3600;
        assert!(validate_iat(past, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_far_future() {
        let far_future = chrono::Utc::now().timestamp() + 86400;
        assert!(matches!(
            validate_iat(far_future, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    // -------------------------------------------------------------------------
    // validate_exp_at
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_exp_at_boundaries() {
        let exp = 1_700_003_600_i64;

        assert!(validate_exp_at(exp, exp - 1).is_ok());
        assert_eq!(validate_exp_at(exp, exp), Err(JwtValidationError::Expired));
        assert_eq!(
            validate_exp_at(exp, exp + 1),
            Err(JwtValidationError::Expired)
        );
    }

    #[test]
    fn test_all_errors_render_identically() {
        let messages = [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::MalformedToken,
            JwtValidationError::IatTooFarInFuture,
            JwtValidationError::Expired,
        ]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

        assert!(messages.windows(2).all(|w| w[0] == w[1]));
    }
}
