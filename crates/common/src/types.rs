//! Common data types for the stream gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of an identifier used as a path segment.
pub const MAX_PATH_ID_LENGTH: usize = 128;

/// Unique identifier for a conversion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Returns true if `value` can be used verbatim as a single path segment.
///
/// Accepts 1..=128 ASCII alphanumerics, `-` and `_`. Anything else (dots,
/// slashes, percent signs, unicode) is rejected so that a principal or
/// resource id can never walk out of its output directory.
#[must_use]
pub fn is_path_safe_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_PATH_ID_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_display_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_path_safe_ids() {
        assert!(is_path_safe_id("camera-01"));
        assert!(is_path_safe_id("9b2e6a4c_user"));
        assert!(is_path_safe_id(&"a".repeat(MAX_PATH_ID_LENGTH)));

        assert!(!is_path_safe_id(""));
        assert!(!is_path_safe_id(".."));
        assert!(!is_path_safe_id("a/b"));
        assert!(!is_path_safe_id("a%2fb"));
        assert!(!is_path_safe_id("câmera"));
        assert!(!is_path_safe_id(&"a".repeat(MAX_PATH_ID_LENGTH + 1)));
    }
}
