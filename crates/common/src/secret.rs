//! Secret types for signing keys and service credentials.
//!
//! Re-exports [`secrecy`] so that every crate in the workspace wraps
//! sensitive configuration the same way. `SecretString` redacts itself in
//! `Debug`, so a config struct holding the capability signing key can derive
//! or hand-write `Debug` without leaking it into logs.
//!
//! Use `SecretString` for:
//! - the capability signing key (`STREAMING_SECRET_KEY`)
//! - the principal token secret (`AUTH_JWT_SECRET`)
//! - the directory service key (`DIRECTORY_SERVICE_KEY`)
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let key = SecretString::from("0123456789abcdef0123456789abcdef");
//! assert!(!format!("{key:?}").contains("0123"));
//! assert_eq!(key.expose_secret().len(), 32);
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("streaming-signing-key");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("streaming-signing-key"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("service-role-key");
        assert_eq!(secret.expose_secret(), "service-role-key");
    }

    #[test]
    fn test_deserialized_secret_is_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct DirectoryCredentials {
            url: String,
            service_key: SecretString,
        }

        let json = r#"{"url": "https://directory.example", "service_key": "svc-key"}"#;
        let creds: DirectoryCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.service_key.expose_secret(), "svc-key");

        let debug = format!("{creds:?}");
        assert!(debug.contains("https://directory.example"));
        assert!(!debug.contains("svc-key"));
    }
}
