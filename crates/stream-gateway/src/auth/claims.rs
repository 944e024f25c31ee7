//! JWT claim sets used by the gateway.
//!
//! Both structures carry a principal identifier in `sub`, which is redacted in
//! Debug output to keep it out of logs.

use common::types::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims carried by a stream capability.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Session the capability grants access to.
    pub sid: SessionId,

    /// Owning principal - redacted in Debug output.
    pub sub: String,

    /// Resource (camera) the session converts.
    pub res: String,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for CapabilityClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityClaims")
            .field("sid", &self.sid)
            .field("sub", &"[REDACTED]")
            .field("res", &self.res)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Claims carried by a principal token on the control API.
///
/// Unknown claims (`role`, `email`, `aud`, ...) are ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrincipalClaims {
    /// Principal id - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for PrincipalClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}
