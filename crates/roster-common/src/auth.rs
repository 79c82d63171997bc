//! Optional bearer-token authentication.
//!
//! The token is an opaque shared secret carried in-band on every request.
//! Validation uses constant-time comparison so a peer cannot probe the
//! token byte-by-byte through timing.

use std::fmt;

/// Per-server authentication configuration.
///
/// # Example
///
/// ```
/// use roster_common::auth::AuthConfig;
///
/// let auth = AuthConfig::with_token("shared-secret");
/// assert!(auth.requires_auth());
/// assert!(auth.validate_token(Some("shared-secret")));
/// assert!(!auth.validate_token(None));
///
/// let open = AuthConfig::disabled();
/// assert!(open.validate_token(None));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    token: Option<String>,
}

impl AuthConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { token: None }
    }

    pub fn requires_auth(&self) -> bool {
        self.token.is_some()
    }

    /// Validates a presented token. Always true when auth is disabled;
    /// a missing token fails when auth is required.
    pub fn validate_token(&self, presented: Option<&str>) -> bool {
        match (&self.token, presented) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(presented)) => constant_time_eq(expected, presented),
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(_) => write!(f, "Token(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Constant-time string comparison: iterates both strings fully regardless
/// of where the first difference occurs.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        let auth = AuthConfig::with_token("secret");
        assert!(auth.requires_auth());
        assert!(auth.validate_token(Some("secret")));
        assert!(!auth.validate_token(Some("wrong")));
        assert!(!auth.validate_token(None));
    }

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = AuthConfig::disabled();
        assert!(!auth.requires_auth());
        assert!(auth.validate_token(None));
        assert!(auth.validate_token(Some("whatever")));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same", "same"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("aaaa", "aaab"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_display_masks_token() {
        assert_eq!(AuthConfig::with_token("secret").to_string(), "Token(*****)");
        assert_eq!(AuthConfig::disabled().to_string(), "Disabled");
    }
}
