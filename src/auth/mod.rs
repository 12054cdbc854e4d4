//! Caller identity validation performed before a channel is accepted.
//!
//! The gateway only depends on the [`Authenticator`] trait; the bundled
//! [`StaticTokenAuthenticator`] checks presented tokens against SHA-256
//! digests listed in the configuration file so plaintext tokens never sit
//! on disk.

use std::collections::HashMap;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::{AppError, Result};

/// Identity attached to an accepted channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User name the token belongs to.
    pub user: String,
}

/// Validates caller tokens and resolves them to an [`Identity`].
pub trait Authenticator: Send + Sync {
    /// Validate `token` and return the identity it belongs to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` when the token is empty, malformed,
    /// or unknown.
    fn validate_and_identify(&self, token: &str) -> Result<Identity>;
}

/// Authenticator backed by the `[[auth.tokens]]` configuration table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    users_by_digest: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    /// Build the lookup table from configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let users_by_digest = config
            .tokens
            .iter()
            .map(|entry| (entry.token_sha256.clone(), entry.user.clone()))
            .collect();
        Self { users_by_digest }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn validate_and_identify(&self, token: &str) -> Result<Identity> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized("missing token".into()));
        }
        if token.chars().any(char::is_control) {
            return Err(AppError::Unauthorized("malformed token".into()));
        }

        self.users_by_digest
            .get(&token_digest(token))
            .map(|user| Identity { user: user.clone() })
            .ok_or_else(|| AppError::Unauthorized("token rejected".into()))
    }
}

/// Lowercase hex SHA-256 digest of `token`, the form stored in config.
#[must_use]
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// Extract a bearer token from an `Authorization` header value.
///
/// Returns `None` when the scheme is not `Bearer` or the token is empty.
#[must_use]
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
