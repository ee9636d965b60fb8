//! Request authentication and role checks.
//!
//! Providers implement [`Authenticator`]. The server calls [`require`] on
//! every mutating route with the raw `Authorization` header and the role the
//! route needs.
//!
//! | Provider | Accepts |
//! |----------|---------|
//! | [`OpenAuth`] | Everything, with every role |
//! | [`ApiKeyAuth`] | `Basic base64(<key>:)` or the bare key, roles per key |

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use scene_catalog_core::{CatalogError, Result};

use crate::config::{AuthConfig, AuthMode};

/// Role names used by the HTTP routes.
pub mod roles {
    /// Index maintenance: drop, unharvest, sub-index management.
    pub const ADMIN: &str = "admin";
    /// Starting and cancelling harvests.
    pub const HARVEST: &str = "harvest";
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub subject: String,
    pub roles: Vec<String>,
}

pub trait Authenticator: Send + Sync {
    /// Resolve an `Authorization` header to a caller, or `None`.
    fn authenticate(&self, header: Option<&str>) -> Option<AuthToken>;

    fn authorize(&self, token: &AuthToken, role: &str) -> bool;
}

/// Authenticate and authorize in one step.
pub fn require(auth: &dyn Authenticator, header: Option<&str>, role: &str) -> Result<AuthToken> {
    let token = auth
        .authenticate(header)
        .ok_or_else(|| CatalogError::unauthenticated("missing or unknown credentials"))?;
    if !auth.authorize(&token, role) {
        return Err(CatalogError::unauthorized(format!(
            "{} lacks role {}",
            token.subject, role
        )));
    }
    Ok(token)
}

pub struct OpenAuth;

impl Authenticator for OpenAuth {
    fn authenticate(&self, _header: Option<&str>) -> Option<AuthToken> {
        Some(AuthToken {
            subject: "anonymous".to_string(),
            roles: Vec::new(),
        })
    }

    fn authorize(&self, _token: &AuthToken, _role: &str) -> bool {
        true
    }
}

/// Static API keys from `[[auth.keys]]`.
pub struct ApiKeyAuth {
    keys: HashMap<String, Vec<String>>,
}

impl ApiKeyAuth {
    pub fn new(keys: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// The key carried by a header: the username of a Basic credential, or
    /// the header value itself.
    fn extract_key(header: &str) -> Option<String> {
        let header = header.trim();
        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let text = String::from_utf8(decoded).ok()?;
            let user = text.split_once(':').map(|(u, _)| u).unwrap_or(&text);
            return Some(user.to_string());
        }
        Some(header.to_string())
    }
}

impl Authenticator for ApiKeyAuth {
    fn authenticate(&self, header: Option<&str>) -> Option<AuthToken> {
        let key = Self::extract_key(header?)?;
        let roles = self.keys.get(&key)?;
        Some(AuthToken {
            subject: format!("key:{}", key.chars().take(4).collect::<String>()),
            roles: roles.clone(),
        })
    }

    fn authorize(&self, token: &AuthToken, role: &str) -> bool {
        token.roles.iter().any(|r| r == role)
    }
}

/// Build the provider selected by `[auth] mode`.
pub fn from_config(config: &AuthConfig) -> Box<dyn Authenticator> {
    match config.mode {
        AuthMode::Open => Box::new(OpenAuth),
        AuthMode::ApiKeys => Box::new(ApiKeyAuth::new(
            config
                .keys
                .iter()
                .map(|k| (k.key.clone(), k.roles.clone())),
        )),
    }
}

/// `Basic` header value carrying `key` as username and an empty password.
pub fn basic_header(key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:", key)))
}
