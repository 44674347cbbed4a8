// Authentication types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store key holding the current access token
pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";

/// Store key holding the current refresh token
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

/// Access/refresh token pair issued by login or refresh
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &token_preview(&self.access_token))
            .field("refresh_token", &token_preview(&self.refresh_token))
            .finish()
    }
}

const PREVIEW_CHARS: usize = 8;

/// First few characters of a token, safe for logs.
/// The ellipsis marks a truncated token only.
pub fn token_preview(token: &str) -> String {
    let mut chars = token.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Refresh endpoint request body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Login endpoint request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Token payload returned by both login and refresh
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}
