use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Registered clients
// ---------------------------------------------------------------------------

/// A pre-provisioned relying party. The secret is only kept as a SHA-256
/// hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    pub display_name: String,
    pub redirect_uri: String,
    pub secret_sha256: String,
    pub registered_at: DateTime<Utc>,
}

/// Input for seeding or registering a client, with the plaintext secret.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub display_name: String,
    pub redirect_uri: String,
    pub secret: String,
}

impl ClientRegistration {
    /// The demo relying party every fresh deployment knows about.
    pub fn demo() -> Self {
        Self {
            client_id: "myClient".into(),
            display_name: "My client application".into(),
            redirect_uri: "http://localhost:53507/oidc".into(),
            secret: "secret_secret_secret".into(),
        }
    }
}

/// Outcome of an idempotent seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeded {
    Inserted,
    AlreadyPresent,
}

// ---------------------------------------------------------------------------
// Authorization request (query or form)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
}

// ---------------------------------------------------------------------------
// Token endpoint (application/x-www-form-urlencoded)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Claims of the RS256 `id_token`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Keys under which an authorization code ticket records its bindings.
pub mod code_properties {
    pub const CODE_ID: &str = "code_id";
    pub const CLIENT_ID: &str = "client_id";
    pub const REDIRECT_URI: &str = "redirect_uri";
    /// Present when the authorization request named its redirect URI, which
    /// makes it mandatory at the token endpoint.
    pub const REDIRECT_URI_EXPLICIT: &str = "redirect_uri_explicit";
    pub const SCOPE: &str = "scope";
    pub const NONCE: &str = "nonce";
}
