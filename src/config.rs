use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::credentials::EMBEDDED_KEY_PASSPHRASE;
use crate::error::ConfigurationError;
use crate::oauth::types::ClientRegistration;

#[derive(Parser, Debug, Clone)]
#[command(name = "oidc-gate")]
#[command(about = "OpenID Connect authorization server with bearer and cookie authentication")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "OIDC_GATE_BIND", default_value = "127.0.0.1:54540")]
    pub bind: SocketAddr,

    /// Issuer URL advertised in tokens and discovery metadata
    #[arg(long, env = "OIDC_GATE_ISSUER", default_value = "http://localhost:54540/")]
    pub issuer: String,

    /// Directory for clients.json (in-memory store when omitted)
    #[arg(long, env = "OIDC_GATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Encrypted PKCS#8 PEM RSA key (embedded demo key when omitted)
    #[arg(long, env = "OIDC_GATE_SIGNING_KEY")]
    pub signing_key: Option<PathBuf>,

    /// Passphrase for --signing-key; empty for an unencrypted key
    #[arg(long, env = "OIDC_GATE_SIGNING_KEY_PASSPHRASE", hide_env_values = true)]
    pub signing_key_passphrase: Option<String>,

    /// Include error_description in OAuth error responses
    #[arg(long, env = "OIDC_GATE_DISPLAY_ERRORS")]
    pub display_errors: bool,

    #[arg(long, env = "OIDC_GATE_SESSION_LIFETIME_SECS", default_value_t = 300)]
    pub session_lifetime_secs: u64,

    #[arg(long, env = "OIDC_GATE_CODE_LIFETIME_SECS", default_value_t = 300)]
    pub code_lifetime_secs: u64,

    #[arg(long, env = "OIDC_GATE_ACCESS_TOKEN_LIFETIME_SECS", default_value_t = 3600)]
    pub access_token_lifetime_secs: u64,

    /// Upper bound on an external identity provider exchange
    #[arg(long, env = "OIDC_GATE_PROVIDER_TIMEOUT_SECS", default_value_t = 10)]
    pub provider_timeout_secs: u64,

    #[arg(long, env = "OIDC_GATE_SEED_CLIENT_ID", default_value = "myClient")]
    pub seed_client_id: String,

    #[arg(long, env = "OIDC_GATE_SEED_CLIENT_NAME", default_value = "My client application")]
    pub seed_client_name: String,

    #[arg(long, env = "OIDC_GATE_SEED_REDIRECT_URI", default_value = "http://localhost:53507/oidc")]
    pub seed_redirect_uri: String,

    #[arg(
        long,
        env = "OIDC_GATE_SEED_CLIENT_SECRET",
        default_value = "secret_secret_secret",
        hide_env_values = true
    )]
    pub seed_client_secret: String,

    /// Skip registering the bootstrap client
    #[arg(long, env = "OIDC_GATE_NO_SEED")]
    pub no_seed: bool,

    #[arg(long, env = "OIDC_GATE_GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    #[arg(long, env = "OIDC_GATE_GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,
}

impl ServerConfig {
    /// Runtime settings shared by every request handler.
    pub fn settings(&self) -> Result<ServerSettings, ConfigurationError> {
        let issuer = normalize_issuer(&self.issuer)?;
        let secure_cookies = issuer.starts_with("https://");
        Ok(ServerSettings {
            issuer,
            display_errors: self.display_errors,
            secure_cookies,
            session_lifetime: seconds(self.session_lifetime_secs),
            code_lifetime: seconds(self.code_lifetime_secs),
            access_token_lifetime: seconds(self.access_token_lifetime_secs),
            provider_timeout: std::time::Duration::from_secs(self.provider_timeout_secs),
        })
    }

    /// The bootstrap client, unless seeding is disabled.
    pub fn seed_client(&self) -> Option<ClientRegistration> {
        if self.no_seed {
            return None;
        }
        Some(ClientRegistration {
            client_id: self.seed_client_id.clone(),
            display_name: self.seed_client_name.clone(),
            redirect_uri: self.seed_redirect_uri.clone(),
            secret: self.seed_client_secret.clone(),
        })
    }

    /// Passphrase for the configured key. The embedded key always uses its
    /// own passphrase.
    pub fn key_passphrase(&self) -> Option<String> {
        match &self.signing_key {
            Some(_) => self.signing_key_passphrase.clone(),
            None => Some(EMBEDDED_KEY_PASSPHRASE.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Always ends with `/`.
    pub issuer: String,
    pub display_errors: bool,
    pub secure_cookies: bool,
    pub session_lifetime: chrono::Duration,
    pub code_lifetime: chrono::Duration,
    pub access_token_lifetime: chrono::Duration,
    pub provider_timeout: std::time::Duration,
}

impl ServerSettings {
    /// Absolute URL of a server path, e.g. `endpoint("token")`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer, path.trim_start_matches('/'))
    }
}

impl Default for ServerSettings {
    /// Demo posture: plain http on localhost, errors shown, 5 minute sessions.
    fn default() -> Self {
        Self {
            issuer: "http://localhost:54540/".into(),
            display_errors: true,
            secure_cookies: false,
            session_lifetime: chrono::Duration::minutes(5),
            code_lifetime: chrono::Duration::minutes(5),
            access_token_lifetime: chrono::Duration::hours(1),
            provider_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Lifetimes are capped at roughly a century so expiry arithmetic cannot
/// overflow.
const MAX_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs).unwrap_or(MAX_LIFETIME_SECS).min(MAX_LIFETIME_SECS);
    chrono::Duration::seconds(secs)
}

fn normalize_issuer(raw: &str) -> Result<String, ConfigurationError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| ConfigurationError::InvalidIssuer(format!("{raw}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
        return Err(ConfigurationError::InvalidIssuer(raw.to_string()));
    }
    let mut issuer = parsed.to_string();
    if !issuer.ends_with('/') {
        issuer.push('/');
    }
    Ok(issuer)
}
