use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Startup failures. Any of these means the server cannot serve
/// authenticated traffic, so `main` aborts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Cannot read signing key {path}: {source}")]
    KeyUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode signing key (wrong passphrase or corrupt PEM): {0}")]
    KeyUndecodable(String),

    #[error("Signing key is not usable for RS256: {0}")]
    KeyUnsupported(String),

    #[error("Ticket protection key derivation failed")]
    KeyDerivation,

    #[error("Invalid issuer URL {0}")]
    InvalidIssuer(String),

    #[error("Invalid identity provider endpoint {0}")]
    InvalidProviderUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a presented ticket (bearer token, session cookie, authorization code)
/// did not authenticate anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationFailure {
    #[error("no credentials presented")]
    Missing,

    #[error("ticket is malformed, forged or protected for another purpose")]
    Invalid,

    #[error("ticket has expired")]
    Expired,
}

/// OAuth 2.0 endpoint failures (RFC 6749 §4.1.2.1 / §5.2).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationFailure {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown client or bad client credentials")]
    InvalidClient,

    #[error("redirect_uri does not match the registered value")]
    RedirectMismatch,

    #[error("authorization code is invalid")]
    InvalidCode,

    #[error("authorization code was already redeemed")]
    ReusedCode,

    #[error("authorization code has expired")]
    ExpiredCode,

    #[error("authorization code was issued to another client")]
    CodeClientMismatch,

    #[error("only the authorization_code grant is supported")]
    UnsupportedGrantType,

    #[error("only the code response type is supported")]
    UnsupportedResponseType,

    #[error("the server could not complete the request")]
    ServerError,
}

impl AuthorizationFailure {
    /// The RFC 6749 `error` value.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::RedirectMismatch => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidCode | Self::ReusedCode | Self::ExpiredCode | Self::CodeClientMismatch => {
                "invalid_grant"
            }
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::ServerError => "server_error",
        }
    }

    /// Stable machine-readable reason, finer grained than `error_code`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::RedirectMismatch => "redirect_mismatch",
            Self::InvalidCode => "invalid_code",
            Self::ReusedCode => "reused_code",
            Self::ExpiredCode => "expired_code",
            Self::CodeClientMismatch => "code_client_mismatch",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Render as an OAuth JSON error. `error_description` is only included
    /// when the deployment allows errors to be displayed.
    pub fn into_oauth_response(self, display_errors: bool) -> Response {
        let mut body = serde_json::json!({ "error": self.error_code() });
        if display_errors {
            body["error_description"] = serde_json::Value::String(self.to_string());
            body["error_reason"] = serde_json::Value::String(self.reason().to_string());
        }
        (self.status(), Json(body)).into_response()
    }
}

/// Federated sign-in failures. All of them leave the browser without a
/// session and send it back to the sign-in page.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown identity provider {0}")]
    UnknownProvider(String),

    #[error("correlation cookie missing or invalid")]
    MissingCorrelation,

    #[error("state parameter does not match")]
    StateMismatch,

    #[error("nonce does not match")]
    NonceMismatch,

    #[error("provider denied the request: {0}")]
    Denied(String),

    #[error("provider did not answer in time")]
    Timeout,

    #[error("provider HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Short code passed back to the sign-in page.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownProvider(_) => "unknown_provider",
            Self::MissingCorrelation => "correlation_failed",
            Self::StateMismatch => "state_mismatch",
            Self::NonceMismatch => "nonce_mismatch",
            Self::Denied(_) => "access_denied",
            Self::Timeout => "timeout",
            Self::Http(_) | Self::InvalidResponse(_) => "provider_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtectionError {
    #[error("ticket serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("random number generator failure")]
    Rng,

    #[error("encryption failure")]
    Seal,

    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<ProtectionError> for StatusCode {
    fn from(err: ProtectionError) -> Self {
        log::error!("Ticket protection failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
