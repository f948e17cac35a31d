//! Cookie branch of the WEB pipeline.
//!
//! `NoSession → {ExternalRedirect, LocalSession}`. This stage only reads the
//! session cookie; the external redirect and the minting of a new session
//! happen in the federation handlers, which use the helpers below.

use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

use super::{AuthenticatedIdentity, StageOutcome};
use crate::config::ServerSettings;
use crate::error::{AuthenticationFailure, ProtectionError};
use crate::protection::{schemes, AuthenticationTicket, Purpose, TicketProtector};
use crate::AppState;

/// Cookie carrying the protected local session ticket.
pub const SESSION_COOKIE: &str = "oidc-gate.ServerCookie";

/// Prefix of the per-provider correlation cookie used during sign-in.
pub const CORRELATION_COOKIE_PREFIX: &str = "oidc-gate.Correlation.";

// ---------------------------------------------------------------------------
// Set-Cookie builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

#[derive(Debug, Clone)]
pub struct SecureCookie {
    pub name: String,
    pub value: String,
    pub max_age_secs: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl SecureCookie {
    /// HttpOnly, SameSite=Lax, Path=/.
    pub fn new(name: impl Into<String>, value: impl Into<String>, max_age_secs: i64, secure: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age_secs,
            http_only: true,
            secure,
            same_site: SameSite::Lax,
            path: "/".to_owned(),
        }
    }

    /// A cookie that tells the browser to drop `name`.
    pub fn removal(name: impl Into<String>, secure: bool) -> Self {
        Self::new(name, "", 0, secure)
    }

    pub fn build(&self) -> String {
        use std::fmt::Write;
        let mut cookie = format!("{}={}", self.name, self.value);
        let _ = write!(cookie, "; Max-Age={}", self.max_age_secs);
        let _ = write!(cookie, "; Path={}", self.path);
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        match self.same_site {
            SameSite::Strict => cookie.push_str("; SameSite=Strict"),
            SameSite::Lax => cookie.push_str("; SameSite=Lax"),
        }
        cookie
    }

    /// Append as a `Set-Cookie` header. Values that are not valid header
    /// text are dropped with a warning.
    pub fn append_to(&self, headers: &mut HeaderMap) {
        match HeaderValue::from_str(&self.build()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(_) => log::warn!("Dropping unencodable cookie {}", self.name),
        }
    }
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k.trim() == name).then(|| v.trim().to_owned())
        })
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SessionValidation {
    LocalSession(AuthenticationTicket),
    NoSession(AuthenticationFailure),
}

pub fn validate_session(
    headers: &HeaderMap,
    protector: &TicketProtector,
    now: DateTime<Utc>,
) -> SessionValidation {
    let Some(blob) = read_cookie(headers, SESSION_COOKIE) else {
        return SessionValidation::NoSession(AuthenticationFailure::Missing);
    };
    match protector.authenticate(&blob, &Purpose::COOKIE, now) {
        Ok(ticket) => SessionValidation::LocalSession(ticket),
        Err(failure) => SessionValidation::NoSession(failure),
    }
}

/// The cookie stage never short-circuits: without a session the request
/// simply carries no identity and the handler decides what to offer.
pub(super) fn authenticate(state: &AppState, req: &mut Request) -> StageOutcome {
    match validate_session(req.headers(), &state.protector, Utc::now()) {
        SessionValidation::LocalSession(ticket) => {
            req.extensions_mut().insert(AuthenticatedIdentity::new(ticket));
        }
        SessionValidation::NoSession(AuthenticationFailure::Missing) => {}
        SessionValidation::NoSession(failure) => {
            log::debug!(
                "auth:cookie ignored reason={:?} path={}",
                failure,
                req.uri().path()
            );
        }
    }
    StageOutcome::Continue
}

/// Protect `identity` as a fresh local session and build its cookie.
pub fn mint_session(
    protector: &TicketProtector,
    identity: &AuthenticationTicket,
    settings: &ServerSettings,
) -> Result<SecureCookie, ProtectionError> {
    let ticket = identity.reissue(schemes::COOKIE, settings.session_lifetime);
    let blob = protector.protect(&ticket, &Purpose::COOKIE)?;
    Ok(SecureCookie::new(
        SESSION_COOKIE,
        blob,
        settings.session_lifetime.num_seconds(),
        settings.secure_cookies,
    ))
}

pub fn clear_session(settings: &ServerSettings) -> SecureCookie {
    SecureCookie::removal(SESSION_COOKIE, settings.secure_cookies)
}
