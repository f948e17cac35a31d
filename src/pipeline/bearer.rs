//! Bearer branch of the API pipeline (RFC 6750 §2.1).
//!
//! `NoToken → TokenPresent → {Valid, Invalid}`. A missing token lets the
//! request through unauthenticated; an invalid or expired one ends it with a
//! 401 here. Cookies are never consulted.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};

use super::{AuthenticatedIdentity, StageOutcome};
use crate::error::AuthenticationFailure;
use crate::protection::{AuthenticationTicket, Purpose, TicketProtector};
use crate::AppState;

/// Result of validating the `Authorization` header.
#[derive(Debug)]
pub enum BearerValidation {
    /// No `Authorization: Bearer` header.
    Missing,
    Valid(AuthenticationTicket),
    Invalid(AuthenticationFailure),
}

/// Token from `Authorization: Bearer <token>`. The scheme comparison is
/// case-insensitive (RFC 7235 §2.1); any other scheme counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|t| !t.is_empty())
}

pub fn validate_bearer(
    headers: &HeaderMap,
    protector: &TicketProtector,
    now: DateTime<Utc>,
) -> BearerValidation {
    let Some(token) = bearer_token(headers) else {
        return BearerValidation::Missing;
    };

    match protector.authenticate(token, &Purpose::BEARER, now) {
        Ok(ticket) => BearerValidation::Valid(ticket),
        Err(failure) => BearerValidation::Invalid(failure),
    }
}

/// The bearer stage: attach the identity, pass through, or reject.
pub(super) fn authenticate(state: &AppState, req: &mut Request) -> StageOutcome {
    match validate_bearer(req.headers(), &state.protector, Utc::now()) {
        BearerValidation::Missing => StageOutcome::Continue,
        BearerValidation::Valid(ticket) => {
            log::debug!(
                "auth:bearer accepted subject={} path={}",
                ticket.principal,
                req.uri().path()
            );
            req.extensions_mut().insert(AuthenticatedIdentity::new(ticket));
            StageOutcome::Continue
        }
        BearerValidation::Invalid(failure) => {
            log::info!(
                "auth:bearer rejected reason={:?} path={}",
                failure,
                req.uri().path()
            );
            StageOutcome::Respond(challenge(Some(failure)))
        }
    }
}

/// 401 with a `WWW-Authenticate: Bearer` challenge. `error="invalid_token"`
/// is only added when a token was presented (RFC 6750 §3.1).
pub fn challenge(failure: Option<AuthenticationFailure>) -> Response {
    let value = match failure {
        None | Some(AuthenticationFailure::Missing) => "Bearer",
        Some(AuthenticationFailure::Expired) => {
            "Bearer error=\"invalid_token\", error_description=\"The access token expired\""
        }
        Some(AuthenticationFailure::Invalid) => "Bearer error=\"invalid_token\"",
    };

    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(value));
    resp
}
