//! Browser sign-in through external identity providers.
//!
//! `GET /signin` lists providers, `POST /signin` starts a handshake,
//! `GET /signin/callback/{provider}` completes it and mints the local
//! session cookie, `/signout` drops it. Any failure on the way back leaves
//! the browser without a session on `/signin?error=<code>`.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::ProviderError;
use crate::pipeline::cookie::{self, SecureCookie, CORRELATION_COOKIE_PREFIX};
use crate::pipeline::MaybeIdentity;
use crate::protection::{claims, schemes, AuthenticationTicket, Purpose};
use crate::AppState;

const CORRELATION_LIFETIME_MINUTES: i64 = 15;

mod correlation_keys {
    pub const PROVIDER: &str = "provider";
    pub const STATE: &str = "state";
    pub const NONCE: &str = "nonce";
    pub const RETURN_URL: &str = "return_url";
}

// ---------------------------------------------------------------------------
// GET /signin
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SignInQuery {
    #[serde(rename = "ReturnUrl")]
    pub return_url: Option<String>,
    pub error: Option<String>,
}

pub async fn sign_in_page(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Query(query): Query<SignInQuery>,
) -> Html<String> {
    let return_url = local_return_url(query.return_url.as_deref());

    let mut body = String::new();
    if let Some(ticket) = identity {
        let who = ticket.claim(claims::NAME).unwrap_or(ticket.principal.as_str());
        body.push_str(&format!(
            "<p>Signed in as <strong>{}</strong>. <a href=\"/signout\">Sign out</a></p>\n",
            html_escape(who)
        ));
    }
    if let Some(error) = query.error.as_deref() {
        body.push_str(&format!(
            "<p class=\"error\">Sign-in failed ({}). Please try again.</p>\n",
            html_escape(error)
        ));
    }
    if state.providers.is_empty() {
        body.push_str("<p>No external identity providers are configured.</p>\n");
    }
    for provider in state.providers.list() {
        body.push_str(&format!(
            concat!(
                "<form method=\"post\" action=\"/signin\">",
                "<input type=\"hidden\" name=\"provider\" value=\"{name}\">",
                "<input type=\"hidden\" name=\"return_url\" value=\"{ret}\">",
                "<button type=\"submit\">Sign in with {display}</button>",
                "</form>\n"
            ),
            name = html_escape(provider.name()),
            ret = html_escape(&return_url),
            display = html_escape(provider.display_name()),
        ));
    }

    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Sign in</title></head>\n<body>\n<h1>Sign in</h1>\n{}</body></html>\n",
        body
    ))
}

// ---------------------------------------------------------------------------
// POST /signin
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChallengeForm {
    pub provider: String,
    pub return_url: Option<String>,
}

/// Start the provider handshake: remember state and nonce in a protected
/// correlation cookie and send the browser to the provider.
pub async fn challenge(State(state): State<AppState>, Form(form): Form<ChallengeForm>) -> Response {
    let Some(provider) = state.providers.get(&form.provider) else {
        log::warn!("auth:signin unknown provider={}", form.provider);
        return failure_redirect(&ProviderError::UnknownProvider(form.provider));
    };

    let anti_forgery = random_token();
    let nonce = random_token();
    let correlation = AuthenticationTicket::new(
        "",
        schemes::CORRELATION,
        Duration::minutes(CORRELATION_LIFETIME_MINUTES),
    )
    .with_property(correlation_keys::PROVIDER, provider.name())
    .with_property(correlation_keys::STATE, anti_forgery.as_str())
    .with_property(correlation_keys::NONCE, nonce.as_str())
    .with_property(
        correlation_keys::RETURN_URL,
        local_return_url(form.return_url.as_deref()),
    );

    let blob = match state.protector.protect(&correlation, &Purpose::CORRELATION) {
        Ok(blob) => blob,
        Err(e) => return axum::http::StatusCode::from(e).into_response(),
    };

    let callback = callback_url(&state, provider.name());
    let target = provider.authorization_url(&callback, &anti_forgery, &nonce);
    log::info!("auth:signin challenge provider={}", provider.name());

    let mut resp = Redirect::to(&target).into_response();
    SecureCookie::new(
        correlation_cookie_name(provider.name()),
        blob,
        CORRELATION_LIFETIME_MINUTES * 60,
        state.settings.secure_cookies,
    )
    .append_to(resp.headers_mut());
    resp
}

// ---------------------------------------------------------------------------
// GET /signin/callback/{provider}
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let outcome = complete_sign_in(&state, &provider_name, &headers, query).await;

    let mut resp = match outcome {
        Ok((identity, return_url)) => match cookie::mint_session(&state.protector, &identity, &state.settings) {
            Ok(session) => {
                log::info!(
                    "auth:signin completed provider={} subject={}",
                    provider_name,
                    identity.principal
                );
                let mut resp = Redirect::to(&return_url).into_response();
                session.append_to(resp.headers_mut());
                resp
            }
            Err(e) => axum::http::StatusCode::from(e).into_response(),
        },
        Err(e) => {
            log::warn!("auth:signin failed provider={} reason={}", provider_name, e);
            failure_redirect(&e)
        }
    };

    // Correlation cookies are single-use whatever the outcome.
    SecureCookie::removal(
        correlation_cookie_name(&provider_name),
        state.settings.secure_cookies,
    )
    .append_to(resp.headers_mut());
    resp
}

async fn complete_sign_in(
    state: &AppState,
    provider_name: &str,
    headers: &HeaderMap,
    query: CallbackQuery,
) -> Result<(AuthenticationTicket, String), ProviderError> {
    let provider = state
        .providers
        .get(provider_name)
        .ok_or_else(|| ProviderError::UnknownProvider(provider_name.to_string()))?;

    let correlation = cookie::read_cookie(headers, &correlation_cookie_name(provider_name))
        .and_then(|blob| {
            state
                .protector
                .authenticate(&blob, &Purpose::CORRELATION, Utc::now())
                .ok()
        })
        .filter(|t| t.property(correlation_keys::PROVIDER) == Some(provider_name))
        .ok_or(ProviderError::MissingCorrelation)?;

    if let Some(error) = query.error {
        return Err(ProviderError::Denied(error));
    }

    let expected_state = correlation.property(correlation_keys::STATE).unwrap_or_default();
    let presented_state = query.state.unwrap_or_default();
    let state_matches: bool = expected_state
        .as_bytes()
        .ct_eq(presented_state.as_bytes())
        .into();
    if expected_state.is_empty() || !state_matches {
        return Err(ProviderError::StateMismatch);
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("callback without code".into()))?;

    let callback = callback_url(state, provider.name());
    let external = tokio::time::timeout(
        state.settings.provider_timeout,
        provider.exchange_code(&code, &callback),
    )
    .await
    .map_err(|_| ProviderError::Timeout)??;

    if let Some(returned) = external.nonce.as_deref() {
        let expected = correlation.property(correlation_keys::NONCE).unwrap_or_default();
        let nonce_matches: bool = expected.as_bytes().ct_eq(returned.as_bytes()).into();
        if !nonce_matches {
            return Err(ProviderError::NonceMismatch);
        }
    }

    let mut identity = AuthenticationTicket::new(
        external.subject.as_str(),
        provider.name(),
        state.settings.session_lifetime,
    )
    .with_claim(claims::SUBJECT, external.subject.as_str())
    .with_claim(claims::IDENTITY_PROVIDER, provider.name());
    if let Some(name) = external.name {
        identity = identity.with_claim(claims::NAME, name);
    }
    if let Some(email) = external.email {
        identity = identity.with_claim(claims::EMAIL, email);
    }

    let return_url = local_return_url(correlation.property(correlation_keys::RETURN_URL));
    Ok((identity, return_url))
}

// ---------------------------------------------------------------------------
// GET|POST /signout
// ---------------------------------------------------------------------------

pub async fn sign_out(State(state): State<AppState>, MaybeIdentity(identity): MaybeIdentity) -> Response {
    if let Some(ticket) = identity {
        log::info!("auth:signout subject={}", ticket.principal);
    }
    let mut resp = Redirect::to("/signin").into_response();
    cookie::clear_session(&state.settings).append_to(resp.headers_mut());
    resp.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    resp
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn correlation_cookie_name(provider: &str) -> String {
    format!("{}{}", CORRELATION_COOKIE_PREFIX, provider)
}

fn callback_url(state: &AppState, provider: &str) -> String {
    state.settings.endpoint(&format!("signin/callback/{}", provider))
}

fn failure_redirect(error: &ProviderError) -> Response {
    Redirect::to(&format!("/signin?error={}", error.code())).into_response()
}

/// 32 random bytes, base64url.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only same-site absolute paths are followed after sign-in; anything else
/// (`https://...`, `//host`, `/\host`) falls back to `/`.
pub fn local_return_url(raw: Option<&str>) -> String {
    match raw {
        Some(url)
            if url.starts_with('/')
                && !url.starts_with("//")
                && !url.starts_with("/\\")
                && !url.chars().any(char::is_control) =>
        {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
