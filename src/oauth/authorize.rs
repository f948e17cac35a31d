use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;

use super::types::{code_properties, AuthorizeParams};
use crate::error::AuthorizationFailure;
use crate::pipeline::MaybeIdentity;
use crate::protection::{schemes, AuthenticationTicket, Purpose};
use crate::AppState;

const DEFAULT_SCOPE: &str = "openid";

// ---------------------------------------------------------------------------
// GET|POST /authorize
// ---------------------------------------------------------------------------

/// Authorization endpoint, query form (RFC 6749 §4.1.1).
pub async fn authorize_query(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    query: Result<Query<AuthorizeParams>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(params)) => authorize(&state, identity, params),
        Err(rejection) => malformed(&state, rejection.status(), rejection.body_text()),
    }
}

/// Authorization endpoint, form post.
pub async fn authorize_form(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    form: Result<Form<AuthorizeParams>, FormRejection>,
) -> Response {
    match form {
        Ok(Form(params)) => authorize(&state, identity, params),
        Err(rejection) => malformed(&state, rejection.status(), rejection.body_text()),
    }
}

/// Undecodable request (repeated parameter, wrong content type). The redirect
/// URI cannot be trusted, so the error is answered directly.
fn malformed(state: &AppState, status: StatusCode, detail: String) -> Response {
    log::warn!(
        "auth:authorize rejected reason=invalid_request status={} detail=\"{}\"",
        status,
        detail
    );
    AuthorizationFailure::InvalidRequest(detail).into_oauth_response(state.settings.display_errors)
}

/// Client and redirect URI are checked before anything else; until the
/// redirect URI is known to be registered, errors are answered directly and
/// never by redirect.
fn authorize(
    state: &AppState,
    identity: Option<AuthenticationTicket>,
    params: AuthorizeParams,
) -> Response {
    let display_errors = state.settings.display_errors;

    if params.client_id.is_empty() {
        return reject(
            AuthorizationFailure::InvalidRequest("missing client_id".into()),
            &params,
            display_errors,
        );
    }
    let Some(client) = state.clients.get(&params.client_id) else {
        return reject(AuthorizationFailure::InvalidClient, &params, display_errors);
    };

    // Exact string match, no normalization.
    let redirect_uri = match params.redirect_uri.as_deref() {
        None => client.redirect_uri.clone(),
        Some(uri) if uri == client.redirect_uri => uri.to_string(),
        Some(_) => {
            return reject(AuthorizationFailure::RedirectMismatch, &params, display_errors);
        }
    };
    let client_state = params.state.as_deref().unwrap_or_default();

    let response_type = params.response_type.as_deref().unwrap_or("code");
    if response_type != "code" {
        log::warn!(
            "auth:authorize rejected client={} reason=unsupported_response_type response_type={}",
            client.client_id,
            response_type
        );
        return Redirect::to(&error_url(
            &redirect_uri,
            &AuthorizationFailure::UnsupportedResponseType,
            display_errors,
            client_state,
        ))
        .into_response();
    }

    let Some(identity) = identity else {
        log::debug!(
            "auth:authorize deferred to sign-in client={}",
            client.client_id
        );
        let return_url = format!("/authorize?{}", serialize_params(&params));
        return Redirect::to(&format!(
            "/signin?ReturnUrl={}",
            urlencoding::encode(&return_url)
        ))
        .into_response();
    };

    let scope = params
        .scope
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCOPE);

    let mut code_ticket = identity
        .reissue(schemes::AUTHORIZATION_CODE, state.settings.code_lifetime)
        .with_property(code_properties::CODE_ID, uuid::Uuid::new_v4().to_string())
        .with_property(code_properties::CLIENT_ID, client.client_id.as_str())
        .with_property(code_properties::REDIRECT_URI, redirect_uri.as_str())
        .with_property(code_properties::SCOPE, scope);
    if params.redirect_uri.is_some() {
        code_ticket = code_ticket.with_property(code_properties::REDIRECT_URI_EXPLICIT, "true");
    }
    if let Some(nonce) = params.nonce.as_deref().filter(|n| !n.is_empty()) {
        code_ticket = code_ticket.with_property(code_properties::NONCE, nonce);
    }

    let code = match state
        .protector
        .protect(&code_ticket, &Purpose::AUTHORIZATION_CODE)
    {
        Ok(code) => code,
        Err(e) => return StatusCode::from(e).into_response(),
    };

    log::info!(
        "auth:code issued client={} subject={} scope=\"{}\"",
        client.client_id,
        code_ticket.principal,
        scope
    );

    Redirect::to(&success_url(&redirect_uri, &code, client_state)).into_response()
}

fn reject(failure: AuthorizationFailure, params: &AuthorizeParams, display_errors: bool) -> Response {
    log::warn!(
        "auth:authorize rejected client={} reason={} redirect_uri={:?}",
        params.client_id,
        failure.reason(),
        params.redirect_uri
    );
    failure.into_oauth_response(display_errors)
}

/// Re-encode the request so sign-in can send the browser back to it.
fn serialize_params(params: &AuthorizeParams) -> String {
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    out.append_pair("client_id", &params.client_id);
    let optional = [
        ("redirect_uri", &params.redirect_uri),
        ("response_type", &params.response_type),
        ("scope", &params.scope),
        ("state", &params.state),
        ("nonce", &params.nonce),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            out.append_pair(key, value);
        }
    }
    out.finish()
}

// ---------------------------------------------------------------------------
// URL builders
// ---------------------------------------------------------------------------

fn success_url(redirect_uri: &str, code: &str, state: &str) -> String {
    let sep = if redirect_uri.contains('?') { "&" } else { "?" };
    let mut url = format!("{}{}code={}", redirect_uri, sep, urlencoding::encode(code));
    if !state.is_empty() {
        url.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    url
}

fn error_url(
    redirect_uri: &str,
    failure: &AuthorizationFailure,
    display_errors: bool,
    state: &str,
) -> String {
    let sep = if redirect_uri.contains('?') { "&" } else { "?" };
    let mut url = format!(
        "{}{}error={}",
        redirect_uri,
        sep,
        urlencoding::encode(failure.error_code())
    );
    if display_errors {
        url.push_str(&format!(
            "&error_description={}",
            urlencoding::encode(&failure.to_string())
        ));
    }
    if !state.is_empty() {
        url.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    url
}
