use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;

use super::types::{code_properties, IdTokenClaims, RegisteredClient, TokenRequest, TokenResponse};
use crate::error::{AuthenticationFailure, AuthorizationFailure};
use crate::protection::{claims, schemes, AuthenticationTicket, Purpose};
use crate::AppState;

/// Token endpoint.
///
/// `POST /token` (application/x-www-form-urlencoded)
///
/// Only `authorization_code` is supported. The client authenticates with
/// either HTTP Basic or `client_id`/`client_secret` form fields.
pub async fn token_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let display_errors = state.settings.display_errors;
    // Malformed bodies (wrong content type, repeated parameters) are
    // `invalid_request` (RFC 6749 §3.2), never a plain-text rejection.
    let req = match form {
        Ok(Form(req)) => req,
        Err(rejection) => {
            log::warn!(
                "auth:token rejected reason=invalid_request status={} detail=\"{}\"",
                rejection.status(),
                rejection.body_text()
            );
            return AuthorizationFailure::InvalidRequest(rejection.body_text())
                .into_oauth_response(display_errors);
        }
    };
    match req.grant_type.as_str() {
        "authorization_code" => match redeem_code(&state, &headers, req) {
            Ok(resp) => resp,
            Err(failure) => failure.into_oauth_response(display_errors),
        },
        other => {
            log::warn!("auth:token rejected reason=unsupported_grant_type grant_type={}", other);
            AuthorizationFailure::UnsupportedGrantType.into_oauth_response(display_errors)
        }
    }
}

fn redeem_code(
    state: &AppState,
    headers: &HeaderMap,
    req: TokenRequest,
) -> Result<Response, AuthorizationFailure> {
    let client = authenticate_client(state, headers, &req)?;

    let Some(code) = req.code.as_deref().filter(|c| !c.is_empty()) else {
        return Err(rejected(&client, AuthorizationFailure::InvalidRequest("missing code".into())));
    };

    let now = Utc::now();
    let code_ticket = state
        .protector
        .authenticate(code, &Purpose::AUTHORIZATION_CODE, now)
        .map_err(|failure| match failure {
            AuthenticationFailure::Expired => AuthorizationFailure::ExpiredCode,
            AuthenticationFailure::Missing | AuthenticationFailure::Invalid => {
                AuthorizationFailure::InvalidCode
            }
        })
        .map_err(|f| rejected(&client, f))?;

    if code_ticket.property(code_properties::CLIENT_ID) != Some(client.client_id.as_str()) {
        return Err(rejected(&client, AuthorizationFailure::CodeClientMismatch));
    }
    // RFC 6749 §4.1.3: required when the authorization request carried one.
    match req.redirect_uri.as_deref() {
        Some(redirect_uri) => {
            if code_ticket.property(code_properties::REDIRECT_URI) != Some(redirect_uri) {
                return Err(rejected(&client, AuthorizationFailure::RedirectMismatch));
            }
        }
        None if code_ticket.property(code_properties::REDIRECT_URI_EXPLICIT).is_some() => {
            return Err(rejected(
                &client,
                AuthorizationFailure::InvalidRequest("missing redirect_uri".into()),
            ));
        }
        None => {}
    }
    let Some(code_id) = code_ticket.property(code_properties::CODE_ID) else {
        return Err(rejected(&client, AuthorizationFailure::InvalidCode));
    };

    // Last check, so a failed attempt above never burns the code.
    if !state.redemptions.try_redeem(code_id, code_ticket.expires_at) {
        return Err(rejected(&client, AuthorizationFailure::ReusedCode));
    }

    let scope = code_ticket
        .property(code_properties::SCOPE)
        .unwrap_or_default()
        .to_string();
    let lifetime = state.settings.access_token_lifetime;
    let access = code_ticket
        .reissue(schemes::BEARER, lifetime)
        .with_property(code_properties::CLIENT_ID, client.client_id.as_str())
        .with_property(code_properties::SCOPE, scope.as_str());

    let access_token = state
        .protector
        .protect(&access, &Purpose::BEARER)
        .map_err(|e| internal(&client, e))?;

    let id_token = if scope.split_whitespace().any(|s| s == "openid") {
        let claims = id_token_claims(state, &client, &code_ticket, &access);
        Some(state.credential.sign_jwt(&claims).map_err(|e| internal(&client, e))?)
    } else {
        None
    };

    log::info!(
        "auth:token issued client={} subject={} scope=\"{}\" id_token={}",
        client.client_id,
        access.principal,
        scope,
        id_token.is_some()
    );

    let mut resp = Json(TokenResponse {
        access_token,
        token_type: "Bearer".into(),
        expires_in: access.remaining_secs(access.issued_at),
        scope,
        id_token,
    })
    .into_response();
    // RFC 6749 §5.1
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp.headers_mut()
        .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(resp)
}

/// Resolve and verify the presenting client. Using Basic and form
/// credentials together is an error (RFC 6749 §2.3).
fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    req: &TokenRequest,
) -> Result<RegisteredClient, AuthorizationFailure> {
    let basic = basic_credentials(headers);
    if basic.is_some() && req.client_secret.is_some() {
        return Err(AuthorizationFailure::InvalidRequest(
            "multiple client authentication methods".into(),
        ));
    }

    let (client_id, secret) = match basic {
        Some(pair) => pair,
        None => match (req.client_id.clone(), req.client_secret.clone()) {
            (Some(id), Some(secret)) => (id, secret),
            (id, _) => {
                log::warn!(
                    "auth:token rejected client={} reason=missing_client_credentials",
                    id.unwrap_or_default()
                );
                return Err(AuthorizationFailure::InvalidClient);
            }
        },
    };

    if let Some(form_id) = req.client_id.as_deref() {
        if form_id != client_id {
            return Err(AuthorizationFailure::InvalidRequest("client_id mismatch".into()));
        }
    }

    state.clients.authenticate(&client_id, &secret).ok_or_else(|| {
        log::warn!("auth:token rejected client={} reason=invalid_client", client_id);
        AuthorizationFailure::InvalidClient
    })
}

/// `Authorization: Basic base64(urlencode(id):urlencode(secret))`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if value.len() <= 6 || !value[..6].eq_ignore_ascii_case("basic ") {
        return None;
    }
    let decoded = STANDARD.decode(value[6..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((
        urlencoding::decode(id).ok()?.into_owned(),
        urlencoding::decode(secret).ok()?.into_owned(),
    ))
}

fn id_token_claims(
    state: &AppState,
    client: &RegisteredClient,
    code: &AuthenticationTicket,
    access: &AuthenticationTicket,
) -> IdTokenClaims {
    IdTokenClaims {
        iss: state.settings.issuer.clone(),
        sub: access.principal.clone(),
        aud: client.client_id.clone(),
        iat: access.issued_at.timestamp(),
        exp: access.expires_at.timestamp(),
        nonce: code.property(code_properties::NONCE).map(str::to_owned),
        name: access.claim(claims::NAME).map(str::to_owned),
        email: access.claim(claims::EMAIL).map(str::to_owned),
    }
}

fn rejected(client: &RegisteredClient, failure: AuthorizationFailure) -> AuthorizationFailure {
    log::warn!(
        "auth:token rejected client={} reason={}",
        client.client_id,
        failure.reason()
    );
    failure
}

fn internal(client: &RegisteredClient, err: crate::error::ProtectionError) -> AuthorizationFailure {
    log::error!("auth:token failed client={} error={}", client.client_id, err);
    AuthorizationFailure::ServerError
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};
    use tower::ServiceExt;

    use crate::config::ServerSettings;

    const SECRET: &str = "secret_secret_secret";

    fn issue_code(state: &AppState, client_id: &str, scope: &str, lifetime: Duration) -> String {
        let ticket = AuthenticationTicket::new("alice", schemes::AUTHORIZATION_CODE, lifetime)
            .with_claim(claims::NAME, "Alice")
            .with_claim(claims::EMAIL, "alice@example.com")
            .with_property(code_properties::CODE_ID, uuid::Uuid::new_v4().to_string())
            .with_property(code_properties::CLIENT_ID, client_id)
            .with_property(code_properties::REDIRECT_URI, "http://localhost:53507/oidc")
            .with_property(code_properties::SCOPE, scope)
            .with_property(code_properties::NONCE, "n-1");
        state
            .protector
            .protect(&ticket, &Purpose::AUTHORIZATION_CODE)
            .unwrap()
    }

    fn form(code: &str, extra: &str) -> String {
        format!(
            "grant_type=authorization_code&code={}&client_id=myClient&client_secret={}{}",
            urlencoding::encode(code),
            SECRET,
            extra
        )
    }

    async fn post(state: &AppState, body: String, basic: Option<&str>) -> Response {
        let mut req = Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(credentials) = basic {
            req = req.header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(credentials)),
            );
        }
        crate::server::router(state.clone())
            .oneshot(req.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    async fn json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn exchange_issues_bearer_token() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid profile", Duration::minutes(5));
        let resp = post(&state, form(&code, ""), None).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(resp.headers()[header::PRAGMA], "no-cache");

        let body = json(resp).await;
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["scope"], "openid profile");
        assert!(body["expires_in"].as_i64().unwrap() > 3500);

        let access = state
            .protector
            .authenticate(body["access_token"].as_str().unwrap(), &Purpose::BEARER, Utc::now())
            .unwrap();
        assert_eq!(access.principal, "alice");
        assert_eq!(access.scheme, schemes::BEARER);
        assert_eq!(access.claim(claims::NAME), Some("Alice"));
        assert_eq!(access.property(code_properties::CLIENT_ID), Some("myClient"));
        assert!(access.property(code_properties::CODE_ID).is_none());
    }

    #[tokio::test]
    async fn id_token_is_signed_with_credential() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let body = json(post(&state, form(&code, ""), None).await).await;
        let id_token = body["id_token"].as_str().unwrap();

        let header = jsonwebtoken::decode_header(id_token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(state.credential.key_id()));

        let jwk = state.credential.jwk();
        let key = DecodingKey::from_rsa_components(
            jwk["n"].as_str().unwrap(),
            jwk["e"].as_str().unwrap(),
        )
        .unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["myClient"]);
        validation.set_issuer(&[state.settings.issuer.as_str()]);
        let data = jsonwebtoken::decode::<IdTokenClaims>(id_token, &key, &validation).unwrap();
        assert_eq!(data.claims.sub, "alice");
        assert_eq!(data.claims.nonce.as_deref(), Some("n-1"));
        assert_eq!(data.claims.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn no_id_token_without_openid_scope() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "profile", Duration::minutes(5));
        let body = json(post(&state, form(&code, ""), None).await).await;
        assert!(body.get("id_token").is_none());
    }

    #[tokio::test]
    async fn basic_authentication_is_accepted() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let body = format!("grant_type=authorization_code&code={}", urlencoding::encode(&code));
        let resp = post(&state, body, Some("myClient:secret_secret_secret")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn two_authentication_methods_rejected() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let resp = post(&state, form(&code, ""), Some("myClient:secret_secret_secret")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn reused_code_rejected() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        assert_eq!(post(&state, form(&code, ""), None).await.status(), StatusCode::OK);

        let resp = post(&state, form(&code, ""), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json(resp).await;
        assert_eq!(body["error"], "invalid_grant");
        assert_eq!(body["error_reason"], "reused_code");
    }

    #[tokio::test]
    async fn expired_code_rejected() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::seconds(-1));
        let body = json(post(&state, form(&code, ""), None).await).await;
        assert_eq!(body["error_reason"], "expired_code");
    }

    #[tokio::test]
    async fn forged_code_rejected() {
        let state = AppState::for_tests();
        let body = json(post(&state, form("not-a-code", ""), None).await).await;
        assert_eq!(body["error_reason"], "invalid_code");
    }

    #[tokio::test]
    async fn bearer_token_is_not_a_code() {
        let state = AppState::for_tests();
        let ticket = AuthenticationTicket::new("alice", schemes::BEARER, Duration::minutes(5));
        let token = state.protector.protect(&ticket, &Purpose::BEARER).unwrap();
        let body = json(post(&state, form(&token, ""), None).await).await;
        assert_eq!(body["error_reason"], "invalid_code");
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_client() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let body = format!(
            "grant_type=authorization_code&code={}&client_id=myClient&client_secret=nope",
            urlencoding::encode(&code)
        );
        let resp = post(&state, body, None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(resp).await["error"], "invalid_client");

        // The failed attempt did not consume the code.
        assert_eq!(post(&state, form(&code, ""), None).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn code_for_other_client_rejected() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "otherClient", "openid", Duration::minutes(5));
        let body = json(post(&state, form(&code, ""), None).await).await;
        assert_eq!(body["error_reason"], "code_client_mismatch");
    }

    #[tokio::test]
    async fn redirect_uri_must_match_code() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let extra = format!("&redirect_uri={}", urlencoding::encode("http://evil.example/"));
        let body = json(post(&state, form(&code, &extra), None).await).await;
        assert_eq!(body["error_reason"], "redirect_mismatch");

        let extra = format!(
            "&redirect_uri={}",
            urlencoding::encode("http://localhost:53507/oidc")
        );
        assert_eq!(post(&state, form(&code, &extra), None).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_grant_type() {
        let state = AppState::for_tests();
        let resp = post(&state, "grant_type=password&username=a&password=b".into(), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn hidden_errors_carry_no_detail() {
        let settings = ServerSettings {
            display_errors: false,
            ..ServerSettings::default()
        };
        let state = AppState::for_tests_with(Default::default(), settings);
        let body = json(post(&state, form("forged", ""), None).await).await;
        assert_eq!(body["error"], "invalid_grant");
        assert!(body.get("error_description").is_none());
        assert!(body.get("error_reason").is_none());
    }

    #[tokio::test]
    async fn missing_content_type_is_invalid_request() {
        let state = AppState::for_tests();
        let req = Request::builder()
            .method("POST")
            .uri("/token")
            .body(Body::from("grant_type=authorization_code&code=x"))
            .unwrap();
        let resp = crate::server::router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let body = json(resp).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(body["error_description"].as_str().unwrap().contains("Content-Type"));
    }

    #[tokio::test]
    async fn repeated_code_is_invalid_request() {
        let state = AppState::for_tests();
        let code = issue_code(&state, "myClient", "openid", Duration::minutes(5));
        let resp = post(&state, form(&code, "&code=other"), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json(resp).await;
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["error_reason"], "invalid_request");

        // The rejected attempt did not burn the code.
        assert_eq!(post(&state, form(&code, ""), None).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_detail_hidden_when_errors_hidden() {
        let settings = ServerSettings {
            display_errors: false,
            ..ServerSettings::default()
        };
        let state = AppState::for_tests_with(Default::default(), settings);
        let body = json(post(&state, "code=a&code=b".into(), None).await).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(body.get("error_description").is_none());
    }

    #[tokio::test]
    async fn explicit_redirect_uri_is_required_at_exchange() {
        let state = AppState::for_tests();
        let ticket = AuthenticationTicket::new("alice", schemes::AUTHORIZATION_CODE, Duration::minutes(5))
            .with_property(code_properties::CODE_ID, uuid::Uuid::new_v4().to_string())
            .with_property(code_properties::CLIENT_ID, "myClient")
            .with_property(code_properties::REDIRECT_URI, "http://localhost:53507/oidc")
            .with_property(code_properties::REDIRECT_URI_EXPLICIT, "true")
            .with_property(code_properties::SCOPE, "openid");
        let code = state
            .protector
            .protect(&ticket, &Purpose::AUTHORIZATION_CODE)
            .unwrap();

        let resp = post(&state, form(&code, ""), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json(resp).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(body["error_description"].as_str().unwrap().contains("redirect_uri"));

        let extra = format!(
            "&redirect_uri={}",
            urlencoding::encode("http://localhost:53507/oidc")
        );
        assert_eq!(post(&state, form(&code, &extra), None).await.status(), StatusCode::OK);
    }

    #[test]
    fn basic_credentials_are_url_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("basic {}", STANDARD.encode("my%20client:p%3Ass")).parse().unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("my client".to_string(), "p:ss".to_string()))
        );
    }
}
