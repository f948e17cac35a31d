//! Path-split request pipeline.
//!
//! Every request is classified by path alone into [`Branch::Api`] or
//! [`Branch::Web`] and runs through that branch's ordered stage list before
//! reaching its handler. Stages either attach an [`AuthenticatedIdentity`]
//! and continue, or answer the request themselves.

pub mod bearer;
pub mod cookie;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{
    CONTENT_SECURITY_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::AuthenticationFailure;
use crate::protection::AuthenticationTicket;
use crate::AppState;

const API_PREFIX: &str = "/api";

const CONTENT_SECURITY_POLICY_VALUE: &str =
    "default-src 'self'; img-src 'self' *; script-src 'unsafe-inline'; style-src 'self' 'unsafe-inline'";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Api,
    Web,
}

/// `/api` and anything below it is API traffic, everything else is WEB.
/// Matching is per path segment and ignores ASCII case, so `/API/x` is API
/// and `/apiary` is not.
pub fn classify(path: &str) -> Branch {
    let is_api = path
        .get(..API_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(API_PREFIX))
        && matches!(path.as_bytes().get(API_PREFIX.len()), None | Some(b'/'));

    if is_api {
        Branch::Api
    } else {
        Branch::Web
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BearerAuthentication,
    CookieAuthentication,
}

pub enum StageOutcome {
    Continue,
    Respond(Response),
}

impl Stage {
    pub fn run(self, state: &AppState, req: &mut Request) -> StageOutcome {
        match self {
            Stage::BearerAuthentication => bearer::authenticate(state, req),
            Stage::CookieAuthentication => cookie::authenticate(state, req),
        }
    }
}

/// The two stage lists, fixed at startup.
#[derive(Debug, Clone)]
pub struct Pipelines {
    api: Vec<Stage>,
    web: Vec<Stage>,
}

impl Pipelines {
    pub fn new(api: Vec<Stage>, web: Vec<Stage>) -> Self {
        Self { api, web }
    }

    pub fn stages(&self, branch: Branch) -> &[Stage] {
        match branch {
            Branch::Api => &self.api,
            Branch::Web => &self.web,
        }
    }
}

impl Default for Pipelines {
    fn default() -> Self {
        Self::new(
            vec![Stage::BearerAuthentication],
            vec![Stage::CookieAuthentication],
        )
    }
}

/// Router middleware: run the request's branch, then the handler unless a
/// stage already answered.
pub async fn dispatch(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let branch = classify(req.uri().path());
    for stage in state.pipelines.stages(branch) {
        if let StageOutcome::Respond(resp) = stage.run(&state, &mut req) {
            return resp;
        }
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity attached to the request by a stage.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub ticket: AuthenticationTicket,
}

impl AuthenticatedIdentity {
    pub fn new(ticket: AuthenticationTicket) -> Self {
        Self { ticket }
    }
}

/// The caller's identity, if a stage found one.
pub struct MaybeIdentity(pub Option<AuthenticationTicket>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(
            parts
                .extensions
                .get::<AuthenticatedIdentity>()
                .map(|identity| identity.ticket.clone()),
        ))
    }
}

/// The caller's identity; 401 with a Bearer challenge otherwise.
pub struct RequireIdentity(pub AuthenticationTicket);

impl<S: Send + Sync> FromRequestParts<S> for RequireIdentity {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .map(|identity| RequireIdentity(identity.ticket.clone()))
            .ok_or_else(|| bearer::challenge(Some(AuthenticationFailure::Missing)))
    }
}

// ---------------------------------------------------------------------------
// Security headers
// ---------------------------------------------------------------------------

/// Hardening headers on every response, whichever branch produced it.
pub fn with_security_headers(router: Router) -> Router {
    router
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::middleware as axum_mw;
    use axum::routing::get;
    use chrono::Duration;
    use tower::ServiceExt;

    use crate::protection::{schemes, Purpose};

    #[test]
    fn api_prefix_classifies_as_api() {
        for path in ["/api", "/api/", "/api/resource", "/API/resource", "/Api/v1/x"] {
            assert_eq!(classify(path), Branch::Api, "{}", path);
        }
    }

    #[test]
    fn everything_else_is_web() {
        for path in ["/", "", "/authorize", "/token", "/apiary", "/signin", "/x/api/y", "api/resource"] {
            assert_eq!(classify(path), Branch::Web, "{}", path);
        }
    }

    #[test]
    fn classification_is_stable() {
        for _ in 0..100 {
            assert_eq!(classify("/api/resource"), Branch::Api);
            assert_eq!(classify("/authorize"), Branch::Web);
        }
    }

    #[test]
    fn multibyte_paths_do_not_panic() {
        assert_eq!(classify("/é"), Branch::Web);
        assert_eq!(classify("/aé/"), Branch::Web);
    }

    #[test]
    fn default_pipelines_use_one_scheme_each() {
        let pipelines = Pipelines::default();
        assert_eq!(pipelines.stages(Branch::Api), &[Stage::BearerAuthentication]);
        assert_eq!(pipelines.stages(Branch::Web), &[Stage::CookieAuthentication]);
    }

    async fn whoami(MaybeIdentity(identity): MaybeIdentity) -> String {
        identity.map(|t| t.principal).unwrap_or_else(|| "anonymous".into())
    }

    fn test_app(state: AppState) -> Router {
        let router = Router::new()
            .route("/api/whoami", get(whoami))
            .route("/whoami", get(whoami))
            .layer(axum_mw::from_fn_with_state(state.clone(), dispatch))
            .with_state(state);
        with_security_headers(router)
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn api_branch_ignores_cookies() {
        let state = AppState::for_tests();
        let ticket = AuthenticationTicket::new("alice", schemes::COOKIE, Duration::minutes(5));
        let blob = state.protector.protect(&ticket, &Purpose::COOKIE).unwrap();

        let req = Request::builder()
            .uri("/api/whoami")
            .header(header::COOKIE, format!("{}={}", cookie::SESSION_COOKIE, blob))
            .body(Body::empty())
            .unwrap();
        let resp = test_app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "anonymous");
    }

    #[tokio::test]
    async fn web_branch_ignores_bearer_tokens() {
        let state = AppState::for_tests();
        let ticket = AuthenticationTicket::new("alice", schemes::BEARER, Duration::minutes(5));
        let token = state.protector.protect(&ticket, &Purpose::BEARER).unwrap();

        let req = Request::builder()
            .uri("/whoami")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let resp = test_app(state).oneshot(req).await.unwrap();
        assert_eq!(body_text(resp).await, "anonymous");
    }

    #[tokio::test]
    async fn invalid_bearer_short_circuits_before_handler() {
        let state = AppState::for_tests();
        let req = Request::builder()
            .uri("/api/whoami")
            .header(header::AUTHORIZATION, "Bearer forged")
            .body(Body::empty())
            .unwrap();
        let resp = test_app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::X_FRAME_OPTIONS], "DENY");
    }

    #[tokio::test]
    async fn valid_session_reaches_web_handler() {
        let state = AppState::for_tests();
        let ticket = AuthenticationTicket::new("alice", schemes::COOKIE, Duration::minutes(5));
        let blob = state.protector.protect(&ticket, &Purpose::COOKIE).unwrap();

        let req = Request::builder()
            .uri("/whoami")
            .header(header::COOKIE, format!("{}={}", cookie::SESSION_COOKIE, blob))
            .body(Body::empty())
            .unwrap();
        let resp = test_app(state).oneshot(req).await.unwrap();
        assert_eq!(body_text(resp).await, "alice");
    }

    #[tokio::test]
    async fn security_headers_on_every_response() {
        let state = AppState::for_tests();
        let req = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let resp = test_app(state).oneshot(req).await.unwrap();
        let headers = resp.headers();
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block");
        assert!(headers[header::CONTENT_SECURITY_POLICY]
            .to_str()
            .unwrap()
            .starts_with("default-src 'self'"));
    }
}
