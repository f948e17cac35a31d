use std::net::SocketAddr;

use axum::http::{StatusCode, Uri};
use axum::{middleware as axum_middleware, routing, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::error::ConfigurationError;
use crate::federation::handlers as federation;
use crate::oauth::{authorize, metadata, token};
use crate::pipeline;
use crate::{api, AppState};

/// Cross-origin reads are allowed only for public metadata and the API.
/// `/authorize`, `/token` and sign-in stay same-origin.
fn public_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Every route, behind the path-split pipeline and the security headers.
pub fn router(state: AppState) -> Router {
    let app = Router::new()
        // Authorization server
        .route(
            "/authorize",
            routing::get(authorize::authorize_query).post(authorize::authorize_form),
        )
        .route("/token", routing::post(token::token_exchange))
        .route(
            "/.well-known/openid-configuration",
            routing::get(metadata::openid_configuration).layer(public_cors()),
        )
        .route(
            "/.well-known/jwks",
            routing::get(metadata::jwks).layer(public_cors()),
        )
        // Browser sign-in
        .route(
            "/signin",
            routing::get(federation::sign_in_page).post(federation::challenge),
        )
        .route(
            "/signin/callback/{provider}",
            routing::get(federation::callback),
        )
        .route(
            "/signout",
            routing::get(federation::sign_out).post(federation::sign_out),
        )
        // Protected resources
        .route(
            "/api/resource",
            routing::get(api::resource).layer(public_cors()),
        )
        .fallback(not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            pipeline::dispatch,
        ))
        .with_state(state);

    pipeline::with_security_headers(app)
}

async fn not_found(uri: Uri) -> StatusCode {
    log::debug!("No route for {}", uri.path());
    StatusCode::NOT_FOUND
}

pub async fn serve(state: AppState, bind: SocketAddr) -> Result<(), ConfigurationError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("Authorization server listening on {}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
