use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

/// OpenID Connect Discovery 1.0 §3 (minimal).
///
/// `GET /.well-known/openid-configuration`
pub async fn openid_configuration(State(state): State<AppState>) -> Json<Value> {
    let settings = &state.settings;
    Json(json!({
        "issuer": settings.issuer,
        "authorization_endpoint": settings.endpoint("authorize"),
        "token_endpoint": settings.endpoint("token"),
        "jwks_uri": settings.endpoint(".well-known/jwks"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [state.credential.algorithm().jose_name()],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "scopes_supported": ["openid", "profile", "email"],
        "claims_supported": ["sub", "iss", "aud", "exp", "iat", "nonce", "name", "email"]
    }))
}

/// The public signing key as a JWK Set.
///
/// `GET /.well-known/jwks`
pub async fn jwks(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "keys": [state.credential.jwk()] }))
}
