use axum::Json;
use serde::Serialize;

use crate::oauth::types::code_properties;
use crate::pipeline::RequireIdentity;
use crate::protection::claims;

#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Sample protected resource.
///
/// `GET /api/resource`
pub async fn resource(RequireIdentity(ticket): RequireIdentity) -> Json<ResourceResponse> {
    let owned = |v: Option<&str>| v.map(str::to_owned);
    Json(ResourceResponse {
        name: owned(ticket.claim(claims::NAME)),
        email: owned(ticket.claim(claims::EMAIL)),
        client_id: owned(ticket.property(code_properties::CLIENT_ID)),
        scope: owned(ticket.property(code_properties::SCOPE)),
        expires_at: ticket.expires_at,
        subject: ticket.principal,
    })
}
