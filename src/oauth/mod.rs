//! OAuth 2.0 / OpenID Connect authorization server.
//!
//! - Authorization Code grant (RFC 6749 §4.1) with single-use codes
//! - `client_secret_basic` and `client_secret_post` client authentication
//! - RS256 `id_token` when `openid` is in scope
//! - Minimal discovery document and JWKS
//!
//! Authorization codes and access tokens are protected tickets, not database
//! rows. The only server-side state is the registered-client store and the
//! ledger of redeemed codes.

pub mod authorize;
pub mod metadata;
pub mod store;
pub mod token;
pub mod types;

pub use store::{ClientStore, RedemptionLedger};
