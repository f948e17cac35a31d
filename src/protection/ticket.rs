use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claim types used across the server.
pub mod claims {
    pub const SUBJECT: &str = "sub";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    /// Which external provider asserted the identity.
    pub const IDENTITY_PROVIDER: &str = "idp";
}

/// Scheme tags stamped on tickets by whoever minted them.
pub mod schemes {
    pub const BEARER: &str = "Bearer";
    pub const COOKIE: &str = "ServerCookie";
    pub const AUTHORIZATION_CODE: &str = "AuthorizationCode";
    pub const CORRELATION: &str = "Correlation";
}

/// An authenticated identity plus claims, before protection or after
/// unprotection.
///
/// `properties` carries data bound to the ticket that is not part of the
/// identity itself: the client an authorization code was issued to, the
/// `state` of a pending external sign-in, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationTicket {
    pub principal: String,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub scheme: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticationTicket {
    /// New ticket issued now, valid for `lifetime`.
    pub fn new(principal: impl Into<String>, scheme: impl Into<String>, lifetime: Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            principal: principal.into(),
            claims: BTreeMap::new(),
            properties: BTreeMap::new(),
            scheme: scheme.into(),
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(claim_type.into(), value.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn claim(&self, claim_type: &str) -> Option<&str> {
        self.claims.get(claim_type).map(String::as_str)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Same identity and claims under a new scheme and lifetime. Properties
    /// are not carried over.
    pub fn reissue(&self, scheme: impl Into<String>, lifetime: Duration) -> Self {
        let mut ticket = Self::new(self.principal.clone(), scheme, lifetime);
        ticket.claims = self.claims.clone();
        ticket
    }

    /// Seconds left before expiry, never negative.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ticket_expires_after_lifetime() {
        let ticket = AuthenticationTicket::new("alice", schemes::COOKIE, Duration::minutes(5));
        assert!(!ticket.is_expired_at(ticket.issued_at));
        assert!(ticket.is_expired_at(ticket.issued_at + Duration::minutes(5)));
        assert_eq!(ticket.remaining_secs(ticket.issued_at), 300);
    }

    #[test]
    fn claim_order_does_not_matter() {
        let a = AuthenticationTicket::new("alice", schemes::BEARER, Duration::minutes(1))
            .with_claim(claims::NAME, "Alice")
            .with_claim(claims::EMAIL, "alice@example.com");
        let mut b = a.clone();
        b.claims.clear();
        b.claims.insert(claims::EMAIL.into(), "alice@example.com".into());
        b.claims.insert(claims::NAME.into(), "Alice".into());
        assert_eq!(a, b);
    }

    #[test]
    fn reissue_keeps_claims_drops_properties() {
        let code = AuthenticationTicket::new("alice", schemes::AUTHORIZATION_CODE, Duration::minutes(5))
            .with_claim(claims::NAME, "Alice")
            .with_property("client_id", "myClient");
        let access = code.reissue(schemes::BEARER, Duration::hours(1));

        assert_eq!(access.principal, "alice");
        assert_eq!(access.scheme, schemes::BEARER);
        assert_eq!(access.claim(claims::NAME), Some("Alice"));
        assert!(access.properties.is_empty());
    }

    #[test]
    fn remaining_secs_clamps_at_zero() {
        let ticket = AuthenticationTicket::new("alice", schemes::BEARER, Duration::seconds(10));
        assert_eq!(ticket.remaining_secs(ticket.expires_at + Duration::seconds(30)), 0);
    }
}
