//! External identity providers for browser sign-in.
//!
//! A provider only has to produce an authorization URL and turn a callback
//! code into an [`ExternalIdentity`]. State, nonce and session handling live
//! in [`handlers`] and are the same for every provider.

#[cfg(test)]
pub mod fake;
pub mod handlers;
pub mod provider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use provider::{OAuth2Provider, OAuth2ProviderConfig};

/// Identity asserted by an external provider after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Nonce echoed back in the provider's id_token, if it issued one.
    pub nonce: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable identifier, used in the callback path and correlation cookie.
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;

    /// Where to send the browser to start the provider's authorization-code
    /// handshake.
    fn authorization_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> String;

    /// Redeem the callback `code`. Callers bound this with a timeout.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ExternalIdentity, ProviderError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. A provider with the same name replaces the old one.
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.retain(|p| p.name() != provider.name());
        log::info!(
            "Identity provider registered: name={} display_name={}",
            provider.name(),
            provider.display_name()
        );
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn list(&self) -> &[Arc<dyn IdentityProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
