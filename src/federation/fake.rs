//! In-memory `IdentityProvider` for tests. Records the nonce from the
//! authorization URL and echoes it (or a configured one) on exchange.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExternalIdentity, IdentityProvider};
use crate::error::ProviderError;

pub enum NonceEcho {
    /// Echo the nonce of the last authorization URL.
    Matching,
    Fixed(String),
    Omit,
}

pub struct FakeProvider {
    name: String,
    display_name: String,
    subject: String,
    delay: Option<Duration>,
    nonce_echo: NonceEcho,
    last_nonce: Mutex<Option<String>>,
    exchanged_codes: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: format!("Fake {}", name),
            subject: "fake-user-1".into(),
            delay: None,
            nonce_echo: NonceEcho::Matching,
            last_nonce: Mutex::new(None),
            exchanged_codes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_nonce_echo(mut self, echo: NonceEcho) -> Self {
        self.nonce_echo = echo;
        self
    }

    pub fn exchanged_codes(&self) -> Vec<String> {
        self.exchanged_codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> String {
        *self.last_nonce.lock().unwrap() = Some(nonce.to_string());
        format!(
            "https://idp.test/authorize?redirect_uri={}&state={}&nonce={}",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(nonce)
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<ExternalIdentity, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.exchanged_codes.lock().unwrap().push(code.to_string());

        let nonce = match &self.nonce_echo {
            NonceEcho::Matching => self.last_nonce.lock().unwrap().clone(),
            NonceEcho::Fixed(n) => Some(n.clone()),
            NonceEcho::Omit => None,
        };
        Ok(ExternalIdentity {
            subject: self.subject.clone(),
            name: Some("Fake User".into()),
            email: Some("fake@idp.test".into()),
            nonce,
        })
    }
}
