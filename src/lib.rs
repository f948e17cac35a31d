pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod federation;
pub mod oauth;
pub mod pipeline;
pub mod protection;
pub mod server;

use std::sync::Arc;

use config::ServerSettings;
use credentials::SigningCredential;
use error::ConfigurationError;
use federation::ProviderRegistry;
use oauth::{ClientStore, RedemptionLedger};
use pipeline::Pipelines;
use protection::TicketProtector;

/// Shared state handed to every handler and pipeline stage.
#[derive(Clone)]
pub struct AppState {
    pub credential: Arc<SigningCredential>,
    pub protector: Arc<TicketProtector>,
    pub clients: Arc<ClientStore>,
    pub redemptions: Arc<RedemptionLedger>,
    pub providers: Arc<ProviderRegistry>,
    pub pipelines: Arc<Pipelines>,
    pub settings: Arc<ServerSettings>,
}

impl AppState {
    /// Derive the ticket protector from `credential` and assemble the state.
    pub fn new(
        credential: Arc<SigningCredential>,
        clients: ClientStore,
        providers: ProviderRegistry,
        settings: ServerSettings,
    ) -> Result<Self, ConfigurationError> {
        let protector = TicketProtector::from_credential(&credential)?;
        Ok(Self {
            credential,
            protector: Arc::new(protector),
            clients: Arc::new(clients),
            redemptions: Arc::new(RedemptionLedger::new()),
            providers: Arc::new(providers),
            pipelines: Arc::new(Pipelines::default()),
            settings: Arc::new(settings),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::for_tests_with(ProviderRegistry::new(), ServerSettings::default())
    }

    /// Embedded key, in-memory store seeded with the demo client.
    #[cfg(test)]
    pub(crate) fn for_tests_with(providers: ProviderRegistry, settings: ServerSettings) -> Self {
        use std::sync::OnceLock;

        static CREDENTIAL: OnceLock<Arc<SigningCredential>> = OnceLock::new();
        let credential = CREDENTIAL
            .get_or_init(|| {
                Arc::new(
                    SigningCredential::load(&credentials::KeyMaterial::embedded())
                        .expect("embedded key loads"),
                )
            })
            .clone();

        let clients = ClientStore::in_memory();
        clients.seed(oauth::types::ClientRegistration::demo());
        Self::new(credential, clients, providers, settings).expect("test state")
    }
}
