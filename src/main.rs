use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use oidc_gate::config::ServerConfig;
use oidc_gate::credentials::{KeyMaterial, SigningCredential};
use oidc_gate::federation::{OAuth2Provider, ProviderRegistry};
use oidc_gate::oauth::ClientStore;
use oidc_gate::{server, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // Logs go to stderr so stdout stays free for scripting.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("oidc-gate starting");

    let material = match &config.signing_key {
        Some(path) => KeyMaterial::from_file(path, config.key_passphrase())?,
        None => {
            tracing::warn!("No --signing-key given, using the embedded demo key");
            KeyMaterial::embedded()
        }
    };
    let credential = SigningCredential::load(&material)
        .with_context(|| format!("Cannot load signing key from {}", material.origin()))?;
    tracing::info!(
        "Signing key loaded: kid={} alg={}",
        credential.key_id(),
        credential.algorithm().jose_name()
    );

    let settings = config.settings()?;

    let clients = match &config.data_dir {
        Some(dir) => ClientStore::load(dir),
        None => ClientStore::in_memory(),
    };
    if let Some(registration) = config.seed_client() {
        clients.seed(registration);
    }

    let mut providers = ProviderRegistry::new();
    match (&config.google_client_id, &config.google_client_secret) {
        (Some(id), Some(secret)) => {
            providers.register(Arc::new(OAuth2Provider::google(id, secret)?));
        }
        (None, None) => {}
        _ => tracing::warn!("Google sign-in disabled: both client id and secret are required"),
    }
    if providers.is_empty() {
        tracing::warn!("No external identity providers configured; browser sign-in is unavailable");
    }

    let state = AppState::new(Arc::new(credential), clients, providers, settings)?;
    server::serve(state, config.bind).await?;

    Ok(())
}
