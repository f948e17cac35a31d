use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::types::*;

const CLIENTS_FILE: &str = "clients.json";

// ---------------------------------------------------------------------------
// ClientStore: registered relying parties
// ---------------------------------------------------------------------------

/// Registered clients, optionally persisted to `clients.json` in a data
/// directory. Without a data directory the store lives in memory only.
pub struct ClientStore {
    data_dir: Option<PathBuf>,
    clients: Mutex<HashMap<String, RegisteredClient>>,
}

impl ClientStore {
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted clients from disk, or start empty.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(CLIENTS_FILE);
        let clients: HashMap<String, RegisteredClient> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        log::info!("Client store loaded: {} clients from {}", clients.len(), path.display());

        Self {
            data_dir: Some(data_dir.to_path_buf()),
            clients: Mutex::new(clients),
        }
    }

    /// Insert `registration` unless a client with the same id exists. The
    /// existing record is never overwritten.
    pub fn seed(&self, registration: ClientRegistration) -> Seeded {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if clients.contains_key(&registration.client_id) {
            log::info!(
                "Client seed skipped: client_id={} already registered",
                registration.client_id
            );
            return Seeded::AlreadyPresent;
        }

        let client = RegisteredClient {
            client_id: registration.client_id.clone(),
            display_name: registration.display_name,
            redirect_uri: registration.redirect_uri,
            secret_sha256: hash_secret(&registration.secret),
            registered_at: Utc::now(),
        };
        log::info!(
            "Client seeded: client_id={} name={}",
            client.client_id,
            client.display_name
        );
        clients.insert(registration.client_id, client);
        drop(clients);
        self.save();
        Seeded::Inserted
    }

    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id).cloned()
    }

    pub fn list(&self) -> Vec<RegisteredClient> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.values().cloned().collect()
    }

    /// Look up the client and check its secret in constant time.
    pub fn authenticate(&self, client_id: &str, secret: &str) -> Option<RegisteredClient> {
        let client = self.get(client_id)?;
        let presented = hash_secret(secret);
        let matches: bool = presented
            .as_bytes()
            .ct_eq(client.secret_sha256.as_bytes())
            .into();
        matches.then_some(client)
    }

    fn save(&self) {
        let Some(dir) = &self.data_dir else {
            return;
        };
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string_pretty(&*clients).unwrap_or_default();
        let path = dir.join(CLIENTS_FILE);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, json)) {
            log::error!("Failed to save clients to {}: {}", path.display(), e);
        }
    }
}

// ---------------------------------------------------------------------------
// RedemptionLedger: one-time-use markers for authorization codes
// ---------------------------------------------------------------------------

/// Remembers redeemed authorization codes until they would have expired
/// anyway. Check and mark happen under one lock, so two concurrent
/// redemptions of the same code cannot both succeed.
#[derive(Default)]
pub struct RedemptionLedger {
    redeemed: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RedemptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `code_id` is presented, `false` after.
    pub fn try_redeem(&self, code_id: &str, expires_at: DateTime<Utc>) -> bool {
        let mut redeemed = self.redeemed.lock().unwrap_or_else(|e| e.into_inner());
        // Lazy cleanup
        let now = Utc::now();
        redeemed.retain(|_, exp| *exp > now);

        if redeemed.contains_key(code_id) {
            return false;
        }
        redeemed.insert(code_id.to_string(), expires_at);
        true
    }

    pub fn len(&self) -> usize {
        self.redeemed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
