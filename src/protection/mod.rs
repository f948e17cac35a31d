//! Ticket protection: authenticated encryption of [`AuthenticationTicket`]s
//! into opaque URL-safe blobs, isolated by purpose.
//!
//! Blob layout (before base64url): `version ‖ nonce(12) ‖ ciphertext ‖ tag(16)`.
//! Each purpose gets its own AES-256-GCM key via HKDF, and the purpose is also
//! bound as associated data, so a blob minted for one purpose never opens
//! under another.

pub mod ticket;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hkdf::{Prk, Salt, HKDF_SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::credentials::SigningCredential;
use crate::error::{AuthenticationFailure, ConfigurationError, ProtectionError};

pub use ticket::{claims, schemes, AuthenticationTicket};

const BLOB_VERSION: u8 = 1;
const TAG_LEN: usize = 16;
const PROTECTION_SALT: &[u8] = b"oidc-gate.ticket-protection.v1";

/// Purpose strings scoping a protector. Two purposes are equal only if every
/// segment matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Purpose(&'static [&'static str]);

impl Purpose {
    pub const BEARER: Purpose = Purpose(&["oidc-gate.bearer", "Bearer", "v1"]);
    pub const COOKIE: Purpose = Purpose(&["oidc-gate.cookie", "ServerCookie", "v1"]);
    pub const AUTHORIZATION_CODE: Purpose = Purpose(&["oidc-gate.authorization-code", "v1"]);
    pub const CORRELATION: Purpose = Purpose(&["oidc-gate.correlation", "v1"]);

    pub const fn new(segments: &'static [&'static str]) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &'static [&'static str] {
        self.0
    }

    /// Length-prefixed encoding so `["ab","c"]` and `["a","bc"]` differ.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in self.0 {
            out.extend_from_slice(&(segment.len() as u32).to_be_bytes());
            out.extend_from_slice(segment.as_bytes());
        }
        out
    }
}

/// Protects and unprotects tickets. Holds only read-only key material, so a
/// single instance is shared by every request.
pub struct TicketProtector {
    prk: Prk,
    rng: SystemRandom,
}

impl TicketProtector {
    /// Derive the protection key from the signing credential, so both are
    /// rotated together.
    pub fn from_credential(credential: &SigningCredential) -> Result<Self, ConfigurationError> {
        let seed = credential.protection_seed()?;
        Self::from_secret(seed.as_bytes())
    }

    pub fn from_secret(secret: &[u8]) -> Result<Self, ConfigurationError> {
        if secret.is_empty() {
            return Err(ConfigurationError::KeyDerivation);
        }
        let prk = Salt::new(HKDF_SHA256, PROTECTION_SALT).extract(secret);
        Ok(Self {
            prk,
            rng: SystemRandom::new(),
        })
    }

    fn key_for(&self, purpose: &Purpose) -> Option<LessSafeKey> {
        let info = purpose.encode();
        let info_parts = [info.as_slice()];
        let okm = self.prk.expand(&info_parts, &AES_256_GCM).ok()?;
        Some(LessSafeKey::new(UnboundKey::from(okm)))
    }

    /// Serialize and encrypt `ticket`. A fresh random nonce is used per call,
    /// so protecting the same ticket twice yields different blobs.
    pub fn protect(
        &self,
        ticket: &AuthenticationTicket,
        purpose: &Purpose,
    ) -> Result<String, ProtectionError> {
        let key = self.key_for(purpose).ok_or(ProtectionError::Seal)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| ProtectionError::Rng)?;

        let mut in_out = serde_json::to_vec(ticket)?;
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(purpose.encode()),
            &mut in_out,
        )
        .map_err(|_| ProtectionError::Seal)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Decrypt and deserialize. `None` for anything that is not a blob this
    /// protector produced for exactly this purpose. Expiry is not checked.
    pub fn unprotect(&self, blob: &str, purpose: &Purpose) -> Option<AuthenticationTicket> {
        let raw = URL_SAFE_NO_PAD.decode(blob.trim()).ok()?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN || raw[0] != BLOB_VERSION {
            return None;
        }

        let nonce = Nonce::try_assume_unique_for_key(&raw[1..1 + NONCE_LEN]).ok()?;
        let mut in_out = raw[1 + NONCE_LEN..].to_vec();
        let key = self.key_for(purpose)?;
        let plaintext = key
            .open_in_place(nonce, Aad::from(purpose.encode()), &mut in_out)
            .ok()?;

        serde_json::from_slice(plaintext).ok()
    }

    /// Unprotect and check expiry against `now`.
    pub fn authenticate(
        &self,
        blob: &str,
        purpose: &Purpose,
        now: DateTime<Utc>,
    ) -> Result<AuthenticationTicket, AuthenticationFailure> {
        let ticket = self
            .unprotect(blob, purpose)
            .ok_or(AuthenticationFailure::Invalid)?;
        if ticket.is_expired_at(now) {
            return Err(AuthenticationFailure::Expired);
        }
        Ok(ticket)
    }
}
