//! OAuth2 token broker
//!
//! Holds the single shared credential for the remote API. Refreshes are
//! serialized: a caller that observes a refresh in flight waits for its
//! outcome instead of issuing a parallel grant request. Tokens persist
//! to an AES-256-GCM-encrypted file; the new record is written before
//! the in-memory token is swapped.

use std::path::PathBuf;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{truncate_body, Error, Result};
use crate::transport::TransportSettings;

/// Access tokens within this window of expiry count as expired.
fn expiry_leeway() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

/// OAuth2 provider endpoints and client credentials.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Token endpoint URL
    pub token_url: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Lightweight authenticated endpoint probed by `validate_token`
    pub validate_url: String,
}

/// The stored credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl OAuth2Token {
    /// `true` while the access token is usable (with leeway).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expires_at - expiry_leeway() > Utc::now()
    }
}

/// Outcome of a token probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValidity {
    Valid,
    Invalid,
}

/// Provider token response shape.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

/// Serializes refresh attempts on one shared credential.
pub struct TokenBroker {
    config: OAuthConfig,
    http: reqwest::Client,
    fallback: reqwest::Client,
    current: RwLock<Option<OAuth2Token>>,
    refresh_gate: Mutex<()>,
    store: Option<Arc<TokenFileStore>>,
}

impl TokenBroker {
    /// Create a broker. The primary transport has proxy resolution
    /// disabled; the fallback honors system proxies.
    pub fn new(config: OAuthConfig, settings: &TransportSettings) -> Result<Self> {
        Ok(Self {
            http: settings.build_direct()?,
            fallback: settings.build_with_proxy()?,
            current: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            store: None,
            config,
        })
    }

    /// Attach the encrypted token store and seed the in-memory token
    /// from it if a record exists.
    #[must_use]
    pub fn with_store(mut self, store: Arc<TokenFileStore>) -> Self {
        if let Some(token) = store.load() {
            self.current = RwLock::new(Some(token));
        }
        self.store = Some(store);
        self
    }

    /// Snapshot of the current token.
    pub async fn current(&self) -> Option<OAuth2Token> {
        self.current.read().await.clone()
    }

    /// Install a token obtained out of band (initial authorization) and
    /// persist it.
    pub async fn install(&self, token: OAuth2Token) -> Result<()> {
        self.persist(&token)?;
        *self.current.write().await = Some(token);
        Ok(())
    }

    /// Return a usable access token, refreshing if the current one is
    /// missing or expired.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.current.read().await.as_ref() {
            if token.is_valid() {
                return Ok(token.access_token.clone());
            }
        }
        self.refresh().await.map(|t| t.access_token)
    }

    /// Refresh the shared credential. Concurrent callers share one
    /// provider POST: whoever holds the gate performs it, everyone else
    /// waits and observes the result.
    pub async fn refresh(&self) -> Result<OAuth2Token> {
        let _gate = self.refresh_gate.lock().await;

        // A waiter arriving after a successful refresh reuses it.
        if let Some(token) = self.current.read().await.as_ref() {
            if token.is_valid() {
                return Ok(token.clone());
            }
        }

        self.refresh_locked().await
    }

    /// Refresh after the remote rejected `failed_access_token` with 401.
    ///
    /// The expiry fast-path is skipped (the remote is authoritative),
    /// but a caller whose token was already rotated by someone else
    /// gets the rotated token without a second POST.
    pub async fn refresh_after_auth_failure(
        &self,
        failed_access_token: &str,
    ) -> Result<OAuth2Token> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(token) = self.current.read().await.as_ref() {
            if token.access_token != failed_access_token && token.is_valid() {
                return Ok(token.clone());
            }
        }

        self.refresh_locked().await
    }

    /// Perform the provider POST. Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<OAuth2Token> {
        let refresh_token = self
            .current
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or_else(|| Error::OAuth("no refresh token available".to_string()))?;

        match self.request_refresh(&refresh_token).await {
            Ok(token) => {
                self.persist(&token)?;
                *self.current.write().await = Some(token.clone());
                debug!(expires_at = %token.expires_at, "token refreshed");
                Ok(token)
            }
            Err(e @ Error::Revoked(_)) => {
                // Only a definitively revoked refresh token clears state.
                *self.current.write().await = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Probe the remote with an access token.
    ///
    /// 200 → valid; 401/403 → invalid; anything else is an error.
    pub async fn validate_token(&self, access_token: &str) -> Result<TokenValidity> {
        let response = self
            .http
            .get(&self.config.validate_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("token probe failed: {e}")))?;

        match response.status().as_u16() {
            200 => Ok(TokenValidity::Valid),
            401 | 403 => Ok(TokenValidity::Invalid),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Upstream {
                    status,
                    body: truncate_body(&body, 200),
                })
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<OAuth2Token> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = match self.http.post(&self.config.token_url).form(&form).send().await {
            Ok(resp) => resp,
            Err(primary_err) if primary_err.is_connect() => {
                warn!("direct token request failed to connect, retrying via fallback transport");
                self.fallback
                    .post(&self.config.token_url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| Error::Network(format!("token refresh request failed: {e}")))?
            }
            Err(e) => return Err(Error::Network(format!("token refresh request failed: {e}"))),
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            if body.contains("invalid_grant") {
                return Err(Error::Revoked(truncate_body(&body, 200)));
            }
            return Err(Error::OAuth(format!(
                "token refresh failed (HTTP {status}): {}",
                truncate_body(&body, 200)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::OAuth(format!("invalid token response: {e}")))?;

        let now = Utc::now();
        Ok(OAuth2Token {
            access_token: parsed.access_token,
            // Provider may rotate the refresh token or keep it.
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            token_type: parsed.token_type,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in),
            issued_at: now,
        })
    }

    fn persist(&self, token: &OAuth2Token) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(token)?;
        }
        Ok(())
    }
}

// ── Encrypted token store ──

/// File-backed token record, AES-256-GCM encrypted at rest.
pub struct TokenFileStore {
    path: PathBuf,
}

impl TokenFileStore {
    /// Store rooted at an explicit file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Write the token record. A temp file is written and renamed so
    /// the previous record is only discarded once the new one is
    /// durable.
    pub fn save(&self, token: &OAuth2Token) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::OAuth(format!("failed to create token dir: {e}")))?;
        }

        let json = serde_json::to_vec(token)
            .map_err(|e| Error::OAuth(format!("failed to serialize token: {e}")))?;
        let encrypted = encrypt_token_data(&json).map_err(Error::OAuth)?;
        let encoded = URL_SAFE_NO_PAD.encode(&encrypted);

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &encoded)
            .map_err(|e| Error::OAuth(format!("failed to write token file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&tmp, perms);
        }

        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::OAuth(format!("failed to commit token file: {e}")))?;

        debug!(path = %self.path.display(), "token record saved");
        Ok(())
    }

    /// Read the token record, if one exists and decrypts.
    #[must_use]
    pub fn load(&self) -> Option<OAuth2Token> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let encrypted = URL_SAFE_NO_PAD.decode(content.trim()).ok()?;
        let decrypted = match decrypt_token_data(&encrypted) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to decrypt token record: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<OAuth2Token>(&decrypted) {
            Ok(token) if !token.access_token.is_empty() => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to parse token record: {e}");
                None
            }
        }
    }
}

/// Derive the 256-bit at-rest key.
///
/// Uses `FEEDMILL_MASTER_KEY` if set, otherwise machine-specific data.
fn derive_token_encryption_key() -> [u8; 32] {
    let master_key = std::env::var("FEEDMILL_MASTER_KEY").unwrap_or_else(|_| {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "feedmill-default".to_string());
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "feedmill-user".to_string());
        format!("feedmill-auto-key-{hostname}-{username}")
    });

    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    hasher.update(b"feedmill-oauth-token-store-v1");
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// Encrypt with AES-256-GCM, random 12-byte nonce. Returns
/// nonce || ciphertext.
fn encrypt_token_data(plaintext: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let key_bytes = derive_token_encryption_key();
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| format!("failed to create cipher: {e}"))?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| format!("encryption failed: {e}"))?;

    let mut result = nonce_bytes.to_vec();
    result.extend(ciphertext);
    Ok(result)
}

/// Decrypt nonce || ciphertext produced by `encrypt_token_data`.
fn decrypt_token_data(encrypted: &[u8]) -> std::result::Result<Vec<u8>, String> {
    if encrypted.len() < 12 {
        return Err("invalid encrypted data: too short".to_string());
    }

    let key_bytes = derive_token_encryption_key();
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| format!("failed to create cipher: {e}"))?;

    let (nonce_bytes, ciphertext) = encrypted.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| format!("decryption failed: {e}"))
}
