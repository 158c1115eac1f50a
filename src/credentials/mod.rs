//! Encrypted-at-rest storage for the recognition-service API key.
//!
//! The plaintext key exists only in memory: at rest it is an AES-GCM
//! blob bound to this device's fingerprint, behind an abstract key/value
//! surface. Verification talks to the service's token-introspection
//! endpoint and nothing is persisted unless verification succeeds.

mod crypto;

pub use crypto::{decrypt, encrypt, DeviceFingerprint, EncryptedBlob};

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde::Deserialize;

use crate::error::CredentialError;
use crate::host::KvStore;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_KEY_LEN: usize = 32;

/// Successful verification result.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub scopes: Vec<String>,
    pub project_id: String,
    pub expires_at: Option<String>,
}

/// Bounded projection of the stored credential; never contains the key.
#[derive(Debug, Clone, Default)]
pub struct KeyInfo {
    pub present: bool,
    pub scopes: Vec<String>,
    pub verified_at_ms: Option<u64>,
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTokenResponse {
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    project_uuid: String,
    #[serde(default)]
    expires: Option<String>,
}

/// Owns credential persistence for one service namespace.
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    http: reqwest::Client,
    service_host: String,
    namespace: String,
    material: String,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>, service_host: &str) -> Self {
        Self::with_passphrase(kv, service_host, None)
    }

    /// A user passphrase strengthens the derived key beyond the device
    /// fingerprint.
    pub fn with_passphrase(
        kv: Arc<dyn KvStore>,
        service_host: &str,
        passphrase: Option<&str>,
    ) -> Self {
        let fingerprint = DeviceFingerprint::collect();
        let mut material = fingerprint.material();
        if let Some(passphrase) = passphrase {
            material.push('|');
            material.push_str(passphrase);
        }
        Self {
            kv,
            http: reqwest::Client::new(),
            service_host: service_host.to_string(),
            namespace: "deepgram".to_string(),
            material,
        }
    }

    /// Format policy for keys, applied before any network traffic. Not a
    /// cryptographic check.
    pub fn validate_format(raw: &str) -> Result<String, CredentialError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::InvalidFormat("key is empty".to_string()));
        }
        if trimmed.len() < MIN_KEY_LEN {
            return Err(CredentialError::InvalidFormat(format!(
                "key is too short ({} < {} characters)",
                trimmed.len(),
                MIN_KEY_LEN
            )));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
        {
            return Err(CredentialError::InvalidFormat(format!(
                "key contains invalid character {:?}",
                bad
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Display helper: first 8 and last 4 characters survive. Not a
    /// security boundary.
    pub fn mask_key(key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() < 12 {
            return "***".to_string();
        }
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 12), tail)
    }

    /// Check the key against the service without mutating anything.
    pub async fn verify(&self, api_key: &str) -> Result<AuthInfo, CredentialError> {
        let key = Self::validate_format(api_key)?;
        let url = format!("https://{}/v1/auth/token", self.service_host);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", key))
            .timeout(VERIFY_TIMEOUT)
            .send()
            .await
            .map_err(|e| CredentialError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(map_verify_status(status));
        }

        let body: AuthTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::NetworkError(e.to_string()))?;

        debug!("key verified for project {}", body.project_uuid);
        Ok(AuthInfo {
            scopes: body.scopes,
            project_id: body.project_uuid,
            expires_at: body.expires,
        })
    }

    /// Verify, encrypt, persist. No storage mutation happens unless every
    /// step succeeds.
    pub async fn verify_and_save(&self, api_key: &str) -> Result<AuthInfo, CredentialError> {
        let key = Self::validate_format(api_key)?;
        let info = self.verify(&key).await?;

        let material = self.material.clone();
        let key_clone = key.clone();
        let blob = tokio::task::spawn_blocking(move || encrypt(&key_clone, &material))
            .await
            .map_err(|e| CredentialError::Storage(e.to_string()))??;

        self.kv_set(&self.key_name("api_key_encrypted"), &blob.encode())
            .await?;
        self.kv_set(&self.key_name("api_key_verified_at"), &now_ms().to_string())
            .await?;
        self.kv_set(
            &self.key_name("api_key_scopes"),
            &serde_json::to_string(&info.scopes)
                .map_err(|e| CredentialError::Storage(e.to_string()))?,
        )
        .await?;
        self.kv_set(&self.key_name("project_uuid"), &info.project_id)
            .await?;

        info!(
            "stored verified key {}",
            Self::mask_key(&key)
        );
        Ok(info)
    }

    /// Decrypt and return the plaintext key.
    pub async fn get(&self) -> Result<String, CredentialError> {
        let encoded = self
            .kv_get(&self.key_name("api_key_encrypted"))
            .await?
            .ok_or(CredentialError::NotFound)?;

        let blob = EncryptedBlob::decode(&encoded)?;
        let material = self.material.clone();
        tokio::task::spawn_blocking(move || decrypt(&blob, &material))
            .await
            .map_err(|e| CredentialError::Storage(e.to_string()))?
    }

    pub async fn has_key(&self) -> bool {
        matches!(
            self.kv_get(&self.key_name("api_key_encrypted")).await,
            Ok(Some(_))
        )
    }

    /// Metadata projection for settings UIs; the plaintext never leaves
    /// this module through here.
    pub async fn info(&self) -> Result<KeyInfo, CredentialError> {
        if !self.has_key().await {
            return Ok(KeyInfo::default());
        }
        let scopes = match self.kv_get(&self.key_name("api_key_scopes")).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        let verified_at_ms = self
            .kv_get(&self.key_name("api_key_verified_at"))
            .await?
            .and_then(|raw| raw.parse().ok());
        let project_id = self.kv_get(&self.key_name("project_uuid")).await?;

        Ok(KeyInfo {
            present: true,
            scopes,
            verified_at_ms,
            project_id,
        })
    }

    /// Delete every entry for this credential.
    pub async fn remove(&self) -> Result<(), CredentialError> {
        for name in [
            "api_key_encrypted",
            "api_key_verified_at",
            "api_key_scopes",
            "project_uuid",
        ] {
            self.kv
                .remove(&self.key_name(name))
                .await
                .map_err(|e| CredentialError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// The stored (model, language) preset tag, if any.
    pub async fn recognition_mode(&self) -> Result<Option<String>, CredentialError> {
        self.kv_get(&self.key_name("recognition_mode")).await
    }

    pub async fn set_recognition_mode(&self, mode: &str) -> Result<(), CredentialError> {
        self.kv_set(&self.key_name("recognition_mode"), mode).await
    }

    fn key_name(&self, suffix: &str) -> String {
        format!("{}.{}", self.namespace, suffix)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        self.kv
            .get(key)
            .await
            .map_err(|e| CredentialError::Storage(e.to_string()))
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.kv
            .set(key, value)
            .await
            .map_err(|e| CredentialError::Storage(e.to_string()))
    }
}

/// Map a verification HTTP status onto the credential taxonomy.
pub fn map_verify_status(status: u16) -> CredentialError {
    match status {
        401 => CredentialError::InvalidKey,
        403 => CredentialError::PermissionDenied,
        429 => CredentialError::RateLimited,
        500..=599 => CredentialError::ServiceUnavailable { status },
        _ => CredentialError::NetworkError(format!("unexpected status {}", status)),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
