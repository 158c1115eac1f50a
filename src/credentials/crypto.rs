//! At-rest encryption for the service credential.
//!
//! AES-256-GCM with a fresh 16-byte salt and 12-byte nonce per
//! encryption; the key is derived with PBKDF2-HMAC-SHA-256 from a device
//! fingerprint plus an optional user passphrase. The on-disk record is
//! base64(salt || iv || ciphertext+tag), so losing the fingerprint (new
//! machine, new browser) makes decryption fail rather than leak.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::CredentialError;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Attributes not observable in every execution context are pinned to
/// sentinel literals so the fingerprint never drifts between contexts.
const SENTINEL_USER_AGENT: &str = "caption-core";
const SENTINEL_LANGUAGE: &str = "en-US";
const SENTINEL_TIMEZONE_OFFSET_MIN: i32 = 0;

/// Device-local, stable, non-secret attributes used as key material.
///
/// Every field must return the identical value in every context the core
/// runs in; that is why half of them are sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub language: String,
    pub timezone_offset_min: i32,
    pub hardware_threads: u32,
    pub platform: String,
}

impl DeviceFingerprint {
    pub fn collect() -> Self {
        Self {
            user_agent: SENTINEL_USER_AGENT.to_string(),
            language: SENTINEL_LANGUAGE.to_string(),
            timezone_offset_min: SENTINEL_TIMEZONE_OFFSET_MIN,
            hardware_threads: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Key-derivation input. Field order is part of the format.
    pub fn material(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.user_agent,
            self.language,
            self.timezone_offset_min,
            self.hardware_threads,
            self.platform
        )
    }
}

/// One encrypted record.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Serialize as base64(salt || iv || ciphertext+tag).
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(SALT_LEN + IV_LEN + self.ciphertext.len());
        raw.extend_from_slice(&self.salt);
        raw.extend_from_slice(&self.iv);
        raw.extend_from_slice(&self.ciphertext);
        BASE64.encode(raw)
    }

    pub fn decode(encoded: &str) -> Result<Self, CredentialError> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| CredentialError::DecryptionFailed)?;
        if raw.len() <= SALT_LEN + IV_LEN {
            return Err(CredentialError::DecryptionFailed);
        }
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        salt.copy_from_slice(&raw[..SALT_LEN]);
        iv.copy_from_slice(&raw[SALT_LEN..SALT_LEN + IV_LEN]);
        Ok(Self {
            salt,
            iv,
            ciphertext: raw[SALT_LEN + IV_LEN..].to_vec(),
        })
    }
}

fn derive_key(material: &str, salt: &[u8; SALT_LEN]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(material.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt a plaintext under the fingerprint material. Salt and nonce
/// are freshly random per call.
pub fn encrypt(plaintext: &str, material: &str) -> Result<EncryptedBlob, CredentialError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(material, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CredentialError::Storage("encryption failure".to_string()))?;

    Ok(EncryptedBlob {
        salt,
        iv,
        ciphertext,
    })
}

/// Decrypt a record. A tag mismatch means the fingerprint changed (new
/// device or browser) and surfaces as `DecryptionFailed`.
pub fn decrypt(blob: &EncryptedBlob, material: &str) -> Result<String, CredentialError> {
    let key = derive_key(material, &blob.salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&blob.iv), blob.ciphertext.as_slice())
        .map_err(|_| CredentialError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| CredentialError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_same_material() {
        let material = DeviceFingerprint::collect().material();
        let secret = format!("sk-test-{}", "x".repeat(48));

        let blob = encrypt(&secret, &material).unwrap();
        let encoded = blob.encode();
        let decoded = EncryptedBlob::decode(&encoded).unwrap();
        assert_eq!(decrypt(&decoded, &material).unwrap(), secret);
    }

    #[test]
    fn test_mutated_fingerprint_fails() {
        let mut fingerprint = DeviceFingerprint::collect();
        let blob = encrypt("top-secret-key-material-1234", &fingerprint.material()).unwrap();

        fingerprint.hardware_threads += 1;
        assert!(matches!(
            decrypt(&blob, &fingerprint.material()),
            Err(CredentialError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_salt_and_iv_fresh_per_encryption() {
        let material = "fixed material";
        let a = encrypt("same plaintext", material).unwrap();
        let b = encrypt("same plaintext", material).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let material = "m";
        let mut blob = encrypt("payload", material).unwrap();
        blob.ciphertext[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&blob, material),
            Err(CredentialError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(EncryptedBlob::decode("not base64!!!").is_err());
        assert!(EncryptedBlob::decode("AAAA").is_err());
    }

    #[test]
    fn test_fingerprint_material_is_stable() {
        let a = DeviceFingerprint::collect();
        let b = DeviceFingerprint::collect();
        assert_eq!(a.material(), b.material());
        assert!(a.material().starts_with("caption-core|en-US|0|"));
    }
}
