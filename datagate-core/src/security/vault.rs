//! AES-256-GCM envelope encryption of stored credentials.
//!
//! A data source's password (or full connection URL) is persisted as three
//! base64 text columns: ciphertext, a random 96-bit IV, and the 128-bit
//! authentication tag. The key is a process-wide 32-byte secret read from
//! `DATAGATE_ENCRYPTION_KEY`.
//!
//! # Security Guarantees
//! - Every encryption draws a fresh nonce from the OS RNG
//! - Decryption fails on any missing column or tag mismatch
//! - Key bytes and decrypted plaintext are zeroized on drop

use crate::error::DataGateError;
use crate::models::SecretColumns;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// Environment variable holding the vault secret.
pub const ENCRYPTION_KEY_ENV: &str = "DATAGATE_ENCRYPTION_KEY";

/// AES-GCM nonce size: 96 bits
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits
const AES_GCM_TAG_SIZE: usize = 16;

/// AES-256 key size
const AES_KEY_SIZE: usize = 32;
/// Length of the key written as hex.
const AES_KEY_HEX_LEN: usize = AES_KEY_SIZE * 2;

/// Encrypted secret as stored: base64 ciphertext, IV, and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

impl From<EncryptedPayload> for SecretColumns {
    fn from(payload: EncryptedPayload) -> Self {
        Self {
            ciphertext: Some(payload.ciphertext),
            iv: Some(payload.iv),
            auth_tag: Some(payload.auth_tag),
        }
    }
}

impl SecretColumns {
    /// Reassembles the stored triple.
    ///
    /// Returns `Ok(None)` when no secret is stored at all.
    ///
    /// # Errors
    /// Returns a decryption error when only some of the three columns are set.
    pub fn to_payload(&self) -> crate::Result<Option<EncryptedPayload>> {
        match (&self.ciphertext, &self.iv, &self.auth_tag) {
            (None, None, None) => Ok(None),
            (Some(ciphertext), Some(iv), Some(auth_tag)) => Ok(Some(EncryptedPayload {
                ciphertext: ciphertext.clone(),
                iv: iv.clone(),
                auth_tag: auth_tag.clone(),
            })),
            _ => Err(DataGateError::decryption(
                "encrypted payload is incomplete (ciphertext, iv, and auth_tag are required)",
            )),
        }
    }
}

/// Credential vault keyed by a 32-byte secret.
///
/// # Example
/// ```rust
/// use datagate_core::Vault;
///
/// let vault = Vault::from_secret(&"ab".repeat(32))?;
/// let payload = vault.encrypt("s3cret")?;
/// assert_eq!(vault.decrypt(&payload)?.as_str(), "s3cret");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vault { .. }")
    }
}

static GLOBAL_VAULT: OnceLock<Vault> = OnceLock::new();

impl Vault {
    /// Creates a vault from an encoded secret.
    ///
    /// The secret may be 64 hex characters, base64 of 32 bytes, or exactly
    /// 32 raw bytes.
    ///
    /// # Errors
    /// Returns a configuration error if the secret does not decode to
    /// exactly 32 bytes.
    pub fn from_secret(secret: &str) -> crate::Result<Self> {
        let key = decode_key(secret)?;
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    /// Creates a vault from `DATAGATE_ENCRYPTION_KEY` without caching it.
    ///
    /// # Errors
    /// Returns a configuration error if the variable is unset or invalid.
    pub fn from_env() -> crate::Result<Self> {
        let secret = Zeroizing::new(std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
            DataGateError::configuration(format!(
                "{} is not set; stored credentials cannot be decrypted",
                ENCRYPTION_KEY_ENV
            ))
        })?);
        Self::from_secret(&secret)
    }

    /// Process-wide vault, loaded from the environment on first use.
    ///
    /// A failed load is not cached, so a later call can succeed once the
    /// variable is set.
    ///
    /// # Errors
    /// Same as [`Vault::from_env`].
    pub fn global() -> crate::Result<&'static Self> {
        if let Some(vault) = GLOBAL_VAULT.get() {
            return Ok(vault);
        }
        // A racing initializer derives the same key; whichever lands first wins.
        let _ = GLOBAL_VAULT.set(Self::from_env()?);
        GLOBAL_VAULT
            .get()
            .ok_or_else(|| DataGateError::configuration("credential vault failed to initialize"))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    /// Returns a configuration error if the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> crate::Result<EncryptedPayload> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| DataGateError::configuration(format!("Encryption failed: {}", e)))?;

        // AES-GCM appends the tag to the ciphertext
        if sealed.len() < AES_GCM_TAG_SIZE {
            return Err(DataGateError::configuration(
                "Encrypted data too short to carry an authentication tag",
            ));
        }
        let (ciphertext, auth_tag) = sealed.split_at(sealed.len().saturating_sub(AES_GCM_TAG_SIZE));

        Ok(EncryptedPayload {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(nonce),
            auth_tag: STANDARD.encode(auth_tag),
        })
    }

    /// Decrypts and authenticates a payload.
    ///
    /// # Errors
    /// Returns a decryption error if any field is malformed, the tag does
    /// not verify, or the plaintext is not UTF-8.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> crate::Result<Zeroizing<String>> {
        let ciphertext = decode_field("ciphertext", &payload.ciphertext)?;
        let iv = decode_field("iv", &payload.iv)?;
        let auth_tag = decode_field("auth_tag", &payload.auth_tag)?;

        if iv.len() != AES_GCM_NONCE_SIZE {
            return Err(DataGateError::decryption(format!(
                "Invalid iv length: expected {}, got {}",
                AES_GCM_NONCE_SIZE,
                iv.len()
            )));
        }
        if auth_tag.len() != AES_GCM_TAG_SIZE {
            return Err(DataGateError::decryption(format!(
                "Invalid authentication tag length: expected {}, got {}",
                AES_GCM_TAG_SIZE,
                auth_tag.len()
            )));
        }

        let mut sealed = Vec::with_capacity(ciphertext.len().saturating_add(AES_GCM_TAG_SIZE));
        sealed.extend_from_slice(&ciphertext);
        sealed.extend_from_slice(&auth_tag);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| {
                    DataGateError::decryption("authentication failed; payload was altered or the key is wrong")
                })?,
        );

        std::str::from_utf8(&plaintext)
            .map(|s| Zeroizing::new(s.to_string()))
            .map_err(|_| DataGateError::decryption("decrypted secret is not valid UTF-8"))
    }

    /// Decrypts stored secret columns, if any secret is stored.
    ///
    /// # Errors
    /// Returns a decryption error for a partial triple or a failed decrypt.
    pub fn decrypt_columns(&self, columns: &SecretColumns) -> crate::Result<Option<Zeroizing<String>>> {
        columns
            .to_payload()?
            .map(|payload| self.decrypt(&payload))
            .transpose()
    }
}

fn decode_field(field: &str, value: &str) -> crate::Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| DataGateError::decryption(format!("{} is not valid base64", field)))
}

/// Decodes the vault secret: hex first, then base64, then raw bytes.
fn decode_key(secret: &str) -> crate::Result<Zeroizing<Vec<u8>>> {
    let trimmed = secret.trim();

    if trimmed.len() == AES_KEY_HEX_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(trimmed) {
            return Ok(Zeroizing::new(bytes));
        }
    }

    if let Ok(bytes) = STANDARD.decode(trimmed) {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() == AES_KEY_SIZE {
            return Ok(bytes);
        }
    }

    if secret.len() == AES_KEY_SIZE {
        return Ok(Zeroizing::new(secret.as_bytes().to_vec()));
    }

    Err(DataGateError::configuration(format!(
        "{} must decode to exactly {} bytes (hex, base64, or raw)",
        ENCRYPTION_KEY_ENV, AES_KEY_SIZE
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::from_secret(&"0f".repeat(32)).unwrap()
    }

    #[test]
    fn test_key_encodings() {
        assert!(Vault::from_secret(&"a1".repeat(32)).is_ok());
        assert!(Vault::from_secret(&STANDARD.encode([7u8; 32])).is_ok());
        assert!(Vault::from_secret("0123456789abcdefghijklmnopqrstuv").is_ok());

        assert!(matches!(
            Vault::from_secret("too-short"),
            Err(DataGateError::Configuration { .. })
        ));
        assert!(Vault::from_secret(&"a1".repeat(31)).is_err());
    }

    #[test]
    fn test_hex_and_base64_of_same_key_interoperate() {
        let key = [42u8; 32];
        let hex_vault = Vault::from_secret(&hex::encode(key)).unwrap();
        let b64_vault = Vault::from_secret(&STANDARD.encode(key)).unwrap();

        let payload = hex_vault.encrypt("shared").unwrap();
        assert_eq!(b64_vault.decrypt(&payload).unwrap().as_str(), "shared");
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let vault = test_vault();
        for plaintext in ["", "p@ss:w/rd", "pässwörd 🔐"] {
            let payload = vault.encrypt(plaintext).unwrap();
            assert_eq!(vault.decrypt(&payload).unwrap().as_str(), plaintext);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let vault = test_vault();
        let first = vault.encrypt("same").unwrap();
        let second = vault.encrypt("same").unwrap();

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_eq!(STANDARD.decode(&first.iv).unwrap().len(), AES_GCM_NONCE_SIZE);
        assert_eq!(STANDARD.decode(&first.auth_tag).unwrap().len(), AES_GCM_TAG_SIZE);
    }

    #[test]
    fn test_tampered_tag_fails() {
        let vault = test_vault();
        let mut payload = vault.encrypt("secret").unwrap();
        let mut tag = STANDARD.decode(&payload.auth_tag).unwrap();
        tag[0] ^= 0x01;
        payload.auth_tag = STANDARD.encode(tag);

        assert!(matches!(
            vault.decrypt(&payload),
            Err(DataGateError::Decryption { .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = test_vault().encrypt("secret").unwrap();
        let other = Vault::from_secret(&"1e".repeat(32)).unwrap();
        assert!(other.decrypt(&payload).is_err());
    }

    #[test]
    fn test_partial_columns_fail() {
        let vault = test_vault();
        let mut columns: SecretColumns = vault.encrypt("secret").unwrap().into();
        assert_eq!(
            vault.decrypt_columns(&columns).unwrap().as_deref().map(String::as_str),
            Some("secret")
        );

        columns.auth_tag = None;
        assert!(matches!(
            vault.decrypt_columns(&columns),
            Err(DataGateError::Decryption { .. })
        ));

        assert!(vault.decrypt_columns(&SecretColumns::default()).unwrap().is_none());
    }

    #[test]
    fn test_debug_does_not_expose_key() {
        assert_eq!(format!("{:?}", test_vault()), "Vault { .. }");
    }
}
