//! AES-256-GCM encryption for provider tokens at rest.
//!
//! Ciphertexts are bound to their owning connection through additional
//! authenticated data, so a token row copied between tenants or providers
//! fails to decrypt. Stored payloads carry a one-byte format version ahead
//! of the nonce; payloads without the marker predate encryption at rest and
//! pass through as plaintext.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::connection::Model as ConnectionModel;

const FORMAT_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
// version byte + nonce + GCM tag
const MIN_SEALED_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// A 256-bit key that zeroizes its material on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Encrypt `plaintext` under `aad`, producing the versioned stored form.
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut ciphertext = self
            .cipher()
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        sealed.push(FORMAT_V1);
        sealed.extend_from_slice(&nonce);
        sealed.append(&mut ciphertext);
        Ok(sealed)
    }

    /// Decrypt a stored payload. Unversioned payloads are returned as-is
    /// (legacy plaintext rows).
    pub fn open(&self, aad: &[u8], payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match payload.first() {
            None => Err(CryptoError::EmptyCiphertext),
            Some(&version) if version != FORMAT_V1 => Ok(payload.to_vec()),
            Some(_) if payload.len() < MIN_SEALED_LEN => Err(CryptoError::InvalidFormat),
            Some(_) => {
                let nonce = Nonce::from_slice(&payload[1..1 + NONCE_LEN]);
                let sealed = &payload[1 + NONCE_LEN..];
                self.cipher()
                    .decrypt(nonce, Payload { msg: sealed, aad })
                    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
            }
        }
    }
}

/// Whether a stored payload is in the sealed (versioned) format.
pub fn is_encrypted_payload(payload: &[u8]) -> bool {
    payload.len() >= MIN_SEALED_LEN && payload[0] == FORMAT_V1
}

fn connection_aad(connection: &ConnectionModel) -> String {
    format!(
        "{}|{}|{}",
        connection.tenant_id, connection.provider_slug, connection.id
    )
}

/// Seal both tokens for storage on the given connection row.
pub fn encrypt_connection_tokens(
    key: &CryptoKey,
    connection: &ConnectionModel,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), CryptoError> {
    let aad = connection_aad(connection);
    let seal = |token: Option<&str>| {
        token
            .map(|token| key.seal(aad.as_bytes(), token.as_bytes()))
            .transpose()
    };
    Ok((seal(access_token)?, seal(refresh_token)?))
}

/// Recover both tokens from a connection row, tolerating legacy plaintext.
pub fn decrypt_connection_tokens(
    key: &CryptoKey,
    connection: &ConnectionModel,
) -> Result<(Option<String>, Option<String>), CryptoError> {
    let aad = connection_aad(connection);
    let open = |payload: Option<&Vec<u8>>| -> Result<Option<String>, CryptoError> {
        let Some(payload) = payload else {
            return Ok(None);
        };
        let bytes = key.open(aad.as_bytes(), payload)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {e}")))
    };

    Ok((
        open(connection.access_token_ciphertext.as_ref())?,
        open(connection.refresh_token_ciphertext.as_ref())?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn sample_connection() -> ConnectionModel {
        ConnectionModel {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_slug: "samsara".to_string(),
            external_id: Some("org-123".to_string()),
            status: "active".to_string(),
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            last_sync_at: None,
            last_error: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let sealed = key.seal(b"test-aad", b"secret message").unwrap();
        assert!(is_encrypted_payload(&sealed));
        assert_eq!(key.open(b"test-aad", &sealed).unwrap(), b"secret message");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = key.seal(b"aad-1", b"secret message").unwrap();
        assert!(matches!(
            key.open(b"aad-2", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_key().seal(b"aad", b"secret").unwrap();
        let other = CryptoKey::new(vec![1u8; 32]).unwrap();
        assert!(matches!(
            other.open(b"aad", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_legacy_plaintext_passthrough() {
        let legacy = b"plaintext-token".to_vec();
        assert!(!is_encrypted_payload(&legacy));
        assert_eq!(test_key().open(b"aad", &legacy).unwrap(), legacy);
    }

    #[test]
    fn test_empty_and_truncated_payloads_rejected() {
        let key = test_key();
        assert!(matches!(
            key.open(b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
        assert!(matches!(
            key.open(b"aad", &[FORMAT_V1, 0, 1, 2]),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_connection_token_roundtrip() {
        let key = test_key();
        let connection = sample_connection();

        let (access_ct, refresh_ct) =
            encrypt_connection_tokens(&key, &connection, Some("access-token"), Some("refresh"))
                .unwrap();
        let stored = ConnectionModel {
            access_token_ciphertext: access_ct,
            refresh_token_ciphertext: refresh_ct,
            ..connection
        };

        let (access, refresh) = decrypt_connection_tokens(&key, &stored).unwrap();
        assert_eq!(access.as_deref(), Some("access-token"));
        assert_eq!(refresh.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_tokens_bound_to_connection() {
        let key = test_key();
        let connection = sample_connection();
        let (access_ct, _) =
            encrypt_connection_tokens(&key, &connection, Some("access-token"), None).unwrap();

        // Same ciphertext on a different connection must not decrypt.
        let other = ConnectionModel {
            access_token_ciphertext: access_ct,
            ..sample_connection()
        };
        assert!(decrypt_connection_tokens(&key, &other).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 32]).is_ok());
    }
}
