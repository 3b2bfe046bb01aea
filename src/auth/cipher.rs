use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::Error;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// AES-256-GCM ciphertext and nonce, both base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedToken {
    pub encrypted_data: String,
    pub nonce: String,
}

/// Protects refresh tokens at rest.
#[derive(Clone)]
pub struct RefreshTokenCipher {
    encryption_key: [u8; KEY_SIZE],
}

impl RefreshTokenCipher {
    pub fn new(encryption_key: [u8; KEY_SIZE]) -> Self {
        Self { encryption_key }
    }

    pub fn from_base64_key(key: &str) -> Result<Self, Error> {
        let key_bytes = BASE64.decode(key)
            .map_err(|e| Error::Config(format!("Invalid encryption key: {}", e)))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(Error::Config(format!(
                "Invalid encryption key length: expected {} bytes, got {}",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let mut encryption_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&key_bytes);

        Ok(Self { encryption_key })
    }

    pub fn encrypt(&self, token: &str) -> Result<EncryptedToken, Error> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| Error::Internal(format!("Encryption error: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted = cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|e| Error::Internal(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedToken {
            encrypted_data: BASE64.encode(encrypted),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    pub fn decrypt(&self, encrypted: &EncryptedToken) -> Result<String, Error> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| Error::Internal(format!("Decryption error: {}", e)))?;

        let nonce_bytes = BASE64.decode(&encrypted.nonce)
            .map_err(|e| Error::Internal(format!("Invalid nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::Internal("Invalid nonce length".to_string()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted_data = BASE64.decode(&encrypted.encrypted_data)
            .map_err(|e| Error::Internal(format!("Invalid encrypted data: {}", e)))?;

        let decrypted = cipher
            .decrypt(nonce, encrypted_data.as_ref())
            .map_err(|e| Error::Internal(format!("Decryption failed: {}", e)))?;

        String::from_utf8(decrypted)
            .map_err(|e| Error::Internal(format!("Invalid UTF-8: {}", e)))
    }
}

/// Lookup key for a refresh token: hex SHA-256 of the as-issued value.
pub fn fingerprint(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_test_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_ciphertext_differs_from_token() {
        let cipher = RefreshTokenCipher::new(generate_test_key());
        let token = "header.claims.signature";

        let first = cipher.encrypt(token).unwrap();
        let second = cipher.encrypt(token).unwrap();

        assert_ne!(first.encrypted_data, token);
        assert_ne!(first, second, "fresh nonce per encryption");
        assert_eq!(cipher.decrypt(&first).unwrap(), token);
        assert_eq!(cipher.decrypt(&second).unwrap(), token);
    }

    #[test]
    fn test_other_key_cannot_decrypt() {
        let cipher = RefreshTokenCipher::new(generate_test_key());
        let encrypted = cipher.encrypt("header.claims.signature").unwrap();

        let other = RefreshTokenCipher::new(generate_test_key());
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = RefreshTokenCipher::new(generate_test_key());
        let mut encrypted = cipher.encrypt("header.claims.signature").unwrap();
        let mut raw = BASE64.decode(&encrypted.encrypted_data).unwrap();
        raw[0] ^= 0x01;
        encrypted.encrypted_data = BASE64.encode(raw);

        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_key_parsing() {
        let key = BASE64.encode(generate_test_key());
        assert!(RefreshTokenCipher::from_base64_key(&key).is_ok());
        assert!(matches!(
            RefreshTokenCipher::from_base64_key("c2hvcnQ="),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RefreshTokenCipher::from_base64_key("not base64!"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("token");
        assert_eq!(a, fingerprint("token"));
        assert_ne!(a, fingerprint("token2"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
