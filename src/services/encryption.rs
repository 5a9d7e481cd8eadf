use crate::error::AppError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

/// Replaces user content on soft delete.
pub const DELETED_SENTINEL: &str = "message deleted";
/// Replaces content when the sweeper tombstones an expired message.
pub const EXPIRED_SENTINEL: &str = "message expired";

pub fn generate_nonce() -> [u8; 24] {
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Server-managed symmetric encryption at the storage boundary. Every
/// conversation gets its own key derived from the master key, so a leaked
/// per-conversation key exposes only that conversation.
#[derive(Clone)]
pub struct EncryptionService {
    master_key: [u8; 32],
}

impl EncryptionService {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn derive_conversation_key(&self, conversation_id: Uuid) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut key = [0u8; 32];
        hk.expand(conversation_id.as_bytes(), &mut key)
            .expect("HKDF expand must succeed for 32 byte output");
        key
    }

    pub fn encrypt(
        &self,
        conversation_id: Uuid,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; 24]), AppError> {
        let key = self.derive_conversation_key(conversation_id);
        let nonce = generate_nonce();
        let cipher = XChaCha20Poly1305::new(&key.into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| AppError::Encryption("encrypt failed".into()))?;
        Ok((ciphertext, nonce))
    }

    pub fn decrypt(
        &self,
        conversation_id: Uuid,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<Vec<u8>, AppError> {
        if nonce.len() != 24 {
            return Err(AppError::Encryption("bad nonce length".into()));
        }
        let key = self.derive_conversation_key(conversation_id);
        let cipher = XChaCha20Poly1305::new(&key.into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Encryption("decrypt failed".into()))
    }

    /// Decrypt straight to a string, as stored content is always UTF-8.
    pub fn decrypt_to_string(
        &self,
        conversation_id: Uuid,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<String, AppError> {
        let plaintext = self.decrypt(conversation_id, ciphertext, nonce)?;
        String::from_utf8(plaintext).map_err(|_| AppError::Encryption("invalid utf8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let svc = EncryptionService::new([7u8; 32]);
        let conversation = Uuid::new_v4();
        let (ct, nonce) = svc.encrypt(conversation, b"hi").unwrap();
        assert_ne!(ct, b"hi");
        let pt = svc.decrypt_to_string(conversation, &ct, &nonce).unwrap();
        assert_eq!(pt, "hi");
    }

    #[test]
    fn wrong_conversation_key_fails() {
        let svc = EncryptionService::new([7u8; 32]);
        let (ct, nonce) = svc.encrypt(Uuid::new_v4(), b"secret").unwrap();
        assert!(svc.decrypt(Uuid::new_v4(), &ct, &nonce).is_err());
    }

    #[test]
    fn nonces_are_unique_per_encrypt() {
        let svc = EncryptionService::new([0u8; 32]);
        let conversation = Uuid::new_v4();
        let (_, n1) = svc.encrypt(conversation, b"a").unwrap();
        let (_, n2) = svc.encrypt(conversation, b"a").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn sentinel_values_encrypt_like_any_content() {
        let svc = EncryptionService::new([1u8; 32]);
        let conversation = Uuid::new_v4();
        let (ct, nonce) = svc.encrypt(conversation, EXPIRED_SENTINEL.as_bytes()).unwrap();
        let pt = svc.decrypt_to_string(conversation, &ct, &nonce).unwrap();
        assert_eq!(pt, EXPIRED_SENTINEL);
    }
}
