//! AEAD wrapper around XChaCha20-Poly1305, the step-2/3 of the CES pipeline.
//!
//! The wire framing is `length(8 bytes, big-endian) || ciphertext (incl. tag)`.
//! The length header lets the decrypt side sanity-check the reconstructed
//! buffer before handing it to the AEAD, so a corrupted shard set fails with
//! `IntegrityCheckFailed` rather than an opaque AEAD error where possible.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::CesError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
const LEN_HEADER_SIZE: usize = 8;

pub struct Cipher {
    cipher: XChaCha20Poly1305,
}

impl Cipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new_from_slice(key)
                .expect("key is exactly KEY_SIZE bytes"),
        }
    }

    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Frames `plaintext` with its length header, then encrypts the whole
    /// frame under `nonce`. Returns the raw ciphertext (tag included).
    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>, CesError> {
        let mut framed = Vec::with_capacity(LEN_HEADER_SIZE + plaintext.len());
        framed.extend_from_slice(&(plaintext.len() as u64).to_be_bytes());
        framed.extend_from_slice(plaintext);

        self.cipher
            .encrypt(XNonce::from_slice(nonce), framed.as_slice())
            .map_err(|_| CesError::EncryptionError("aead encrypt failed".into()))
    }

    /// Decrypts `ciphertext` under `nonce`, then validates and strips the
    /// length header, returning the original plaintext.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>, CesError> {
        let framed = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CesError::DecryptionError)?;

        if framed.len() < LEN_HEADER_SIZE {
            return Err(CesError::IntegrityCheckFailed);
        }
        let (len_bytes, body) = framed.split_at(LEN_HEADER_SIZE);
        let declared_len = u64::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if declared_len != body.len() {
            return Err(CesError::IntegrityCheckFailed);
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; KEY_SIZE];
        let cipher = Cipher::new(&key);
        let nonce = Cipher::generate_nonce();
        let pt = b"the quick brown fox jumps over the lazy dog".to_vec();
        let ct = cipher.encrypt(&pt, &nonce).unwrap();
        let back = cipher.decrypt(&ct, &nonce).unwrap();
        assert_eq!(pt, back);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = [1u8; KEY_SIZE];
        let cipher = Cipher::new(&key);
        let nonce = Cipher::generate_nonce();
        let ct = cipher.encrypt(&[], &nonce).unwrap();
        let back = cipher.decrypt(&ct, &nonce).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [3u8; KEY_SIZE];
        let cipher = Cipher::new(&key);
        let nonce = Cipher::generate_nonce();
        let mut ct = cipher.encrypt(b"payload", &nonce).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(matches!(cipher.decrypt(&ct, &nonce), Err(CesError::DecryptionError)));
    }

    #[test]
    fn wrong_nonce_fails() {
        let key = [5u8; KEY_SIZE];
        let cipher = Cipher::new(&key);
        let nonce = Cipher::generate_nonce();
        let other_nonce = Cipher::generate_nonce();
        let ct = cipher.encrypt(b"payload", &nonce).unwrap();
        assert!(matches!(cipher.decrypt(&ct, &other_nonce), Err(CesError::DecryptionError)));
    }
}
