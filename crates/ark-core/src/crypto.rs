//! Cipher capability used to seal credential values before they leave the
//! daemon. The codec never depends on a particular algorithm; it only sees
//! the [`SealedValue`] tag and payload.

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::credential::SealedValue;

pub const XCHACHA20POLY1305: &str = "xchacha20poly1305";
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("unsupported cipher algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("sealed value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("nonce length {0} is invalid")]
    NonceLength(usize),

    #[error("encrypt failed")]
    Encrypt,

    #[error("decrypt failed (authentication tag mismatch)")]
    Decrypt,

    #[error("plaintext is not a credential value: {0}")]
    Plaintext(#[from] serde_json::Error),
}

/// `seal(plaintext) -> sealed` / `open(sealed) -> plaintext`.
pub trait Cipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedValue, CipherError>;
    fn open(&self, sealed: &SealedValue) -> Result<Zeroizing<Vec<u8>>, CipherError>;
}

pub struct XChaChaCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl XChaChaCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key[..]))
    }
}

impl Cipher for XChaChaCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedValue, CipherError> {
        let nonce = generate_nonce();
        let ciphertext = self
            .cipher()
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        Ok(SealedValue {
            alg: XCHACHA20POLY1305.to_string(),
            nonce: general_purpose::STANDARD.encode(nonce),
            ciphertext: general_purpose::STANDARD.encode(ciphertext),
        })
    }

    fn open(&self, sealed: &SealedValue) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if sealed.alg != XCHACHA20POLY1305 {
            return Err(CipherError::UnsupportedAlgorithm(sealed.alg.clone()));
        }
        let nonce = general_purpose::STANDARD.decode(&sealed.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(CipherError::NonceLength(nonce.len()));
        }
        let ciphertext = general_purpose::STANDARD.decode(&sealed.ciphertext)?;
        let plaintext = self
            .cipher()
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| CipherError::Decrypt)?;
        Ok(Zeroizing::new(plaintext))
    }
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let cipher = XChaChaCipher::generate();
        let sealed = cipher.seal(b"hunter2").unwrap();
        assert_eq!(sealed.alg, XCHACHA20POLY1305);
        assert_eq!(cipher.open(&sealed).unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn other_key_cannot_open() {
        let sealed = XChaChaCipher::generate().seal(b"hunter2").unwrap();
        let err = XChaChaCipher::generate().open(&sealed).unwrap_err();
        assert!(matches!(err, CipherError::Decrypt));
    }

    #[test]
    fn unknown_algorithm_is_refused() {
        let cipher = XChaChaCipher::generate();
        let mut sealed = cipher.seal(b"x").unwrap();
        sealed.alg = "aes-128-ecb".into();
        assert!(matches!(
            cipher.open(&sealed),
            Err(CipherError::UnsupportedAlgorithm(_))
        ));
    }
}
