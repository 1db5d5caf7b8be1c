//! Plaintext credentials held by the daemon, and their sealed registry form.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::crypto::{Cipher, CipherError};
use crate::primitive::CredentialV1;

/// Algorithm-tagged ciphertext. Both byte fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    pub alg: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Credential value before sealing. `Unset` marks a credential that has
/// been explicitly cleared; it still produces a new sealed version.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CredentialValue {
    String(String),
    Unset,
}

impl CredentialValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CredentialValue::String(s) => Some(s),
            CredentialValue::Unset => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, CredentialValue::Unset)
    }
}

impl Drop for CredentialValue {
    fn drop(&mut self) {
        if let CredentialValue::String(s) = self {
            s.zeroize();
        }
    }
}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialValue::String(_) => f.write_str("String([REDACTED])"),
            CredentialValue::Unset => f.write_str("Unset"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextCredential {
    pub name: String,
    pub path: String,
    pub value: CredentialValue,
}

impl PlaintextCredential {
    pub fn new(path: impl Into<String>, name: impl Into<String>, value: CredentialValue) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            value,
        }
    }

    pub fn seal(&self, cipher: &dyn Cipher) -> Result<CredentialV1, CipherError> {
        let mut plaintext = serde_json::to_vec(&self.value)?;
        let sealed = cipher.seal(&plaintext);
        plaintext.zeroize();
        Ok(CredentialV1 {
            name: self.name.clone(),
            path: self.path.clone(),
            value: sealed?,
        })
    }

    pub fn open(body: &CredentialV1, cipher: &dyn Cipher) -> Result<Self, CipherError> {
        let plaintext = cipher.open(&body.value)?;
        let value: CredentialValue = serde_json::from_slice(&plaintext)?;
        Ok(Self {
            name: body.name.clone(),
            path: body.path.clone(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::XChaChaCipher;

    #[test]
    fn sealed_credential_hides_value() {
        let cipher = XChaChaCipher::generate();
        let cred = PlaintextCredential::new(
            "/acme/api/prod",
            "DATABASE_URL",
            CredentialValue::String("postgres://secret".into()),
        );
        let body = cred.seal(&cipher).unwrap();
        assert!(!serde_json::to_string(&body).unwrap().contains("postgres://secret"));
        assert_eq!(PlaintextCredential::open(&body, &cipher).unwrap(), cred);
    }

    #[test]
    fn unset_value_survives_sealing() {
        let cipher = XChaChaCipher::generate();
        let cred = PlaintextCredential::new("/acme/api/prod", "TOKEN", CredentialValue::Unset);
        let opened = PlaintextCredential::open(&cred.seal(&cipher).unwrap(), &cipher).unwrap();
        assert!(opened.value.is_unset());
    }

    #[test]
    fn debug_output_is_redacted() {
        let cred = PlaintextCredential::new("/p", "K", CredentialValue::String("s3cret".into()));
        assert!(!format!("{cred:?}").contains("s3cret"));
    }
}
