//! Daemon secrets kept in the OS keyring: the IPC shared secret the CLI
//! authenticates with, and the key credential values are sealed under.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::KEY_LEN;

const SERVICE_NAME: &str = "ArkDaemon";
const IPC_SECRET_KEY: &str = "ipc_secret";
const CREDENTIAL_KEY: &str = "credential_key";

fn entry_for(key: &str) -> Result<Entry> {
    let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
    Entry::new(SERVICE_NAME, &format!("{}:{}", key, user))
        .map_err(|e| anyhow!("keyring init: {e}"))
}

fn entry() -> Result<Entry> {
    entry_for(IPC_SECRET_KEY)
}

pub fn store_ipc_secret(secret: &[u8]) -> Result<()> {
    let encoded = Zeroizing::new(general_purpose::STANDARD.encode(secret));
    entry()?
        .set_password(&encoded)
        .map_err(|e| anyhow!("store ipc secret: {e}"))?;
    Ok(())
}

pub fn get_ipc_secret() -> Result<Zeroizing<Vec<u8>>> {
    let encoded = Zeroizing::new(
        entry()?
            .get_password()
            .map_err(|e| anyhow!("load ipc secret: {e}"))?,
    );
    let decoded = general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| anyhow!("decode ipc secret: {e}"))?;
    Ok(Zeroizing::new(decoded))
}

pub fn delete_ipc_secret() -> Result<()> {
    entry()?
        .delete_password()
        .map_err(|e| anyhow!("delete ipc secret: {e}"))?;
    Ok(())
}

/// Load the credential sealing key, creating and storing a fresh one on
/// first use.
pub fn load_or_create_credential_key() -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let entry = entry_for(CREDENTIAL_KEY)?;
    match entry.get_password() {
        Ok(encoded) => {
            let encoded = Zeroizing::new(encoded);
            let decoded = Zeroizing::new(
                general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| anyhow!("decode credential key: {e}"))?,
            );
            if decoded.len() != KEY_LEN {
                return Err(anyhow!("stored credential key has length {}", decoded.len()));
            }
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&decoded);
            Ok(key)
        }
        Err(keyring::Error::NoEntry) => {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            OsRng.fill_bytes(&mut key[..]);
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(&key[..]));
            entry
                .set_password(&encoded)
                .map_err(|e| anyhow!("store credential key: {e}"))?;
            Ok(key)
        }
        Err(e) => Err(anyhow!("load credential key: {e}")),
    }
}
