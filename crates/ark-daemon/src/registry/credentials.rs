use ark_core::credential::{CredentialValue, PlaintextCredential};
use ark_core::crypto::Cipher;
use ark_core::envelope::Body;
use ark_core::{EntityKind, Envelope};
use reqwest::Method;
use tracing::debug;

use super::{Acknowledged, CallContext, RegistryClient, RegistryError};
use crate::session::Session;

pub struct Credentials<'a> {
    client: &'a RegistryClient,
}

impl<'a> Credentials<'a> {
    pub(crate) fn new(client: &'a RegistryClient) -> Self {
        Self { client }
    }

    /// Every credential at or below `path`, opened with `cipher`.
    pub async fn get(
        &self,
        ctx: &CallContext,
        session: &Session,
        path: &str,
        cipher: &dyn Cipher,
    ) -> Result<Vec<PlaintextCredential>, RegistryError> {
        let res = self
            .client
            .request(Method::GET, "/credentials")?
            .query("path", path)
            .authenticated(session)?
            .send(ctx)
            .await?;
        let envelopes = res.envelopes(EntityKind::Credential)?;
        debug!(path, count = envelopes.len(), "fetched credentials");
        envelopes.iter().map(|e| open(e, cipher)).collect()
    }

    /// Seal `credential` and store it as a new version.
    pub async fn create(
        &self,
        ctx: &CallContext,
        session: &Session,
        credential: &PlaintextCredential,
        cipher: &dyn Cipher,
    ) -> Result<Acknowledged<PlaintextCredential>, RegistryError> {
        let envelope = Envelope::new(Body::CredentialV1(credential.seal(cipher)?));
        envelope.validate()?;
        let res = self
            .client
            .request(Method::POST, "/credentials")?
            .json(&envelope)?
            .authenticated(session)?
            .send(ctx)
            .await?;
        let stored = open(&res.envelope(EntityKind::Credential)?, cipher)?;
        Ok(res.acknowledge(stored))
    }

    /// Store the unset marker for `path`/`name`. The registry keeps the
    /// history; readers see the credential as cleared.
    pub async fn unset(
        &self,
        ctx: &CallContext,
        session: &Session,
        path: &str,
        name: &str,
        cipher: &dyn Cipher,
    ) -> Result<Acknowledged<PlaintextCredential>, RegistryError> {
        let credential = PlaintextCredential::new(path, name, CredentialValue::Unset);
        self.create(ctx, session, &credential, cipher).await
    }
}

fn open(envelope: &Envelope, cipher: &dyn Cipher) -> Result<PlaintextCredential, RegistryError> {
    let body = envelope
        .as_credential()
        .ok_or(RegistryError::UnexpectedEntity {
            expected: EntityKind::Credential,
            found: envelope.kind(),
        })?;
    Ok(PlaintextCredential::open(body, cipher)?)
}
