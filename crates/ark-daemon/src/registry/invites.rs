use ark_core::envelope::Body;
use ark_core::primitive::{InviteState, OrgInviteV1};
use ark_core::{EntityKind, Envelope, Id};
use chrono::Utc;
use reqwest::Method;
use serde_json::json;

use super::{Acknowledged, CallContext, RegistryClient, RegistryError};
use crate::session::Session;

/// Org invitation lifecycle. Each call is a single request; on failure no
/// local state is assumed to have changed.
pub struct Invites<'a> {
    client: &'a RegistryClient,
}

impl<'a> Invites<'a> {
    pub(crate) fn new(client: &'a RegistryClient) -> Self {
        Self { client }
    }

    /// Invites for `org_id` in any of `states` (all states when empty).
    pub async fn list(
        &self,
        ctx: &CallContext,
        session: &Session,
        org_id: &Id,
        states: &[InviteState],
    ) -> Result<Vec<Envelope>, RegistryError> {
        let mut req = self
            .client
            .request(Method::GET, "/org-invites")?
            .query("org_id", org_id.as_str());
        for state in states {
            req = req.query("state", state.as_str());
        }
        req.authenticated(session)?
            .send(ctx)
            .await?
            .envelopes(EntityKind::OrgInvite)
    }

    pub async fn send(
        &self,
        ctx: &CallContext,
        session: &Session,
        org_id: Id,
        inviter_id: Id,
        email: &str,
        team_ids: Vec<Id>,
    ) -> Result<Acknowledged<Id>, RegistryError> {
        let id = Id::generate();
        let invite = OrgInviteV1::new(org_id, inviter_id, email, team_ids, Utc::now());
        let envelope = Envelope::new(Body::OrgInviteV1(invite)).with_id(id.clone());
        envelope.validate()?;
        let res = self
            .client
            .request(Method::POST, "/org-invites")?
            .json(&envelope)?
            .authenticated(session)?
            .send(ctx)
            .await?;
        Ok(res.acknowledge(id))
    }

    /// Redeem an invite code as the invitee.
    pub async fn accept(
        &self,
        ctx: &CallContext,
        session: &Session,
        org: &str,
        email: &str,
        code: &str,
    ) -> Result<Acknowledged<()>, RegistryError> {
        let res = self
            .client
            .request(Method::POST, "/org-invites/accept")?
            .json(&json!({ "org": org, "email": email, "code": code }))?
            .authenticated(session)?
            .send(ctx)
            .await?;
        Ok(res.acknowledge(()))
    }

    /// Look up the invite a code belongs to, tying it to the current user.
    pub async fn associate(
        &self,
        ctx: &CallContext,
        session: &Session,
        org: &str,
        email: &str,
        code: &str,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        let res = self
            .client
            .request(Method::POST, "/org-invites/associate")?
            .json(&json!({ "org": org, "email": email, "code": code }))?
            .authenticated(session)?
            .send(ctx)
            .await?;
        let invite = res.envelope(EntityKind::OrgInvite)?;
        Ok(res.acknowledge(invite))
    }

    pub async fn approve(
        &self,
        ctx: &CallContext,
        session: &Session,
        invite_id: &Id,
    ) -> Result<Acknowledged<()>, RegistryError> {
        let res = self
            .client
            .request(Method::POST, "/org-invites")?
            .segment(invite_id.as_str())?
            .segment("approve")?
            .authenticated(session)?
            .send(ctx)
            .await?;
        Ok(res.acknowledge(()))
    }
}
