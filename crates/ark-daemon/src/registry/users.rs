use ark_core::{EntityKind, Envelope};
use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{Acknowledged, CallContext, ProgressStep, RegistryClient, RegistryError};
use crate::session::Session;

/// Account creation request. `user` must be a version-1 user envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Signup {
    pub user: Envelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_invite: Option<InviteCode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteCode {
    pub org: String,
    pub email: String,
    pub code: String,
}

pub struct Users<'a> {
    client: &'a RegistryClient,
}

impl<'a> Users<'a> {
    pub(crate) fn new(client: &'a RegistryClient) -> Self {
        Self { client }
    }

    /// Create an account. Reports each stage on the context's progress
    /// channel.
    pub async fn signup(
        &self,
        ctx: &CallContext,
        signup: &Signup,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        ctx.report(None, ProgressStep::Step, "checking account details");
        check_user(&signup.user)?;

        let res = self
            .client
            .request(Method::POST, "/signup")?
            .json(signup)?
            .send(ctx)
            .await?;

        ctx.report(res.request_id(), ProgressStep::Step, "verifying account record");
        let user = res.envelope(EntityKind::User)?;
        ctx.report(res.request_id(), ProgressStep::Step, "account created");
        info!(request_id = ?res.request_id().map(|r| r.as_str()), "signup complete");
        Ok(res.acknowledge(user))
    }

    /// Create a user record directly (admin path).
    pub async fn create(
        &self,
        ctx: &CallContext,
        session: &Session,
        user: &Envelope,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        check_user(user)?;
        let res = self
            .client
            .request(Method::POST, "/users")?
            .json(user)?
            .authenticated(session)?
            .send(ctx)
            .await?;
        let created = res.envelope(EntityKind::User)?;
        Ok(res.acknowledge(created))
    }

    pub async fn verify_email(
        &self,
        ctx: &CallContext,
        session: &Session,
        code: &str,
    ) -> Result<Acknowledged<()>, RegistryError> {
        let res = self
            .client
            .request(Method::POST, "/users/verify")?
            .json(&json!({ "code": code }))?
            .authenticated(session)?
            .send(ctx)
            .await?;
        Ok(res.acknowledge(()))
    }

    /// The caller's own user record, validated.
    pub async fn get_self(
        &self,
        ctx: &CallContext,
        session: &Session,
    ) -> Result<Envelope, RegistryError> {
        self.client
            .request(Method::GET, "/users/self")?
            .authenticated(session)?
            .send(ctx)
            .await?
            .envelope(EntityKind::User)
    }

    pub async fn update_email(
        &self,
        ctx: &CallContext,
        session: &Session,
        email: &str,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        self.patch_self(ctx, session, json!({ "email": email })).await
    }

    pub async fn update_name(
        &self,
        ctx: &CallContext,
        session: &Session,
        name: &str,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        self.patch_self(ctx, session, json!({ "name": name })).await
    }

    async fn patch_self(
        &self,
        ctx: &CallContext,
        session: &Session,
        patch: serde_json::Value,
    ) -> Result<Acknowledged<Envelope>, RegistryError> {
        let res = self
            .client
            .request(Method::PATCH, "/users/self")?
            .json(&patch)?
            .authenticated(session)?
            .send(ctx)
            .await?;
        let user = res.envelope(EntityKind::User)?;
        Ok(res.acknowledge(user))
    }
}

fn check_user(user: &Envelope) -> Result<(), RegistryError> {
    if user.kind() != EntityKind::User {
        return Err(RegistryError::UnexpectedEntity {
            expected: EntityKind::User,
            found: user.kind(),
        });
    }
    Ok(user.validate()?)
}
