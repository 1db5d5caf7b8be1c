//! Concurrent profile field updates.
//!
//! Changed fields are sent to the registry at the same time; the caller
//! sees nothing until every call has finished. The local identity is only
//! refreshed once all of them succeeded.

use ark_core::ipc::FieldStatus;
use ark_core::ErrorClass;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::{CallContext, RegistryClient, RegistryError};
use crate::session::{Identity, Session};

/// One field of a multi-field update. `op` is only present (and only ever
/// run) when the field actually changed.
pub struct FieldUpdate<'a> {
    field: &'static str,
    op: Option<BoxFuture<'a, Result<(), RegistryError>>>,
}

impl<'a> FieldUpdate<'a> {
    pub fn new<F>(field: &'static str, current: &str, desired: &str, op: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, Result<(), RegistryError>>,
    {
        Self {
            field,
            op: (current != desired).then(op),
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn is_changed(&self) -> bool {
        self.op.is_some()
    }
}

#[derive(Debug)]
pub enum FieldOutcome {
    Skipped,
    Applied,
    Failed(RegistryError),
}

impl FieldOutcome {
    pub fn status(&self) -> FieldStatus {
        match self {
            FieldOutcome::Skipped => FieldStatus::Skipped,
            FieldOutcome::Applied => FieldStatus::Applied,
            FieldOutcome::Failed(_) => FieldStatus::Failed,
        }
    }
}

/// Per-field outcomes, in declaration order.
#[derive(Debug)]
pub struct UpdateReport {
    outcomes: Vec<(&'static str, FieldOutcome)>,
}

impl UpdateReport {
    pub fn outcomes(&self) -> &[(&'static str, FieldOutcome)] {
        &self.outcomes
    }

    pub fn statuses(&self) -> Vec<(String, FieldStatus)> {
        self.outcomes
            .iter()
            .map(|(field, outcome)| (field.to_string(), outcome.status()))
            .collect()
    }

    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FieldOutcome::Applied))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FieldOutcome::Failed(_)))
            .count()
    }

    /// `Err` with the earliest-declared failure if any field failed.
    pub fn into_result(self) -> Result<Self, UpdateError> {
        let failed = self.failed();
        if failed == 0 {
            return Ok(self);
        }
        let (field, source) = self
            .outcomes
            .into_iter()
            .find_map(|(field, outcome)| match outcome {
                FieldOutcome::Failed(e) => Some((field, e)),
                _ => None,
            })
            .ok_or(UpdateError::Inconsistent)?;
        Err(UpdateError::Failed {
            field,
            source,
            others_failed: failed - 1,
        })
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("updating {field} failed ({others_failed} other field(s) also failed): {source}")]
    Failed {
        field: &'static str,
        #[source]
        source: RegistryError,
        others_failed: usize,
    },

    #[error("update report lost its failure")]
    Inconsistent,
}

/// Run every changed update concurrently and wait for all of them.
pub async fn apply_concurrently(updates: Vec<FieldUpdate<'_>>) -> UpdateReport {
    let runs = updates.into_iter().map(|update| async move {
        let outcome = match update.op {
            None => FieldOutcome::Skipped,
            Some(op) => match op.await {
                Ok(()) => FieldOutcome::Applied,
                Err(e) => {
                    warn!(field = update.field, error = %e, "field update failed");
                    FieldOutcome::Failed(e)
                }
            },
        };
        (update.field, outcome)
    });
    UpdateReport {
        outcomes: join_all(runs).await,
    }
}

/// The registry calls a profile edit needs.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn update_name(&self, name: &str) -> Result<(), RegistryError>;
    async fn update_email(&self, email: &str) -> Result<(), RegistryError>;
    /// Re-read the account and update the local identity.
    async fn refresh(&self) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub email: String,
}

impl From<&Identity> for Profile {
    fn from(identity: &Identity) -> Self {
        Self {
            name: identity.name.clone(),
            email: identity.email.clone(),
        }
    }
}

#[derive(Debug)]
pub enum EditOutcome {
    Unchanged,
    Updated(UpdateReport),
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// Every field was written, but the local identity is now stale.
    #[error("profile updated but refreshing the session failed: {0}")]
    Refresh(#[source] RegistryError),
}

impl ProfileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProfileError::Update(UpdateError::Failed { .. }) => ErrorClass::Aggregation,
            ProfileError::Update(UpdateError::Inconsistent) => ErrorClass::Internal,
            ProfileError::Refresh(_) => ErrorClass::Stale,
        }
    }
}

pub struct ProfileEditor<'a, S: ProfileService + ?Sized> {
    service: &'a S,
}

impl<'a, S: ProfileService + ?Sized> ProfileEditor<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    pub async fn edit(
        &self,
        current: &Profile,
        desired: &Profile,
    ) -> Result<EditOutcome, ProfileError> {
        let service = self.service;
        let updates = vec![
            FieldUpdate::new("name", &current.name, &desired.name, || {
                service.update_name(&desired.name)
            }),
            FieldUpdate::new("email", &current.email, &desired.email, || {
                service.update_email(&desired.email)
            }),
        ];
        if !updates.iter().any(FieldUpdate::is_changed) {
            debug!("profile edit is a no-op");
            return Ok(EditOutcome::Unchanged);
        }

        let report = apply_concurrently(updates).await.into_result()?;
        service.refresh().await.map_err(ProfileError::Refresh)?;
        Ok(EditOutcome::Updated(report))
    }
}

/// [`ProfileService`] backed by the registry and the daemon's session.
pub struct RegistryProfile<'a> {
    registry: &'a RegistryClient,
    session: &'a Session,
    ctx: &'a CallContext,
}

impl<'a> RegistryProfile<'a> {
    pub fn new(registry: &'a RegistryClient, session: &'a Session, ctx: &'a CallContext) -> Self {
        Self {
            registry,
            session,
            ctx,
        }
    }
}

#[async_trait]
impl<'a> ProfileService for RegistryProfile<'a> {
    async fn update_name(&self, name: &str) -> Result<(), RegistryError> {
        self.registry
            .users()
            .update_name(self.ctx, self.session, name)
            .await
            .map(|_| ())
    }

    async fn update_email(&self, email: &str) -> Result<(), RegistryError> {
        self.registry
            .users()
            .update_email(self.ctx, self.session, email)
            .await
            .map(|_| ())
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        let user = self.registry.users().get_self(self.ctx, self.session).await?;
        let identity = Identity::try_from(&user)?;
        if !self.session.refresh(identity) {
            return Err(RegistryError::NoSession);
        }
        Ok(())
    }
}
