use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ark_core::credential::{CredentialValue, PlaintextCredential};
use ark_core::crypto::Cipher;
use ark_core::ipc::{CredentialView, IpcHandler, IpcRequest, IpcResponse, InviteView};
use ark_core::{Envelope, ErrorClass, Id};
use async_trait::async_trait;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::profile::{EditOutcome, Profile, ProfileEditor, ProfileError, RegistryProfile};
use crate::registry::{CallContext, RegistryClient, RegistryError};
use crate::session::{Identity, Session};

/// Serves authenticated CLI requests against the registry.
pub struct DaemonHandler {
    registry: RegistryClient,
    session: Arc<Session>,
    cipher: Arc<dyn Cipher>,
    call_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl HandlerError {
    fn class(&self) -> ErrorClass {
        match self {
            HandlerError::Registry(e) => e.class(),
            HandlerError::Profile(e) => e.class(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Registry(e) | HandlerError::Profile(ProfileError::Refresh(e)) => {
                e.is_retryable()
            }
            HandlerError::Profile(ProfileError::Update(_)) => false,
        }
    }
}

impl DaemonHandler {
    pub fn new(
        registry: RegistryClient,
        session: Arc<Session>,
        cipher: Arc<dyn Cipher>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            session,
            cipher,
            call_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn context(&self) -> CallContext {
        CallContext::new().with_timeout(self.call_timeout)
    }

    async fn dispatch(&self, client: u64, req: IpcRequest) -> Result<IpcResponse, HandlerError> {
        let ctx = self.context();
        let session = self.session.as_ref();
        let cipher = self.cipher.as_ref();
        match req {
            IpcRequest::Ping => Ok(IpcResponse::Pong),
            IpcRequest::Status => Ok(IpcResponse::Status {
                client,
                logged_in: session.is_active(),
                username: session.identity().map(|i| i.username),
            }),
            IpcRequest::Login { token } => self.login(&ctx, Zeroizing::new(token)).await,
            IpcRequest::Logout => {
                session.logout();
                info!(client, "logged out");
                Ok(IpcResponse::LoggedOut)
            }
            IpcRequest::GetCredentials { path } => {
                let credentials = self
                    .registry
                    .credentials()
                    .get(&ctx, session, &path, cipher)
                    .await?
                    .into_iter()
                    .map(|c| CredentialView {
                        value: c.value.as_str().map(str::to_string),
                        path: c.path.clone(),
                        name: c.name.clone(),
                    })
                    .collect();
                Ok(IpcResponse::Credentials { credentials })
            }
            IpcRequest::SetCredential { path, name, value } => {
                let credential =
                    PlaintextCredential::new(path, name, CredentialValue::String(value));
                let ack = self
                    .registry
                    .credentials()
                    .create(&ctx, session, &credential, cipher)
                    .await?;
                Ok(IpcResponse::CredentialStored {
                    request_id: ack.request_id,
                })
            }
            IpcRequest::UnsetCredential { path, name } => {
                let ack = self
                    .registry
                    .credentials()
                    .unset(&ctx, session, &path, &name, cipher)
                    .await?;
                Ok(IpcResponse::CredentialStored {
                    request_id: ack.request_id,
                })
            }
            IpcRequest::ListInvites { org_id, states } => {
                let invites = self
                    .registry
                    .invites()
                    .list(&ctx, session, &Id::from(org_id), &states)
                    .await?
                    .iter()
                    .filter_map(invite_view)
                    .collect();
                Ok(IpcResponse::Invites { invites })
            }
            IpcRequest::AcceptInvite { org, email, code } => {
                let ack = self
                    .registry
                    .invites()
                    .accept(&ctx, session, &org, &email, &code)
                    .await?;
                Ok(IpcResponse::InviteAccepted {
                    request_id: ack.request_id,
                })
            }
            IpcRequest::ApproveInvite { invite_id } => {
                let ack = self
                    .registry
                    .invites()
                    .approve(&ctx, session, &Id::from(invite_id))
                    .await?;
                Ok(IpcResponse::InviteApproved {
                    request_id: ack.request_id,
                })
            }
            IpcRequest::UpdateProfile { name, email } => {
                let identity = session.identity().ok_or(RegistryError::NoSession)?;
                let current = Profile::from(&identity);
                let desired = Profile {
                    name: name.unwrap_or_else(|| current.name.clone()),
                    email: email.unwrap_or_else(|| current.email.clone()),
                };
                let service = RegistryProfile::new(&self.registry, session, &ctx);
                match ProfileEditor::new(&service).edit(&current, &desired).await? {
                    EditOutcome::Unchanged => Ok(IpcResponse::ProfileUnchanged),
                    EditOutcome::Updated(report) => Ok(IpcResponse::ProfileUpdated {
                        fields: report.statuses(),
                    }),
                }
            }
        }
    }

    /// The token only becomes the session's once the registry accepted it
    /// and returned a valid user record.
    async fn login(
        &self,
        ctx: &CallContext,
        token: Zeroizing<String>,
    ) -> Result<IpcResponse, HandlerError> {
        let probe = Session::with_token(token.clone());
        let user = self.registry.users().get_self(ctx, &probe).await?;
        let identity = Identity::try_from(&user)?;
        info!(username = %identity.username, "logged in");
        let response = IpcResponse::LoggedIn {
            username: identity.username.clone(),
            email: identity.email.clone(),
        };
        self.session.login(token, identity);
        Ok(response)
    }
}

fn invite_view(envelope: &Envelope) -> Option<InviteView> {
    let invite = envelope.as_invite()?;
    Some(InviteView {
        id: envelope.id.as_ref().map(|id| id.to_string()),
        email: invite.email.clone(),
        state: invite.state(),
        created: invite.created.to_rfc3339(),
    })
}

#[async_trait]
impl IpcHandler for DaemonHandler {
    async fn handle(&self, client: u64, req: IpcRequest) -> Result<IpcResponse> {
        let label = request_label(&req);
        match self.dispatch(client, req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let class = e.class();
                warn!(client, request = label, ?class, error = %e, "request failed");
                Ok(IpcResponse::Failed {
                    class,
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                })
            }
        }
    }
}

fn request_label(req: &IpcRequest) -> &'static str {
    match req {
        IpcRequest::Ping => "ping",
        IpcRequest::Status => "status",
        IpcRequest::Login { .. } => "login",
        IpcRequest::Logout => "logout",
        IpcRequest::GetCredentials { .. } => "get_credentials",
        IpcRequest::SetCredential { .. } => "set_credential",
        IpcRequest::UnsetCredential { .. } => "unset_credential",
        IpcRequest::ListInvites { .. } => "list_invites",
        IpcRequest::AcceptInvite { .. } => "accept_invite",
        IpcRequest::ApproveInvite { .. } => "approve_invite",
        IpcRequest::UpdateProfile { .. } => "update_profile",
    }
}
