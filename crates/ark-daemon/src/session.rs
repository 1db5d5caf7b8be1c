//! Logged-in state shared by every authenticated registry call.
//!
//! The daemon's handler is the only writer (`login`, `logout`, `refresh`);
//! registry calls read the token through `&Session`.

use std::fmt;

use ark_core::{EntityKind, Envelope, Id};
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::registry::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Option<Id>,
    pub username: String,
    pub name: String,
    pub email: String,
}

impl TryFrom<&Envelope> for Identity {
    type Error = RegistryError;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        let user = envelope.as_user().ok_or(RegistryError::UnexpectedEntity {
            expected: EntityKind::User,
            found: envelope.kind(),
        })?;
        Ok(Self {
            id: envelope.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        })
    }
}

struct Active {
    token: Zeroizing<String>,
    identity: Option<Identity>,
}

#[derive(Default)]
pub struct Session {
    inner: RwLock<Option<Active>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session holding `token` with no identity yet, for probing the
    /// token before it is trusted.
    pub fn with_token(token: Zeroizing<String>) -> Self {
        Self {
            inner: RwLock::new(Some(Active {
                token,
                identity: None,
            })),
        }
    }

    pub fn token(&self) -> Option<Zeroizing<String>> {
        self.inner.read().as_ref().map(|a| a.token.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.read().as_ref().and_then(|a| a.identity.clone())
    }

    pub fn login(&self, token: Zeroizing<String>, identity: Identity) {
        *self.inner.write() = Some(Active {
            token,
            identity: Some(identity),
        });
    }

    /// Replace the cached identity. No-op after logout.
    pub fn refresh(&self, identity: Identity) -> bool {
        match self.inner.write().as_mut() {
            Some(active) => {
                active.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    pub fn logout(&self) {
        *self.inner.write() = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let username = inner
            .as_ref()
            .and_then(|a| a.identity.as_ref())
            .map(|i| &i.username);
        f.debug_struct("Session")
            .field("active", &inner.is_some())
            .field("username", &username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> Identity {
        Identity {
            id: Some(Id::from("u1")),
            username: "ada".to_string(),
            name: name.to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    #[test]
    fn login_logout_cycle() {
        let session = Session::new();
        assert!(session.token().is_none());
        session.login(Zeroizing::new("tok".to_string()), identity("Ada"));
        assert_eq!(session.token().as_deref().map(String::as_str), Some("tok"));
        assert_eq!(session.identity().map(|i| i.name), Some("Ada".to_string()));
        session.logout();
        assert!(!session.is_active());
        assert!(session.identity().is_none());
    }

    #[test]
    fn refresh_after_logout_is_ignored() {
        let session = Session::new();
        assert!(!session.refresh(identity("Ada")));
        assert!(session.identity().is_none());
    }

    #[test]
    fn debug_never_prints_token() {
        let session = Session::with_token(Zeroizing::new("s3cret".to_string()));
        assert!(!format!("{session:?}").contains("s3cret"));
    }
}
