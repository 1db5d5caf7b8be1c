//! Version-1 body schemas carried inside envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential::SealedValue;
use crate::error::ValidationError;
use crate::identity::Id;

pub const TRIPLESEC_V3: &str = "triplesec-v3";
pub const ARGON2ID_V1: &str = "argon2id-v1";

/// Master key derivation algorithms a user record may declare.
pub const MASTER_KEY_ALGORITHMS: &[&str] = &[TRIPLESEC_V3, ARGON2ID_V1];

// ── Credential ──────────────────────────────────────────────────────────────

/// Server-held credential: the value only ever exists sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialV1 {
    pub name: String,
    pub path: String,
    pub value: SealedValue,
}

impl CredentialV1 {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if self.path.is_empty() {
            return Err(ValidationError::EmptyField("path"));
        }
        if self.value.ciphertext.is_empty() {
            return Err(ValidationError::EmptyField("value"));
        }
        Ok(())
    }
}

// ── User ────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    pub alg: String,
    #[serde(default)]
    pub value: String,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("alg", &self.alg)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    #[default]
    Unverified,
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserV1 {
    pub username: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub state: UserState,
    #[serde(default)]
    pub master: Option<MasterKey>,
}

impl UserV1 {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let master = self.master.as_ref().ok_or(ValidationError::MissingMaster)?;
        if !MASTER_KEY_ALGORITHMS.contains(&master.alg.as_str()) {
            return Err(ValidationError::UnknownAlgorithm(master.alg.clone()));
        }
        if master.value.is_empty() {
            return Err(ValidationError::EmptyKeyMaterial);
        }
        Ok(())
    }
}

// ── Org invite ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteState {
    Pending,
    Accepted,
    Approved,
}

impl InviteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteState::Pending => "pending",
            InviteState::Accepted => "accepted",
            InviteState::Approved => "approved",
        }
    }
}

impl fmt::Display for InviteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InviteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InviteState::Pending),
            "accepted" => Ok(InviteState::Accepted),
            "approved" => Ok(InviteState::Approved),
            other => Err(format!("unknown invite state: {other}")),
        }
    }
}

/// Invitation to join an org.
///
/// created → accepted (invitee supplies the code) → approved (an org admin
/// confirms). Each step fills exactly one identity/timestamp pair and a
/// later step is never reachable without the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInviteV1 {
    pub org_id: Id,
    pub inviter_id: Id,
    pub invitee_id: Option<Id>,
    pub approver_id: Option<Id>,
    #[serde(default)]
    pub pending_teams: Vec<Id>,
    pub email: String,
    pub created: DateTime<Utc>,
    pub accepted: Option<DateTime<Utc>>,
    pub approved: Option<DateTime<Utc>>,
}

impl OrgInviteV1 {
    pub fn new(
        org_id: Id,
        inviter_id: Id,
        email: impl Into<String>,
        pending_teams: Vec<Id>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id,
            inviter_id,
            invitee_id: None,
            approver_id: None,
            pending_teams,
            email: email.into(),
            created,
            accepted: None,
            approved: None,
        }
    }

    pub fn state(&self) -> InviteState {
        if self.approved.is_some() {
            InviteState::Approved
        } else if self.accepted.is_some() {
            InviteState::Accepted
        } else {
            InviteState::Pending
        }
    }

    pub fn accept(&mut self, invitee: Id, at: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.state() != InviteState::Pending {
            return Err(ValidationError::InviteOutOfOrder("invite already accepted"));
        }
        if at < self.created {
            return Err(ValidationError::InviteOutOfOrder("accepted before created"));
        }
        self.invitee_id = Some(invitee);
        self.accepted = Some(at);
        Ok(())
    }

    pub fn approve(&mut self, approver: Id, at: DateTime<Utc>) -> Result<(), ValidationError> {
        match self.state() {
            InviteState::Pending => {
                return Err(ValidationError::InviteOutOfOrder("approval before acceptance"))
            }
            InviteState::Approved => {
                return Err(ValidationError::InviteOutOfOrder("invite already approved"))
            }
            InviteState::Accepted => {}
        }
        if self.accepted.is_some_and(|accepted| at < accepted) {
            return Err(ValidationError::InviteOutOfOrder("approved before accepted"));
        }
        self.approver_id = Some(approver);
        self.approved = Some(at);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.is_empty() {
            return Err(ValidationError::EmptyField("email"));
        }
        if self.accepted.is_some() != self.invitee_id.is_some() {
            return Err(ValidationError::InviteOutOfOrder(
                "acceptance without matching invitee",
            ));
        }
        if self.approved.is_some() != self.approver_id.is_some() {
            return Err(ValidationError::InviteOutOfOrder(
                "approval without matching approver",
            ));
        }
        match (self.accepted, self.approved) {
            (None, Some(_)) => Err(ValidationError::InviteOutOfOrder(
                "approved but never accepted",
            )),
            (Some(accepted), _) if accepted < self.created => Err(
                ValidationError::InviteOutOfOrder("accepted before created"),
            ),
            (Some(accepted), Some(approved)) if approved < accepted => Err(
                ValidationError::InviteOutOfOrder("approved before accepted"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> UserV1 {
        UserV1 {
            username: "jo".into(),
            name: "Jo Example".into(),
            email: "jo@example.com".into(),
            state: UserState::Active,
            master: Some(MasterKey {
                alg: TRIPLESEC_V3.into(),
                value: "c2FsdGVkLWtleQ==".into(),
            }),
        }
    }

    fn invite() -> OrgInviteV1 {
        OrgInviteV1::new(
            Id::from("org"),
            Id::from("inviter"),
            "new@example.com",
            vec![Id::from("team")],
            Utc::now(),
        )
    }

    #[test]
    fn user_rejections_are_distinct() {
        let mut missing = user();
        missing.master = None;
        assert_eq!(missing.validate(), Err(ValidationError::MissingMaster));

        let mut unknown = user();
        unknown.master.as_mut().unwrap().alg = "rot13".into();
        assert_eq!(
            unknown.validate(),
            Err(ValidationError::UnknownAlgorithm("rot13".into()))
        );

        let mut empty = user();
        empty.master.as_mut().unwrap().value.clear();
        assert_eq!(empty.validate(), Err(ValidationError::EmptyKeyMaterial));

        assert!(user().validate().is_ok());
    }

    #[test]
    fn master_key_debug_is_redacted() {
        let rendered = format!("{:?}", user());
        assert!(!rendered.contains("c2FsdGVkLWtleQ=="));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn invite_lifecycle_is_monotonic() {
        let mut inv = invite();
        assert_eq!(inv.state(), InviteState::Pending);
        assert!(inv
            .approve(Id::from("admin"), inv.created + Duration::seconds(1))
            .is_err());

        inv.accept(Id::from("invitee"), inv.created + Duration::seconds(1))
            .unwrap();
        assert_eq!(inv.state(), InviteState::Accepted);
        assert!(inv
            .accept(Id::from("someone"), inv.created + Duration::seconds(2))
            .is_err());

        inv.approve(Id::from("admin"), inv.created + Duration::seconds(3))
            .unwrap();
        assert_eq!(inv.state(), InviteState::Approved);
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn approved_invite_without_acceptance_is_invalid() {
        let mut inv = invite();
        inv.approver_id = Some(Id::from("admin"));
        inv.approved = Some(Utc::now());
        assert!(matches!(
            inv.validate(),
            Err(ValidationError::InviteOutOfOrder(_))
        ));
    }

    #[test]
    fn invite_state_parses_its_own_rendering() {
        for state in [InviteState::Pending, InviteState::Accepted, InviteState::Approved] {
            assert_eq!(state.as_str().parse::<InviteState>().unwrap(), state);
        }
        assert!("revoked".parse::<InviteState>().is_err());
    }
}
