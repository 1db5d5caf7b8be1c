//! Versioned envelope codec.
//!
//! Wire shape: `{"id": <id|absent>, "version": <u32>, "body": <object|null>}`.
//!
//! Decoding yields an [`Unverified`] envelope, which deliberately exposes no
//! body accessor. The only way to reach the body is [`Unverified::validate`],
//! so a decoded-but-unchecked record cannot be handed to calling code.
//!
//! Bodies are a closed sum over the known (version, entity) pairs. An
//! unrecognised version is a [`DecodeError::UnsupportedVersion`] raised
//! before any body parsing happens.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, EnvelopeError, ValidationError};
use crate::identity::Id;
use crate::primitive::{CredentialV1, OrgInviteV1, UserV1};

pub const ENVELOPE_VERSION_1: u32 = 1;

/// Entity-type discriminator that accompanies the version on every decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Credential,
    User,
    OrgInvite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Body {
    CredentialV1(CredentialV1),
    UserV1(UserV1),
    OrgInviteV1(OrgInviteV1),
}

impl Body {
    pub fn kind(&self) -> EntityKind {
        match self {
            Body::CredentialV1(_) => EntityKind::Credential,
            Body::UserV1(_) => EntityKind::User,
            Body::OrgInviteV1(_) => EntityKind::OrgInvite,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Body::CredentialV1(_) | Body::UserV1(_) | Body::OrgInviteV1(_) => ENVELOPE_VERSION_1,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Body::CredentialV1(c) => c.validate(),
            Body::UserV1(u) => u.validate(),
            Body::OrgInviteV1(i) => i.validate(),
        }
    }
}

/// Parse a full wire envelope. The inverse of [`encode`]:
/// `decode(kind, &encode(e)?)?.validate()? == e` for every valid `e`.
pub fn decode(kind: EntityKind, raw: &[u8]) -> Result<Unverified, DecodeError> {
    Unverified::from_slice(kind, raw)
}

/// Parse a bare body under the rules of `declared_version`, for callers
/// that carry the version out of band.
pub fn decode_body(
    kind: EntityKind,
    declared_version: u32,
    raw_body: &[u8],
) -> Result<Body, DecodeError> {
    match declared_version {
        ENVELOPE_VERSION_1 => body_v1(kind, serde_json::from_slice(raw_body)?),
        other => Err(DecodeError::UnsupportedVersion(other)),
    }
}

fn decode_value(kind: EntityKind, declared_version: u32, raw: Value) -> Result<Body, DecodeError> {
    match declared_version {
        ENVELOPE_VERSION_1 => body_v1(kind, raw),
        other => Err(DecodeError::UnsupportedVersion(other)),
    }
}

fn body_v1(kind: EntityKind, raw: Value) -> Result<Body, DecodeError> {
    Ok(match kind {
        EntityKind::Credential => Body::CredentialV1(serde_json::from_value(raw)?),
        EntityKind::User => Body::UserV1(serde_json::from_value(raw)?),
        EntityKind::OrgInvite => Body::OrgInviteV1(serde_json::from_value(raw)?),
    })
}

/// Serialize an envelope to its wire bytes.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(envelope).map_err(EnvelopeError::Encode)
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    id: Option<Id>,
    version: u32,
    #[serde(default)]
    body: Option<Value>,
}

/// A validated envelope. Only produced by validation or by local
/// construction from an already-typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub version: u32,
    pub body: Body,
}

impl Envelope {
    /// A not-yet-persisted envelope; the registry assigns the id.
    pub fn new(body: Body) -> Self {
        Self {
            id: None,
            version: body.version(),
            body,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// Re-check a locally built envelope before it is encoded and sent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_version(self.version, &self.body)?;
        self.body.validate()
    }

    pub fn as_credential(&self) -> Option<&CredentialV1> {
        match &self.body {
            Body::CredentialV1(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserV1> {
        match &self.body {
            Body::UserV1(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_invite(&self) -> Option<&OrgInviteV1> {
        match &self.body {
            Body::OrgInviteV1(i) => Some(i),
            _ => None,
        }
    }
}

fn check_version(version: u32, body: &Body) -> Result<(), ValidationError> {
    if version != body.version() {
        return Err(ValidationError::VersionMismatch {
            expected: body.version(),
            found: version,
        });
    }
    Ok(())
}

/// Decoded envelope whose body has not been validated yet.
#[derive(Debug)]
pub struct Unverified {
    id: Option<Id>,
    version: u32,
    body: Option<Body>,
}

impl Unverified {
    pub fn from_slice(kind: EntityKind, bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        Self::from_wire(kind, wire)
    }

    pub fn from_value(kind: EntityKind, value: Value) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_value(value)?;
        Self::from_wire(kind, wire)
    }

    fn from_wire(kind: EntityKind, wire: WireEnvelope) -> Result<Self, DecodeError> {
        let body = match wire.body {
            None | Some(Value::Null) => {
                if wire.version != ENVELOPE_VERSION_1 {
                    return Err(DecodeError::UnsupportedVersion(wire.version));
                }
                None
            }
            Some(raw) => Some(decode_value(kind, wire.version, raw)?),
        };
        Ok(Self {
            id: wire.id,
            version: wire.version,
            body,
        })
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Check the entity rules for the declared version. The first violated
    /// rule is returned.
    pub fn validate(self) -> Result<Envelope, ValidationError> {
        let body = self.body.ok_or(ValidationError::MissingBody)?;
        check_version(self.version, &body)?;
        body.validate()?;
        Ok(Envelope {
            id: self.id,
            version: self.version,
            body,
        })
    }

    /// Decode and validate in one step.
    pub fn open(kind: EntityKind, bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
        Ok(Self::from_slice(kind, bytes)?.validate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{MasterKey, UserState, ARGON2ID_V1};
    use serde_json::json;

    fn user_envelope() -> Envelope {
        Envelope::new(Body::UserV1(UserV1 {
            username: "jo".into(),
            name: "Jo".into(),
            email: "jo@example.com".into(),
            state: UserState::Active,
            master: Some(MasterKey {
                alg: ARGON2ID_V1.into(),
                value: "a2V5".into(),
            }),
        }))
        .with_id(Id::from("user-1"))
    }

    #[test]
    fn unsupported_version_fails_before_body_parse() {
        // Body is not even an object; only the version is examined.
        let raw = json!({"id": "x", "version": 2, "body": 17});
        let err = Unverified::from_value(EntityKind::User, raw).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(2)));

        let err = decode_body(EntityKind::Credential, 0, b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(0)));
    }

    #[test]
    fn null_body_is_reported_by_validation() {
        let raw = json!({"id": "x", "version": 1, "body": null});
        let unverified = Unverified::from_value(EntityKind::User, raw).unwrap();
        assert_eq!(unverified.validate().unwrap_err(), ValidationError::MissingBody);
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let raw = json!({"version": 1, "body": {"username": 5}});
        assert!(matches!(
            Unverified::from_value(EntityKind::User, raw),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn user_round_trips_through_the_codec() {
        let env = user_envelope();
        let bytes = encode(&env).unwrap();
        let back = decode(EntityKind::User, &bytes).unwrap().validate().unwrap();
        assert_eq!(back, env);
        assert_eq!(Unverified::open(EntityKind::User, &bytes).unwrap(), env);
    }

    #[test]
    fn local_envelope_with_wrong_version_is_rejected() {
        let mut env = user_envelope();
        env.version = 3;
        assert_eq!(
            env.validate(),
            Err(ValidationError::VersionMismatch {
                expected: 1,
                found: 3
            })
        );
    }

    #[test]
    fn body_only_decode_dispatches_on_kind() {
        let raw = br#"{"username":"jo","name":"Jo","email":"jo@example.com"}"#;
        let body = decode_body(EntityKind::User, 1, raw).unwrap();
        assert_eq!(body.kind(), EntityKind::User);
        // The master section is absent, which only validation notices.
        assert_eq!(body.validate(), Err(ValidationError::MissingMaster));
    }
}
