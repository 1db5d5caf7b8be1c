use ark_core::{EntityKind, Envelope, RequestId, Unverified};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::{
    Acknowledged, CallContext, Credentials, Invites, ProgressStep, RegistryConfig, RegistryError,
    Users,
};
use crate::session::Session;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| RegistryError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("arkd/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> Credentials<'_> {
        Credentials::new(self)
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    pub fn invites(&self) -> Invites<'_> {
        Invites::new(self)
    }

    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<RegistryRequest<'_>, RegistryError> {
        let raw = format!("{}{}", self.base_url, path);
        let url = Url::parse(&raw).map_err(|e| RegistryError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(RegistryRequest {
            client: self,
            method,
            url,
            token: None,
            body: None,
        })
    }
}

/// A request being assembled against the registry.
pub(crate) struct RegistryRequest<'a> {
    client: &'a RegistryClient,
    method: Method,
    url: Url,
    token: Option<Zeroizing<String>>,
    body: Option<Vec<u8>>,
}

impl RegistryRequest<'_> {
    /// Appends one path segment, percent-encoding `/`, `?`, `#` and `%` so
    /// the value cannot leave its segment. Dot segments are refused.
    pub(crate) fn segment(mut self, segment: &str) -> Result<Self, RegistryError> {
        if matches!(segment, "" | "." | "..") {
            return Err(RegistryError::InvalidUrl {
                url: self.url.to_string(),
                reason: format!("invalid path segment {segment:?}"),
            });
        }
        let url = self.url.to_string();
        self.url
            .path_segments_mut()
            .map_err(|()| RegistryError::InvalidUrl {
                url,
                reason: "base url cannot take path segments".to_string(),
            })?
            .pop_if_empty()
            .push(segment);
        Ok(self)
    }

    /// Appends a query pair. Repeated keys are all kept, in order.
    pub(crate) fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub(crate) fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, RegistryError> {
        self.body = Some(serde_json::to_vec(body).map_err(RegistryError::Encode)?);
        Ok(self)
    }

    /// Fails with `NoSession` if the session holds no token.
    pub(crate) fn authenticated(mut self, session: &Session) -> Result<Self, RegistryError> {
        self.token = Some(session.token().ok_or(RegistryError::NoSession)?);
        Ok(self)
    }

    pub(crate) async fn send(self, ctx: &CallContext) -> Result<RegistryResponse, RegistryError> {
        let request_id = (self.method != Method::GET)
            .then(|| ctx.request_id().cloned().unwrap_or_else(RequestId::generate));
        let path = self.url.path().to_string();
        let label = format!("{} {}", self.method, path);

        let mut builder = self.client.client.request(self.method, self.url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.as_str());
        }
        if let Some(id) = &request_id {
            builder = builder.header(REQUEST_ID_HEADER, id.as_str());
        }
        if let Some(body) = self.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        debug!(
            request = %label,
            request_id = ?request_id.as_ref().map(RequestId::as_str),
            "registry request"
        );
        ctx.report(request_id.as_ref(), ProgressStep::Sending, label.clone());

        let (status, body) = ctx
            .run(async move {
                let res = builder.send().await?;
                let status = res.status();
                let body = res.bytes().await?;
                Ok::<_, RegistryError>((status, body))
            })
            .await?;

        if !status.is_success() {
            warn!(request = %label, status = status.as_u16(), "registry request failed");
            return Err(RegistryError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
        ctx.report(request_id.as_ref(), ProgressStep::Received, label);
        Ok(RegistryResponse { request_id, body })
    }
}

pub(crate) struct RegistryResponse {
    request_id: Option<RequestId>,
    body: Bytes,
}

impl RegistryResponse {
    pub(crate) fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T, RegistryError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode and validate a single envelope of `kind`.
    pub(crate) fn envelope(&self, kind: EntityKind) -> Result<Envelope, RegistryError> {
        Ok(Unverified::from_slice(kind, &self.body)?.validate()?)
    }

    /// Decode and validate a JSON array of envelopes. One bad entry fails
    /// the whole list.
    pub(crate) fn envelopes(&self, kind: EntityKind) -> Result<Vec<Envelope>, RegistryError> {
        let raw: Vec<Value> = self.json()?;
        raw.into_iter()
            .map(|v| Ok(Unverified::from_value(kind, v)?.validate()?))
            .collect()
    }

    pub(crate) fn acknowledge<T>(self, value: T) -> Acknowledged<T> {
        Acknowledged {
            request_id: self.request_id,
            value,
        }
    }
}

/// Registry errors look like `{"type": "...", "error": ["..."]}`; fall back
/// to the status reason for anything else.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let message = parsed.as_ref().and_then(|v| v.get("error")).and_then(|e| match e {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    });
    message.unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string())
}
