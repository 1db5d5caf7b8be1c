use std::future::Future;
use std::time::Duration;

use ark_core::RequestId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RegistryError;

pub type ProgressSender = mpsc::Sender<Progress>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Sending,
    Received,
    /// Operation-specific milestone, see `message`.
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub request_id: Option<RequestId>,
    pub step: ProgressStep,
    pub message: String,
}

/// Result of a mutating call together with the id it was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledged<T> {
    /// Always set for POST/PATCH calls.
    pub request_id: Option<RequestId>,
    pub value: T,
}

impl<T> Acknowledged<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Acknowledged<U> {
        Acknowledged {
            request_id: self.request_id,
            value: f(self.value),
        }
    }
}

/// Per-call deadline, cancellation and progress reporting.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
    request_id: Option<RequestId>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            progress: None,
            request_id: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Reuse `request_id` so the registry can recognize a retried call.
    pub fn retrying(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Never blocks: the event is dropped if the receiver is full or gone.
    pub(crate) fn report(
        &self,
        request_id: Option<&RequestId>,
        step: ProgressStep,
        message: impl Into<String>,
    ) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(Progress {
                request_id: request_id.cloned(),
                step,
                message: message.into(),
            });
        }
    }

    /// Drive `fut` until it finishes, the token is cancelled or the
    /// deadline passes. The future is dropped in the latter two cases.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            res = fut => res,
            _ = self.cancel.cancelled() => Err(RegistryError::Cancelled),
            _ = expired => Err(RegistryError::DeadlineExceeded),
        }
    }
}
