//! Cancellation and deadline context for backend operations.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cosi_common::{CancelReason, Error, Operation, Result};

/// Caller-supplied cancellation signal and optional deadline.
///
/// Every backend operation runs inside [`OpContext::run`]. When the token
/// fires or the deadline passes, the operation future is dropped, which
/// aborts the in-flight request, and `Error::Cancelled` is returned.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that never cancels on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// A context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set or tighten the deadline. An earlier existing deadline is kept.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The token that cancels operations run with this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every operation using this context (or a clone of it).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Run `fut` unless the context fires first.
    pub async fn run<T, F>(&self, operation: Operation, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let cancelled = |reason| Error::Cancelled {
            operation,
            key: key.to_string(),
            reason,
        };

        if self.token.is_cancelled() {
            return Err(cancelled(CancelReason::Cancelled));
        }
        if matches!(self.deadline, Some(deadline) if deadline <= Instant::now()) {
            return Err(cancelled(CancelReason::DeadlineExceeded));
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(cancelled(CancelReason::Cancelled)),
            _ = deadline => Err(cancelled(CancelReason::DeadlineExceeded)),
            result = fut => result,
        }
    }
}
