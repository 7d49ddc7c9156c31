//! Completion handle for queued writes.

use crate::{ContextError, ContextResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::IntoFuture;
use tokio::sync::oneshot;

/// The outcome of a `set`, delivered once the write reaches disk.
///
/// Await it to observe the result, attach a callback with
/// [`PendingWrite::on_complete`], or drop it to fire and forget. Dropping
/// never cancels the write.
#[derive(Debug)]
pub struct PendingWrite {
    state: State,
}

#[derive(Debug)]
enum State {
    Ready(ContextResult<()>),
    Waiting {
        target: String,
        receiver: oneshot::Receiver<ContextResult<()>>,
    },
}

impl PendingWrite {
    /// A handle that is already resolved, used for validation failures.
    pub(crate) fn ready(result: ContextResult<()>) -> Self {
        Self {
            state: State::Ready(result),
        }
    }

    /// A handle resolved by whoever holds the matching sender.
    pub(crate) fn waiting(
        target: impl Into<String>,
        receiver: oneshot::Receiver<ContextResult<()>>,
    ) -> Self {
        Self {
            state: State::Waiting {
                target: target.into(),
                receiver,
            },
        }
    }

    /// Wait for the write to complete.
    pub async fn wait(self) -> ContextResult<()> {
        match self.state {
            State::Ready(result) => result,
            State::Waiting { target, receiver } => receiver
                .await
                .unwrap_or(Err(ContextError::QueueClosed(target))),
        }
    }

    /// Invoke `callback` with the result once the write completes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(ContextResult<()>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.wait().await) });
    }
}

impl IntoFuture for PendingWrite {
    type Output = ContextResult<()>;
    type IntoFuture = BoxFuture<'static, ContextResult<()>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
