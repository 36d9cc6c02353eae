//! Concurrent handler fan-out

use crate::error::{Error, HandlerResult};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio::task::{JoinError, JoinHandle};

/// Runs handler futures as independent tasks and reduces their outcomes.
///
/// Every task runs to completion; a failure never cancels its siblings.
/// The result is the error of whichever failing task *finished* first, so
/// with several failures the reported one depends on timing.
#[derive(Default)]
pub(crate) struct HandlerGroup {
    tasks: FuturesUnordered<JoinHandle<HandlerResult>>,
}

impl HandlerGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start `task` on the runtime immediately.
    pub(crate) fn spawn(&mut self, task: BoxFuture<'static, HandlerResult>) {
        self.tasks.push(tokio::spawn(task));
    }

    /// Wait for every task.
    pub(crate) async fn wait(mut self) -> HandlerResult {
        let mut first_error = None;
        while let Some(joined) = self.tasks.next().await {
            let outcome = joined.unwrap_or_else(|e| Err(join_error(e)));
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn join_error(error: JoinError) -> Error {
    if !error.is_panic() {
        return Error::HandlerFailed(error.to_string());
    }
    let panic = error.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::HandlerPanicked(message)
}
