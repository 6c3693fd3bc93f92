pub mod ext;
pub mod handle;
pub mod memory;
pub mod provider;
pub mod retry;

use std::future::Future;

use tokio_util::sync::CancellationToken;
use warden_common::{Result, WardenError};

/// Race a storage call against the caller's cancellation token.
///
/// A token that is already cancelled short-circuits before the call starts.
pub(crate) async fn run_cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(WardenError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WardenError::Cancelled),
        result = operation => result,
    }
}
