//! Inbound dispatch: relay messages into a call manager.

use duet_call::CallManager;
use duet_common::signal::SignalMessage;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Feed every inbound message to `manager`, in arrival order, until the
/// sender side closes.
pub fn spawn_dispatch(
    manager: CallManager,
    mut inbound: broadcast::Receiver<SignalMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(message) => manager.handle_signal(message).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user = %manager.local_user(), skipped, "Signal dispatch lagged, messages lost");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(user = %manager.local_user(), "Signal dispatch stopped");
    })
}
