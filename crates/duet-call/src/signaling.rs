//! Outbound signaling capability.
//!
//! Inbound delivery is not part of the trait: whatever transport carries the
//! messages hands them to [`crate::CallManager::handle_signal`].

use async_trait::async_trait;
use duet_common::signal::SignalMessage;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn publish(&self, message: SignalMessage) -> anyhow::Result<()>;
}
