//! # duet-client
//!
//! Client-side plumbing for duet calls:
//! - [`RelayChannel`]: signaling over the relay WebSocket, with auto-reconnect
//! - [`HttpCredentialSource`]: relay credentials from the relay's HTTP endpoint
//! - [`spawn_dispatch`]: feeds inbound signaling into a [`duet_call::CallManager`]
//!
//! ```rust,no_run
//! use duet_call::{CallManager, RelaySource};
//! use duet_client::{HttpCredentialSource, RelayChannel, spawn_dispatch};
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     engine: Arc<dyn duet_call::engine::NegotiationEngine>,
//! #     media: Arc<dyn duet_call::media::MediaSource>,
//! # ) -> anyhow::Result<()> {
//! let channel = Arc::new(RelayChannel::connect("ws://localhost:8080/call", "alice").await?);
//! let credentials = HttpCredentialSource::new("http://localhost:8080")?;
//!
//! let manager = CallManager::builder("alice", engine, channel.clone(), media)
//!     .relay_source(RelaySource::dynamic(Arc::new(credentials)))
//!     .build()
//!     .await;
//! spawn_dispatch(manager.clone(), channel.subscribe());
//!
//! manager.start_call("bob").await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod credentials;
pub mod dispatch;
pub mod error;

pub use channel::{ReconnectPolicy, RelayChannel};
pub use credentials::HttpCredentialSource;
pub use dispatch::spawn_dispatch;
pub use error::{ClientError, Result};
