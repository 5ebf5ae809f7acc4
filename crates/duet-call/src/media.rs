//! Local media capability: microphone acquisition and the tracks it yields.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Capture settings requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Always false; video negotiation is not supported.
    pub video: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            video: false,
        }
    }
}

/// Acquires the local microphone.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fails when the user or environment refuses access.
    async fn acquire_audio(&self, constraints: &AudioConstraints) -> anyhow::Result<LocalStream>;
}

/// A local audio track. Clones share the same underlying flags, so the
/// platform side observes `set_enabled` / `stop` from the call manager.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    id: String,
    label: String,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl AudioTrack {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &'static str {
        "audio"
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Release the device. Stopping twice is a no-op.
    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// The local microphone stream.
#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    tracks: Vec<AudioTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<AudioTrack>) -> Self {
        Self { tracks }
    }

    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.tracks
    }

    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
