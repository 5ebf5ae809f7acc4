//! Relay session management.

use duet_common::protocol::RelayFrame;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};

/// Tracks every identified connection and routes frames to users.
pub struct SessionManager {
    /// Map of session_id → Session
    sessions: RwLock<HashMap<String, Session>>,
    /// Map of username → session ids (a user can be connected from several devices)
    user_sessions: RwLock<HashMap<String, Vec<String>>>,
}

pub struct Session {
    pub username: String,
    pub outbound: mpsc::Sender<RelayFrame>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an identified session.
    pub async fn register(
        &self,
        session_id: String,
        username: String,
        outbound: mpsc::Sender<RelayFrame>,
    ) {
        let session = Session {
            username: username.clone(),
            outbound,
            connected_at: chrono::Utc::now(),
        };

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);

        self.user_sessions
            .write()
            .await
            .entry(username)
            .or_default()
            .push(session_id);
    }

    /// Remove a session. Returns the user it belonged to.
    pub async fn remove(&self, session_id: &str) -> Option<String> {
        let session = self.sessions.write().await.remove(session_id)?;
        let mut users = self.user_sessions.write().await;
        if let Some(sessions) = users.get_mut(&session.username) {
            sessions.retain(|s| s != session_id);
            if sessions.is_empty() {
                users.remove(&session.username);
            }
        }
        let connected_secs = (chrono::Utc::now() - session.connected_at).num_seconds();
        tracing::debug!(session = %session_id, user = %session.username, connected_secs, "Session removed");
        Some(session.username)
    }

    /// Queue `frame` on every session of `username`. Returns how many sessions took it.
    ///
    /// Never waits on a slow client: a session whose buffer is full misses the frame.
    pub async fn deliver(&self, username: &str, frame: RelayFrame) -> usize {
        let users = self.user_sessions.read().await;
        let Some(ids) = users.get(username) else {
            return 0;
        };
        let sessions = self.sessions.read().await;

        let mut delivered = 0;
        for id in ids {
            let Some(session) = sessions.get(id) else {
                continue;
            };
            match session.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(session = %id, user = %username, "Session buffer full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(session = %id, user = %username, "Session already closing");
                }
            }
        }
        delivered
    }

    /// Get total active sessions count.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
