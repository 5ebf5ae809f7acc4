//! Call identifiers.
//!
//! A call id is minted by the caller and carried on every signaling message of
//! that call. It combines a millisecond timestamp with a random suffix so two
//! callers starting a call in the same millisecond still get distinct ids.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const PREFIX: &str = "call_";
const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque call identifier, e.g. `call_1718049123456_k3j9x0q2m`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap an id received from a peer. No format is enforced.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the creation timestamp from an id produced by [`generate_call_id`].
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let rest = self.0.strip_prefix(PREFIX)?;
        let (millis, _) = rest.split_once('_')?;
        chrono::DateTime::from_timestamp_millis(millis.parse().ok()?)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generate a fresh call id: `call_<unix-millis>_<9 base-36 chars>`.
pub fn generate_call_id() -> CallId {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    CallId(format!("{PREFIX}{millis}_{suffix}"))
}
