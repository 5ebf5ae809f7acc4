//! Pending message buffers.
//!
//! Signaling is delivered out of band and unordered relative to local setup:
//! - a remote offer can arrive before the callee has accepted (no peer yet)
//! - remote candidates can arrive before any remote description is applied
//!
//! Both are parked here and replayed by the call manager once it is ready.

use duet_common::signal::{IceCandidate, SessionDescription};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct PendingBuffers {
    offer: Option<SessionDescription>,
    candidates: VecDeque<IceCandidate>,
}

impl PendingBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a remote offer. Returns the offer it displaced, if any.
    pub fn store_offer(&mut self, offer: SessionDescription) -> Option<SessionDescription> {
        self.offer.replace(offer)
    }

    /// Remove the parked offer. A second call returns `None`.
    pub fn take_offer(&mut self) -> Option<SessionDescription> {
        self.offer.take()
    }

    pub fn queue_candidate(&mut self, candidate: IceCandidate) {
        self.candidates.push_back(candidate);
    }

    /// Remove every queued candidate, oldest first.
    pub fn take_candidates(&mut self) -> Vec<IceCandidate> {
        self.candidates.drain(..).collect()
    }

    pub fn queued_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn clear(&mut self) {
        self.offer = None;
        self.candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_slot_drains_once() {
        let mut buffers = PendingBuffers::new();
        assert!(buffers.store_offer(SessionDescription::offer("v=0 a")).is_none());

        assert_eq!(buffers.take_offer(), Some(SessionDescription::offer("v=0 a")));
        assert_eq!(buffers.take_offer(), None);
    }

    #[test]
    fn test_newer_offer_displaces_older() {
        let mut buffers = PendingBuffers::new();
        buffers.store_offer(SessionDescription::offer("first"));
        let displaced = buffers.store_offer(SessionDescription::offer("second"));
        assert_eq!(displaced.unwrap().sdp, "first");
        assert_eq!(buffers.take_offer().unwrap().sdp, "second");
    }

    #[test]
    fn test_candidates_drain_in_arrival_order() {
        let mut buffers = PendingBuffers::new();
        for i in 0..5 {
            buffers.queue_candidate(IceCandidate::new(format!("candidate:{i}")));
        }
        assert_eq!(buffers.queued_candidates(), 5);

        let drained: Vec<_> = buffers
            .take_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(
            drained,
            ["candidate:0", "candidate:1", "candidate:2", "candidate:3", "candidate:4"]
        );
        assert!(buffers.take_candidates().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buffers = PendingBuffers::new();
        buffers.store_offer(SessionDescription::offer("x"));
        buffers.queue_candidate(IceCandidate::new("candidate:0"));
        buffers.clear();
        assert!(buffers.take_offer().is_none());
        assert_eq!(buffers.queued_candidates(), 0);
    }
}
