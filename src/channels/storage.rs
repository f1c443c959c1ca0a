//! Per-session channel storage: sequencing, circular buffers, and replay
//! history (§4.3).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::types::{Channel, ChannelMessage};

const DEFAULT_CAPACITY: usize = 1000;

/// Sequencing + circular buffers for a single session.
struct SessionChannelStore {
    counter: AtomicU64,
    /// Sequence number currently "open" for streaming, per channel. Cleared
    /// when the closing non-partial message arrives, or wholesale when a new
    /// non-streaming response starts routing (§4.3 "Sequencing").
    pending: RwLock<HashMap<Channel, u64>>,
    buffers: RwLock<HashMap<Channel, VecDeque<ChannelMessage>>>,
    capacity: usize,
}

impl SessionChannelStore {
    fn new(capacity: usize) -> Self {
        Self {
            counter: AtomicU64::new(1),
            pending: RwLock::new(HashMap::new()),
            buffers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn allocate_sequence(&self, channel: Channel, is_partial: bool) -> u64 {
        let mut pending = self.pending.write().expect("pending lock poisoned");
        if is_partial {
            *pending
                .entry(channel)
                .or_insert_with(|| self.counter.fetch_add(1, Ordering::SeqCst))
        } else if let Some(seq) = pending.remove(&channel) {
            seq
        } else {
            self.counter.fetch_add(1, Ordering::SeqCst)
        }
    }

    fn clear_pending(&self) {
        self.pending.write().expect("pending lock poisoned").clear();
    }

    fn append(&self, message: ChannelMessage) {
        let mut buffers = self.buffers.write().expect("buffers lock poisoned");
        let buf = buffers.entry(message.channel).or_default();
        buf.push_back(message);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }
}

/// Keyed by session id; holds every session's per-channel buffers.
pub struct ChannelStorage {
    sessions: RwLock<HashMap<String, SessionChannelStore>>,
    capacity: usize,
}

impl ChannelStorage {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn ensure_session(&self, session_id: &str) {
        let needs_insert = !self
            .sessions
            .read()
            .expect("sessions lock poisoned")
            .contains_key(session_id);
        if needs_insert {
            self.sessions
                .write()
                .expect("sessions lock poisoned")
                .entry(session_id.to_string())
                .or_insert_with(|| SessionChannelStore::new(self.capacity));
        }
    }

    /// Allocate (or reuse) the sequence number for a channel message about
    /// to be routed. See §4.3 "Sequencing" for the reuse rules.
    pub fn allocate_sequence(&self, session_id: &str, channel: Channel, is_partial: bool) -> u64 {
        self.ensure_session(session_id);
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        sessions
            .get(session_id)
            .expect("just ensured")
            .allocate_sequence(channel, is_partial)
    }

    /// Clear any pending streaming sequences for `session_id` — called
    /// before routing a brand-new non-streaming response.
    pub fn clear_pending(&self, session_id: &str) {
        self.ensure_session(session_id);
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        if let Some(store) = sessions.get(session_id) {
            store.clear_pending();
        }
    }

    pub fn append(&self, session_id: &str, message: ChannelMessage) {
        self.ensure_session(session_id);
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        sessions.get(session_id).expect("just ensured").append(message);
    }

    /// Retrieve channel history for `session_id`, optionally filtered to a
    /// channel subset and/or a `since_sequence` watermark, limited *after*
    /// merging channels, sorted globally by sequence.
    pub fn get_channel_history(
        &self,
        session_id: &str,
        channels: Option<&[Channel]>,
        since_sequence: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<ChannelMessage> {
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        let Some(store) = sessions.get(session_id) else {
            return Vec::new();
        };
        let buffers = store.buffers.read().expect("buffers lock poisoned");

        let wanted: Vec<Channel> = channels.map(|c| c.to_vec()).unwrap_or_else(|| Channel::ALL.to_vec());
        let mut merged: Vec<ChannelMessage> = wanted
            .iter()
            .filter_map(|c| buffers.get(c))
            .flat_map(|buf| buf.iter().cloned())
            .filter(|m| since_sequence.is_none_or(|since| m.metadata.sequence > since))
            .collect();

        merged.sort_by_key(|m| m.metadata.sequence);
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        merged
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("sessions lock poisoned").len()
    }

    /// Evict sessions whose newest message is older than `max_age`. Intended
    /// for the periodic cleanup task in §5 — must never run against a live
    /// turn, so callers are responsible for scheduling this outside the
    /// per-session turn lock.
    pub fn evict_older_than(&self, max_age: chrono::Duration) {
        let cutoff = chrono::Utc::now() - max_age;
        let mut sessions = self.sessions.write().expect("sessions lock poisoned");
        sessions.retain(|_, store| {
            let buffers = store.buffers.read().expect("buffers lock poisoned");
            let newest = buffers
                .values()
                .flat_map(|buf| buf.iter())
                .map(|m| m.metadata.timestamp)
                .max();
            match newest {
                Some(ts) => ts >= cutoff,
                None => true,
            }
        });
    }
}

impl Default for ChannelStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::types::ChannelMetadata;

    fn msg(channel: Channel, seq: u64, partial: bool) -> ChannelMessage {
        ChannelMessage {
            channel,
            content: "x".into(),
            metadata: ChannelMetadata {
                sequence: seq,
                is_partial: partial,
                ..Default::default()
            },
        }
    }

    #[test]
    fn sequence_is_monotone_across_channels() {
        let storage = ChannelStorage::new();
        let s1 = storage.allocate_sequence("sess", Channel::Final, false);
        let s2 = storage.allocate_sequence("sess", Channel::Commentary, false);
        assert!(s2 > s1);
    }

    #[test]
    fn streaming_partials_reuse_sequence_until_close() {
        let storage = ChannelStorage::new();
        let first = storage.allocate_sequence("sess", Channel::Final, true);
        let second = storage.allocate_sequence("sess", Channel::Final, true);
        let close = storage.allocate_sequence("sess", Channel::Final, false);
        assert_eq!(first, second, "partials reuse the same sequence");
        assert_eq!(second, close, "closing message carries the same sequence");

        let next = storage.allocate_sequence("sess", Channel::Final, false);
        assert!(next > close, "a later message gets a fresh sequence");
    }

    #[test]
    fn new_nonstreaming_response_clears_pending() {
        let storage = ChannelStorage::new();
        let pending = storage.allocate_sequence("sess", Channel::Analysis, true);
        storage.clear_pending("sess");
        let fresh = storage.allocate_sequence("sess", Channel::Analysis, false);
        assert!(fresh > pending, "clearing pending forces a new sequence");
    }

    #[test]
    fn retrieval_filters_and_sorts() {
        let storage = ChannelStorage::new();
        storage.append("sess", msg(Channel::Analysis, 1, false));
        storage.append("sess", msg(Channel::Final, 2, false));
        storage.append("sess", msg(Channel::Commentary, 3, false));

        let all = storage.get_channel_history("sess", None, None, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].metadata.sequence, 1);

        let final_only = storage.get_channel_history("sess", Some(&[Channel::Final]), None, None);
        assert_eq!(final_only.len(), 1);

        let since = storage.get_channel_history("sess", None, Some(1), None);
        assert_eq!(since.len(), 2);

        let limited = storage.get_channel_history("sess", None, None, Some(1));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn circular_buffer_drops_oldest_beyond_capacity() {
        let storage = ChannelStorage::with_capacity(2);
        for i in 0..5u64 {
            storage.append("sess", msg(Channel::Final, i, false));
        }
        let history = storage.get_channel_history("sess", None, None, None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].metadata.sequence, 3);
        assert_eq!(history[1].metadata.sequence, 4);
    }

    #[test]
    fn storage_retains_hidden_channels_regardless_of_visibility() {
        // Storage has no concept of visibility at all — that's enforced only
        // on the outbound notification path (§4.3 "Visibility").
        let storage = ChannelStorage::new();
        storage.append("sess", msg(Channel::Analysis, 1, false));
        let history = storage.get_channel_history("sess", Some(&[Channel::Analysis]), None, None);
        assert_eq!(history.len(), 1);
    }
}
