//! # Message Cache
//!
//! Collects at most one message per peer for each event and answers "have
//! enough fresh peers spoken?".
//!
//! ## Invariants
//!
//! - An event's creation timestamp is set by its first `insert` and never
//!   changes afterwards.
//! - A later `insert` for the same peer overwrites the earlier one.
//! - With `once = true`, `ready` reports `true` at most once per event, even
//!   while messages keep arriving.
//!
//! The cache is not synchronized; its owner guards it.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct CachedMessage {
    timestamp: i64,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct EventGroup<P> {
    creation_timestamp: i64,
    was_ready: bool,
    messages: HashMap<P, CachedMessage>,
}

/// Message cache generic over event and peer identifiers.
#[derive(Debug)]
pub struct MessageCache<E, P> {
    events: HashMap<E, EventGroup<P>>,
}

impl<E, P> Default for MessageCache<E, P> {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
        }
    }
}

impl<E, P> MessageCache<E, P>
where
    E: Eq + Hash + Clone,
    P: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` from `peer` and return the event's creation timestamp.
    pub fn insert(&mut self, event_id: E, peer_id: P, timestamp: i64, payload: Vec<u8>) -> i64 {
        let group = self.events.entry(event_id).or_insert_with(|| EventGroup {
            creation_timestamp: timestamp,
            was_ready: false,
            messages: HashMap::new(),
        });
        group
            .messages
            .insert(peer_id, CachedMessage { timestamp, payload });
        group.creation_timestamp
    }

    /// Whether at least `min_count` peers have a message with
    /// `timestamp >= min_timestamp`, together with exactly `min_count` of
    /// those payloads.
    ///
    /// Which qualifying payloads are returned is unspecified.
    pub fn ready(
        &mut self,
        event_id: &E,
        min_count: usize,
        min_timestamp: i64,
        once: bool,
    ) -> (bool, Vec<Vec<u8>>) {
        let Some(group) = self.events.get_mut(event_id) else {
            return (false, Vec::new());
        };
        if once && group.was_ready {
            return (false, Vec::new());
        }
        if group.messages.len() < min_count {
            return (false, Vec::new());
        }

        let mut payloads = Vec::with_capacity(min_count);
        if min_count > 0 {
            for message in group.messages.values() {
                if message.timestamp >= min_timestamp {
                    payloads.push(message.payload.clone());
                    if payloads.len() == min_count {
                        break;
                    }
                }
            }
        }

        if payloads.len() < min_count {
            return (false, Vec::new());
        }
        group.was_ready = true;
        (true, payloads)
    }

    /// Drop an event and everything collected for it.
    pub fn delete(&mut self, event_id: &E) {
        self.events.remove(event_id);
    }

    /// Drop every event created before `cutoff`; returns how many were dropped.
    pub fn delete_older_than(&mut self, cutoff: i64) -> usize {
        let before = self.events.len();
        self.events
            .retain(|_, group| group.creation_timestamp >= cutoff);
        before - self.events.len()
    }

    /// Drop every event whose newest message is older than `min_timestamp`,
    /// except those `keep` selects; returns how many were dropped.
    pub fn delete_stale<F>(&mut self, min_timestamp: i64, mut keep: F) -> usize
    where
        F: FnMut(&E) -> bool,
    {
        let before = self.events.len();
        self.events.retain(|event_id, group| {
            keep(event_id)
                || group
                    .messages
                    .values()
                    .any(|message| message.timestamp >= min_timestamp)
        });
        before - self.events.len()
    }

    /// Creation timestamp of an event, if known.
    pub fn creation_timestamp(&self, event_id: &E) -> Option<i64> {
        self.events.get(event_id).map(|g| g.creation_timestamp)
    }

    /// Number of peers with a message for an event.
    pub fn peer_count(&self, event_id: &E) -> usize {
        self.events.get(event_id).map_or(0, |g| g.messages.len())
    }

    pub fn contains(&self, event_id: &E) -> bool {
        self.events.contains_key(event_id)
    }

    /// Number of tracked events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Cache = MessageCache<&'static str, u8>;

    #[test]
    fn test_creation_timestamp_is_stable() {
        let mut cache = Cache::new();
        assert_eq!(cache.insert("ev", 1, 100, b"a".to_vec()), 100);
        assert_eq!(cache.insert("ev", 2, 200, b"b".to_vec()), 100);
        assert_eq!(cache.insert("ev", 1, 300, b"c".to_vec()), 100);
        assert_eq!(cache.creation_timestamp(&"ev"), Some(100));
    }

    #[test]
    fn test_reinsert_keeps_latest_payload_only() {
        let mut cache = Cache::new();
        cache.insert("ev", 1, 100, b"old".to_vec());
        cache.insert("ev", 1, 200, b"new".to_vec());

        assert_eq!(cache.peer_count(&"ev"), 1);
        let (ready, payloads) = cache.ready(&"ev", 1, 150, false);
        assert!(ready);
        assert_eq!(payloads, vec![b"new".to_vec()]);
    }

    #[test]
    fn test_ready_requires_min_count_fresh_peers() {
        let mut cache = Cache::new();
        cache.insert("ev", 1, 100, b"a".to_vec());
        cache.insert("ev", 2, 50, b"stale".to_vec());
        cache.insert("ev", 3, 120, b"a".to_vec());

        assert!(!cache.ready(&"ev", 3, 100, false).0);

        let (ready, payloads) = cache.ready(&"ev", 2, 100, false);
        assert!(ready);
        assert_eq!(payloads, vec![b"a".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_ready_returns_exactly_min_count_payloads() {
        let mut cache = Cache::new();
        for peer in 0..5 {
            cache.insert("ev", peer, 10, vec![peer]);
        }
        let (ready, payloads) = cache.ready(&"ev", 3, 0, false);
        assert!(ready);
        assert_eq!(payloads.len(), 3);
    }

    #[test]
    fn test_ready_once_signals_a_single_time() {
        let mut cache = Cache::new();
        cache.insert("ev", 1, 10, b"a".to_vec());
        cache.insert("ev", 2, 10, b"a".to_vec());

        assert!(cache.ready(&"ev", 2, 0, true).0);
        cache.insert("ev", 3, 10, b"a".to_vec());
        assert!(!cache.ready(&"ev", 2, 0, true).0);
        assert!(!cache.ready(&"ev", 3, 0, true).0);

        // Storage still accumulates and non-once queries still see it.
        assert_eq!(cache.peer_count(&"ev"), 3);
        assert!(cache.ready(&"ev", 3, 0, false).0);
    }

    #[test]
    fn test_unknown_event_is_never_ready() {
        let mut cache = Cache::new();
        assert_eq!(cache.ready(&"missing", 0, 0, false), (false, vec![]));
    }

    #[test]
    fn test_zero_min_count_is_trivially_ready() {
        let mut cache = Cache::new();
        cache.insert("ev", 1, 10, b"a".to_vec());
        assert_eq!(cache.ready(&"ev", 0, 0, true), (true, vec![]));
        assert_eq!(cache.ready(&"ev", 0, 0, true), (false, vec![]));
    }

    #[test]
    fn test_delete_older_than_uses_creation_time() {
        let mut cache = Cache::new();
        cache.insert("old", 1, 100, b"a".to_vec());
        cache.insert("old", 2, 500, b"a".to_vec());
        cache.insert("new", 1, 400, b"a".to_vec());

        assert_eq!(cache.delete_older_than(300), 1);
        assert!(!cache.contains(&"old"));
        assert!(cache.contains(&"new"));
        assert_eq!(cache.delete_older_than(300), 0);
    }

    #[test]
    fn test_delete_stale_uses_newest_message() {
        let mut cache = Cache::new();
        cache.insert("refreshed", 1, 100, b"a".to_vec());
        cache.insert("refreshed", 2, 500, b"a".to_vec());
        cache.insert("abandoned", 1, 100, b"a".to_vec());
        cache.insert("pinned", 1, 100, b"a".to_vec());

        assert_eq!(cache.delete_stale(300, |event| *event == "pinned"), 1);
        assert!(cache.contains(&"refreshed"));
        assert!(cache.contains(&"pinned"));
        assert!(!cache.contains(&"abandoned"));
    }

    #[test]
    fn test_delete_removes_event() {
        let mut cache = Cache::new();
        cache.insert("ev", 1, 100, b"a".to_vec());
        cache.delete(&"ev");
        cache.delete(&"ev");
        assert!(cache.is_empty());
    }
}
