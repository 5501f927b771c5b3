use std::{collections::HashMap, sync::Mutex};

use tokio::time::Instant;

/// One control point's subscription to a single service's eventing. Tracks
/// everything the device side needs to push `NOTIFY` requests and accept
/// renewals: `tracker, subscribers_store` holds one of these per `sid`.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub sid: uuid::Uuid,
    pub callback: String,
    pub service_name: &'static str,
    pub expires_at: Instant,
    pub seq: u32,
}

impl Subscriber {
    /// The next SEQ to stamp on an outgoing NOTIFY, incrementing the
    /// internal counter. SEQ starts at 0 for the subscription's initial
    /// event message and saturates rather than wraps, per GENA.
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.saturating_add(1);
        seq
    }
}

/// Device-side registry of active GENA subscriptions, keyed by SID. One
/// store is shared across all services hosted by a device; `service_name`
/// on each [`Subscriber`] scopes property-change notifications to the
/// right subscribers.
#[derive(Debug, Default)]
pub struct SubscribersStore {
    subscribers: Mutex<HashMap<uuid::Uuid, Subscriber>>,
}

impl SubscribersStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: String, service_name: &'static str, timeout_secs: u64) -> Subscriber {
        let sid = uuid::Uuid::new_v4();
        let subscriber = Subscriber {
            sid,
            callback,
            service_name,
            expires_at: Instant::now() + std::time::Duration::from_secs(timeout_secs),
            seq: 0,
        };
        self.subscribers
            .lock()
            .unwrap()
            .insert(sid, subscriber.clone());
        subscriber
    }

    /// Extends an existing subscription's lease without resetting SEQ. `None`
    /// means the SID is unknown (caller should reply 412 Precondition Failed).
    pub fn renew(&self, sid: uuid::Uuid, timeout_secs: u64) -> Option<Subscriber> {
        let mut subscribers = self.subscribers.lock().unwrap();
        let subscriber = subscribers.get_mut(&sid)?;
        subscriber.expires_at = Instant::now() + std::time::Duration::from_secs(timeout_secs);
        Some(subscriber.clone())
    }

    pub fn unsubscribe(&self, sid: uuid::Uuid) -> Option<Subscriber> {
        self.subscribers.lock().unwrap().remove(&sid)
    }

    pub fn get(&self, sid: uuid::Uuid) -> Option<Subscriber> {
        self.subscribers.lock().unwrap().get(&sid).cloned()
    }

    /// Removes every subscription whose lease has expired and returns them,
    /// so the caller can log or otherwise account for the drop.
    pub fn evict_expired(&self) -> Vec<Subscriber> {
        let now = Instant::now();
        let mut subscribers = self.subscribers.lock().unwrap();
        let expired: Vec<uuid::Uuid> = subscribers
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(sid, _)| *sid)
            .collect();
        expired
            .into_iter()
            .filter_map(|sid| subscribers.remove(&sid))
            .collect()
    }

    /// All active subscribers for a given service, used to fan a NOTIFY out
    /// whenever one of that service's evented state variables changes.
    pub fn subscribers_for(&self, service_name: &str) -> Vec<Subscriber> {
        self.subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.service_name == service_name)
            .cloned()
            .collect()
    }

    /// Bumps and returns the SEQ for `sid` ahead of sending a NOTIFY, so the
    /// caller can stamp the outgoing message without a second lookup.
    pub fn bump_seq(&self, sid: uuid::Uuid) -> Option<u32> {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.get_mut(&sid).map(|s| s.next_seq())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_unsubscribe_round_trips() {
        let store = SubscribersStore::new();
        let subscriber = store.subscribe("http://host/cb".into(), "content_directory", 1800);
        assert!(store.get(subscriber.sid).is_some());
        let removed = store.unsubscribe(subscriber.sid).unwrap();
        assert_eq!(removed.sid, subscriber.sid);
        assert!(store.get(subscriber.sid).is_none());
    }

    #[test]
    fn renew_unknown_sid_returns_none() {
        let store = SubscribersStore::new();
        assert!(store.renew(uuid::Uuid::new_v4(), 1800).is_none());
    }

    #[test]
    fn seq_increments_per_bump() {
        let store = SubscribersStore::new();
        let subscriber = store.subscribe("http://host/cb".into(), "content_directory", 1800);
        assert_eq!(store.bump_seq(subscriber.sid), Some(0));
        assert_eq!(store.bump_seq(subscriber.sid), Some(1));
    }

    #[test]
    fn subscribers_for_filters_by_service() {
        let store = SubscribersStore::new();
        store.subscribe("http://host/a".into(), "content_directory", 1800);
        store.subscribe("http://host/b".into(), "other_service", 1800);
        let found = store.subscribers_for("content_directory");
        assert_eq!(found.len(), 1);
    }
}
