use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::tokens::hash_token;

/// OAuth `state` values issued by the auth endpoint, kept only as hashes.
///
/// Each value can be consumed once, before its TTL runs out.
#[derive(Clone)]
pub struct OAuthStateStore {
    entries: Arc<Mutex<HashMap<Vec<u8>, Instant>>>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.prune_at(Instant::now());
            }
        })
    }

    pub fn issue(&self, state: &str) {
        self.issue_at(state, Instant::now());
    }

    pub fn consume(&self, state: &str) -> bool {
        self.consume_at(state, Instant::now())
    }

    fn issue_at(&self, state: &str, now: Instant) {
        let mut entries = self.entries.lock().expect("oauth state lock poisoned");
        entries.insert(hash_token(state), now + self.ttl);
    }

    fn consume_at(&self, state: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("oauth state lock poisoned");
        entries
            .remove(&hash_token(state))
            .is_some_and(|expires_at| expires_at > now)
    }

    fn prune_at(&self, now: Instant) {
        let mut entries = self.entries.lock().expect("oauth state lock poisoned");
        entries.retain(|_, expires_at| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_single_use() {
        let store = OAuthStateStore::new(Duration::from_secs(600));
        store.issue("abc");

        assert!(store.consume("abc"));
        assert!(!store.consume("abc"));
        assert!(!store.consume("never-issued"));
    }

    #[test]
    fn expired_states_are_rejected() {
        let store = OAuthStateStore::new(Duration::from_secs(600));
        let issued_at = Instant::now();
        store.issue_at("abc", issued_at);

        assert!(!store.consume_at("abc", issued_at + Duration::from_secs(600)));
    }

    #[test]
    fn prune_drops_only_expired_states() {
        let store = OAuthStateStore::new(Duration::from_secs(600));
        let issued_at = Instant::now();
        store.issue_at("old", issued_at);
        store.issue_at("new", issued_at + Duration::from_secs(300));

        store.prune_at(issued_at + Duration::from_secs(700));

        let entries = store.entries.lock().expect("oauth state lock poisoned");
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&hash_token("new")));
    }
}
