//! Short-lived "is typing" flags for private conversations.
//!
//! Kept in memory only; a flag lapses after [`TYPING_EXPIRY`] unless the
//! typist refreshes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use palaver_shared::constants::TYPING_EXPIRY;
use palaver_shared::Handle;

#[derive(Clone)]
pub struct TypingRegistry {
    /// `(typist, peer)` -> expiry deadline
    flags: Arc<Mutex<HashMap<(Handle, Handle), Instant>>>,
    ttl: Duration,
}

impl TypingRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            flags: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Record that `typist` is typing to `peer`.
    pub fn mark(&self, typist: &Handle, peer: &Handle) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.insert((typist.clone(), peer.clone()), Instant::now() + self.ttl);
        }
    }

    /// Drop the flag, e.g. once the typist's message is sent.
    pub fn clear(&self, typist: &Handle, peer: &Handle) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.remove(&(typist.clone(), peer.clone()));
        }
    }

    pub fn is_typing(&self, typist: &Handle, peer: &Handle) -> bool {
        let Ok(flags) = self.flags.lock() else {
            return false;
        };
        flags
            .get(&(typist.clone(), peer.clone()))
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    pub fn purge_expired(&self) -> usize {
        let Ok(mut flags) = self.flags.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = flags.len();
        flags.retain(|_, deadline| *deadline > now);
        before - flags.len()
    }
}

impl Default for TypingRegistry {
    fn default() -> Self {
        Self::new(TYPING_EXPIRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_expires() {
        let registry = TypingRegistry::default();
        registry.mark(&h("alice"), &h("bob"));

        assert!(registry.is_typing(&h("alice"), &h("bob")));
        // Directional: bob is not typing to alice.
        assert!(!registry.is_typing(&h("bob"), &h("alice")));

        tokio::time::advance(TYPING_EXPIRY + Duration::from_millis(1)).await;
        assert!(!registry.is_typing(&h("alice"), &h("bob")));
        assert_eq!(registry.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_clear() {
        let registry = TypingRegistry::default();
        registry.mark(&h("alice"), &h("bob"));
        tokio::time::advance(Duration::from_secs(2)).await;
        registry.mark(&h("alice"), &h("bob"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.is_typing(&h("alice"), &h("bob")));

        registry.clear(&h("alice"), &h("bob"));
        assert!(!registry.is_typing(&h("alice"), &h("bob")));
    }
}
