//! The shared, runtime-mutable host blocklist.
//!
//! Tokens are plain text fragments. The matching direction is fixed and easy
//! to invert accidentally, so it is stated here as the module's invariant:
//!
//! > A stored token matches a candidate host when the **token is a substring
//! > of the host** — never the reverse.
//!
//! The store is an ordered sequence: `block` appends, `unblock` removes the
//! first entry (in insertion order) matching the given host. Duplicate
//! tokens are permitted.
//!
//! All operations take one exclusive lock for the duration of the scan or
//! mutation only; the lock is never held across I/O or an `.await`, so a
//! slow console command can never stall connection handling.

use std::sync::Mutex;

/// Thread-safe ordered collection of block tokens.
///
/// Shared between every connection handler and the command console; this is
/// the only shared mutable state in the proxy.
#[derive(Debug, Default)]
pub struct BlocklistStore {
    tokens: Mutex<Vec<String>>,
}

impl BlocklistStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token to the end of the sequence. Duplicates are kept.
    pub fn block(&self, token: impl Into<String>) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.push(token.into());
    }

    /// Remove the first stored token that is a substring of
    /// `candidate_host`. No-op when none match.
    ///
    /// Removal uses the same token ⊆ host rule as filtering, not token
    /// equality: `unblock("api.example.com")` removes a stored
    /// `"example.com"` entry.
    pub fn unblock(&self, candidate_host: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(idx) = tokens.iter().position(|t| candidate_host.contains(t.as_str())) {
            tokens.remove(idx);
        }
    }

    /// Whether any stored token is a substring of `host`.
    #[must_use]
    pub fn is_blocked(&self, host: &str) -> bool {
        self.matched_token(host).is_some()
    }

    /// The first stored token (in insertion order) that is a substring of
    /// `host`, for the filter's audit log line.
    #[must_use]
    pub fn matched_token(&self, host: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.iter().find(|t| host.contains(t.as_str())).cloned()
    }

    /// Number of stored tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_token_substring_of_host_blocks() {
        let store = BlocklistStore::new();
        store.block("example.com");
        assert!(store.is_blocked("example.com"));
        assert!(store.is_blocked("api.example.com"));
        assert!(store.is_blocked("example.com:443"));
    }

    #[test]
    fn test_match_direction_never_reversed() {
        // The host being a substring of the token must NOT match.
        let store = BlocklistStore::new();
        store.block("api.example.com");
        assert!(!store.is_blocked("example.com"));
        assert!(store.is_blocked("api.example.com"));
    }

    #[test]
    fn test_unmatched_host_not_blocked() {
        let store = BlocklistStore::new();
        store.block("example.com");
        assert!(!store.is_blocked("example.org"));
    }

    #[test]
    fn test_unblock_removes_first_matching_entry() {
        let store = BlocklistStore::new();
        store.block("example");
        store.block("example.com");
        // Both entries match; only the first (insertion order) is removed.
        store.unblock("api.example.com");
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.matched_token("api.example.com").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn test_unblock_uses_substring_rule_not_equality() {
        let store = BlocklistStore::new();
        store.block("example.com");
        // Exact token not supplied, but the token is a substring of the host.
        store.unblock("sub.example.com:8080");
        assert!(store.is_empty());
    }

    #[test]
    fn test_unblock_no_match_is_noop() {
        let store = BlocklistStore::new();
        store.block("example.com");
        store.unblock("unrelated.org");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicates_permitted_and_removed_one_at_a_time() {
        let store = BlocklistStore::new();
        store.block("example.com");
        store.block("example.com");
        assert_eq!(store.len(), 2);
        store.unblock("example.com");
        assert!(store.is_blocked("example.com"));
        store.unblock("example.com");
        assert!(!store.is_blocked("example.com"));
    }

    #[test]
    fn test_matched_token_reports_first_in_insertion_order() {
        let store = BlocklistStore::new();
        store.block("com");
        store.block("example");
        assert_eq!(store.matched_token("example.com").unwrap(), "com");
    }

    #[test]
    fn test_empty_store_blocks_nothing() {
        let store = BlocklistStore::new();
        assert!(!store.is_blocked("example.com"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_mutation_stress() {
        // Writers block+unblock in balanced pairs while readers scan.
        // The store must end exactly with the residue the pairs leave and
        // never corrupt (no lost updates, no panics).
        let store = Arc::new(BlocklistStore::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for j in 0..500 {
                    let token = format!("host-{i}-{j}.example.com");
                    store.block(token.clone());
                    assert!(store.is_blocked(&token));
                    store.unblock(&token);
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..2000 {
                    let _ = store.is_blocked("probe.example.com");
                    let _ = store.len();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.is_empty());
    }
}
