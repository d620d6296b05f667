//! In-memory set of server identities known to this run.

use std::collections::HashSet;
use std::sync::Mutex;

/// Identities discovered so far, shared by every worker in a cycle and kept
/// for the lifetime of the scheduler process.
///
/// Insertion is the single point of truth for "new vs. known": when
/// concurrent workers sight the same identity, exactly one of them observes
/// a `true` return and persists the record.
#[derive(Debug, Default)]
pub struct DiscoveryStore {
    known: Mutex<HashSet<String>>,
}

impl DiscoveryStore {
    /// Empty store. History from earlier runs is not reloaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set. Returns `true` exactly once per identity.
    pub fn insert(&self, identity: &str) -> bool {
        self.known.lock().unwrap().insert(identity.to_owned())
    }

    /// Whether the identity has been seen this run.
    pub fn contains(&self, identity: &str) -> bool {
        self.known.lock().unwrap().contains(identity)
    }

    /// Number of distinct identities seen this run.
    pub fn len(&self) -> usize {
        self.known.lock().unwrap().len()
    }

    /// True until the first discovery.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
