//! The pending set: canonical keys accumulated since the last dispatch.

use std::collections::HashSet;
use std::mem;
use std::num::NonZeroUsize;

/// A deduplicating set of canonical request keys, waiting for the next
/// dispatch. Keys are kept in arrival order so that a capped drain takes the
/// oldest keys first; order is otherwise irrelevant.
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    // `order` and `members` always hold exactly the same keys.
    order: Vec<String>,
    members: HashSet<String>,
}

/// The result of draining a [`PendingSet`].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Drained {
    /// Keys to include in the new batch.
    pub(crate) keys: Vec<String>,

    /// How many keys were left behind because they are already being serviced
    /// by an in-flight batch.
    pub(crate) deferred: usize,
}

impl PendingSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a key. Re-adding a key that is already pending is a no-op; returns
    /// true if the key was newly added.
    pub(crate) fn add(&mut self, key: String) -> bool {
        if self.members.contains(&key) {
            return false;
        }

        self.members.insert(key.clone());
        self.order.push(key);
        true
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Swap out the current contents for an empty set and return the keys
    /// that may be dispatched now. Keys for which `in_flight` returns true
    /// stay behind, as do any keys past `limit`; they will be picked up by a
    /// later drain.
    pub(crate) fn drain(
        &mut self,
        limit: Option<NonZeroUsize>,
        in_flight: impl Fn(&str) -> bool,
    ) -> Drained {
        let limit = limit.map_or(usize::MAX, NonZeroUsize::get);
        let order = mem::take(&mut self.order);
        self.members.clear();

        let mut drained = Drained::default();

        for key in order {
            if in_flight(&key) {
                drained.deferred += 1;
                self.add(key);
            } else if drained.keys.len() < limit {
                drained.keys.push(key);
            } else {
                self.add(key);
            }
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(set: &[&str]) -> Vec<String> {
        set.iter().map(|key| key.to_string()).collect()
    }

    #[test]
    fn add_is_idempotent() {
        let mut pending = PendingSet::new();

        assert!(pending.add("a".into()));
        assert!(pending.add("b".into()));
        assert!(!pending.add("a".into()));

        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn drain_empties_the_set() {
        let mut pending = PendingSet::new();
        pending.add("a".into());
        pending.add("b".into());

        let drained = pending.drain(None, |_| false);

        assert_eq!(drained.keys, keys(&["a", "b"]));
        assert_eq!(drained.deferred, 0);
        assert!(pending.is_empty());

        // A drained key can be queued again
        assert!(pending.add("a".into()));
    }

    #[test]
    fn drain_defers_in_flight_keys() {
        let mut pending = PendingSet::new();
        pending.add("a".into());
        pending.add("busy".into());
        pending.add("c".into());

        let drained = pending.drain(None, |key| key == "busy");

        assert_eq!(drained.keys, keys(&["a", "c"]));
        assert_eq!(drained.deferred, 1);
        assert_eq!(pending.len(), 1);

        let drained = pending.drain(None, |_| false);
        assert_eq!(drained.keys, keys(&["busy"]));
    }

    #[test]
    fn drain_respects_limit() {
        let mut pending = PendingSet::new();
        for key in &["a", "b", "c", "d", "e"] {
            pending.add(key.to_string());
        }

        let drained = pending.drain(NonZeroUsize::new(2), |_| false);
        assert_eq!(drained.keys, keys(&["a", "b"]));
        assert_eq!(pending.len(), 3);

        let drained = pending.drain(NonZeroUsize::new(2), |_| false);
        assert_eq!(drained.keys, keys(&["c", "d"]));

        let drained = pending.drain(NonZeroUsize::new(2), |_| false);
        assert_eq!(drained.keys, keys(&["e"]));
        assert!(pending.is_empty());
    }
}
