//! Bookkeeping for batches whose aggregate call has not yet settled.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::codec::KeyCodec;

/// Identifier of a dispatched batch. Indexes start at 1 and are assigned in
/// strictly increasing order, one per dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchIndex(NonZeroU64);

impl BatchIndex {
    pub(crate) fn first() -> BatchIndex {
        BatchIndex(NonZeroU64::new(1).unwrap())
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The index after this one. We assume no coalescer will ever dispatch
    /// 2^64 batches.
    pub(crate) fn next(self) -> BatchIndex {
        BatchIndex(
            self.0
                .get()
                .checked_add(1)
                .and_then(NonZeroU64::new)
                .expect("Overflow when allocating a batch index"),
        )
    }
}

impl Display for BatchIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A batch that has been handed to the aggregate call. Immutable once
/// created; dropped from the registry when the call settles.
#[derive(Debug)]
pub(crate) struct InFlightBatch<I> {
    pub(crate) index: BatchIndex,
    pub(crate) requests: Arc<[I]>,
    keys: HashSet<String>,
}

impl<I> InFlightBatch<I> {
    pub(crate) fn new(index: BatchIndex, keys: Vec<String>, requests: Vec<I>) -> Self {
        Self {
            index,
            requests: requests.into(),
            keys: keys.into_iter().collect(),
        }
    }

    /// True if every one of `wanted` matches (per the codec's semantic
    /// equality) some request in this batch.
    fn covers<C: KeyCodec<I>>(&self, codec: &C, wanted: &[I]) -> bool {
        wanted.iter().all(|wanted| {
            self.requests
                .iter()
                .any(|in_flight| codec.equals(in_flight, wanted))
        })
    }
}

/// The set of in-flight batches, in creation order.
#[derive(Debug)]
pub(crate) struct InFlightRegistry<I> {
    batches: Vec<InFlightBatch<I>>,
}

impl<I> Default for InFlightRegistry<I> {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
        }
    }
}

impl<I> InFlightRegistry<I> {
    pub(crate) fn insert(&mut self, batch: InFlightBatch<I>) {
        debug_assert!(
            self.batches.iter().all(|existing| existing.index < batch.index),
            "batch indexes must be registered in increasing order"
        );
        self.batches.push(batch);
    }

    /// Remove a batch from the registry, returning it if it was present.
    pub(crate) fn retire(&mut self, index: BatchIndex) -> Option<InFlightBatch<I>> {
        let position = self.batches.iter().position(|batch| batch.index == index)?;
        Some(self.batches.remove(position))
    }

    /// Get the requests of an in-flight batch.
    pub(crate) fn requests(&self, index: BatchIndex) -> Option<Arc<[I]>> {
        self.batches
            .iter()
            .find(|batch| batch.index == index)
            .map(|batch| Arc::clone(&batch.requests))
    }

    /// Check if a canonical key is part of any in-flight batch.
    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.batches.iter().any(|batch| batch.keys.contains(key))
    }

    /// Find the oldest single batch that covers all of `wanted`. Requests
    /// that are split across several batches are deliberately reported as
    /// not covered: batches may settle in any order, so no one of them can
    /// vouch for the whole set.
    pub(crate) fn find_covering<C: KeyCodec<I>>(
        &self,
        codec: &C,
        wanted: &[I],
    ) -> Option<BatchIndex> {
        self.batches
            .iter()
            .find(|batch| batch.covers(codec, wanted))
            .map(|batch| batch.index)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
