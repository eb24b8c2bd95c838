use std::{
    collections::{HashMap, HashSet},
    mem,
    num::NonZeroUsize,
    task::{Poll, Waker},
};

use crate::{error::CoalesceError, registry::BatchIndex};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

#[derive(Debug)]
enum Waiter {
    /// The waiter fires once every one of its keys has gone out in a batch
    /// and every such batch has settled. The waker is absent until the
    /// associated future is first polled.
    Waiting {
        /// Keys that haven't been dispatched since the wait began.
        outstanding: HashSet<String>,

        /// Dispatched batches carrying this waiter's keys that haven't
        /// settled yet.
        batches: Vec<BatchIndex>,
        waker: Option<Waker>,
    },
    Fired,
    Closed,
}

/// The completion broadcast for batches. Each caller of `await_ready`
/// registers a waiter, either on a single in-flight batch that already covers
/// its requests, or on a set of keys that still have to be dispatched. As
/// batches go out, waiters of the second kind pick up the indexes of the
/// batches that carry their keys; a waiter fires when the last of its
/// batches settles and none of its keys is left undispatched.
///
/// Waiters are registered at the moment they are created, not when they are
/// first polled, so a completion that is published in between is not lost.
///
/// Tokens cannot be cloned or otherwise duplicated outside this module; each
/// token belongs to exactly one `Ready` future, which must take care to
/// discard it when dropped.
#[derive(Debug)]
pub(crate) struct CompletionSignal {
    waiters: HashMap<Token, Waiter>,
    closed: bool,

    // Tokens are an ever-increasing integer, like batch indexes.
    next_token: NonZeroUsize,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self {
            waiters: HashMap::new(),
            closed: false,
            next_token: NonZeroUsize::new(1).unwrap(),
        }
    }
}

impl CompletionSignal {
    fn insert(&mut self, waiter: Waiter) -> Token {
        let token = Token(self.next_token);
        self.next_token = self
            .next_token
            .get()
            .checked_add(1)
            .and_then(NonZeroUsize::new)
            .expect("Overflow when creating token");

        self.waiters.insert(token.duplicate(), waiter);
        token
    }

    fn insert_waiting(&mut self, outstanding: HashSet<String>, batches: Vec<BatchIndex>) -> Token {
        if self.closed {
            self.insert(Waiter::Closed)
        } else {
            self.insert(Waiter::Waiting {
                outstanding,
                batches,
                waker: None,
            })
        }
    }

    /// Register interest in the completion of the in-flight batch `index`.
    /// If the signal is already closed, the waiter is registered as closed.
    #[must_use]
    pub(crate) fn add_waiter_on(&mut self, index: BatchIndex) -> Token {
        self.insert_waiting(HashSet::new(), vec![index])
    }

    /// Register interest in a set of keys that have yet to be dispatched.
    /// If the signal is already closed, the waiter is registered as closed.
    #[must_use]
    pub(crate) fn add_waiter_for(&mut self, keys: HashSet<String>) -> Token {
        debug_assert!(!keys.is_empty());
        self.insert_waiting(keys, Vec::new())
    }

    /// Register a waiter that has nothing to wait for.
    #[must_use]
    pub(crate) fn add_fired(&mut self) -> Token {
        self.insert(Waiter::Fired)
    }

    /// Record that batch `index` has gone out with `keys`. Every waiter that
    /// is still waiting for one of those keys now also waits for this batch.
    /// Returns how many waiters were affected.
    pub(crate) fn dispatched(&mut self, index: BatchIndex, keys: &[String]) -> usize {
        let mut joined = 0;

        for waiter in self.waiters.values_mut() {
            if let Waiter::Waiting {
                outstanding,
                batches,
                ..
            } = waiter
            {
                if outstanding.is_empty() {
                    continue;
                }

                let carried = keys
                    .iter()
                    .filter(|key| outstanding.remove(key.as_str()))
                    .count();

                if carried > 0 {
                    batches.push(index);
                    joined += 1;
                }
            }
        }

        joined
    }

    /// Publish the completion of a batch. Every waiter for which this was
    /// the last thing to wait for is fired and woken; returns how many there
    /// were.
    pub(crate) fn publish(&mut self, index: BatchIndex) -> usize {
        let mut fired = 0;

        for waiter in self.waiters.values_mut() {
            let done = match waiter {
                Waiter::Waiting {
                    outstanding,
                    batches,
                    ..
                } => match batches.iter().position(|&batch| batch == index) {
                    Some(position) => {
                        batches.swap_remove(position);
                        batches.is_empty() && outstanding.is_empty()
                    }
                    None => false,
                },
                _ => false,
            };

            if done {
                if let Waiter::Waiting {
                    waker: Some(waker), ..
                } = mem::replace(waiter, Waiter::Fired)
                {
                    waker.wake();
                }
                fired += 1;
            }
        }

        fired
    }

    /// Close the signal. Every outstanding waiter resolves with
    /// [`CoalesceError::Closed`], as do waiters added from now on.
    pub(crate) fn close(&mut self) {
        self.closed = true;

        for waiter in self.waiters.values_mut() {
            if let Waiter::Waiting { .. } = *waiter {
                if let Waiter::Waiting {
                    waker: Some(waker), ..
                } = mem::replace(waiter, Waiter::Closed)
                {
                    waker.wake();
                }
            }
        }
    }

    /// Check a waiter. If it has fired (or the signal closed), the waiter is
    /// removed and the token becomes invalid. Otherwise the waker is stored,
    /// replacing the one from a previous poll; it is passed by reference and
    /// set with clone_from because it comes from a Context and will need to
    /// be cloned anyway.
    ///
    /// Panics if the token is not present in the set.
    pub(crate) fn poll_waiter(
        &mut self,
        token: &Token,
        waker: &Waker,
    ) -> Poll<Result<(), CoalesceError>> {
        let waiter = self
            .waiters
            .get_mut(token)
            .expect("Attempted to poll a waiter with an invalid token");

        let outcome = match waiter {
            Waiter::Waiting { waker: slot, .. } => {
                match slot {
                    Some(stored) => stored.clone_from(waker),
                    None => *slot = Some(waker.clone()),
                }
                return Poll::Pending;
            }
            Waiter::Fired => Ok(()),
            Waiter::Closed => Err(CoalesceError::Closed),
        };

        self.waiters.remove(token);
        Poll::Ready(outcome)
    }

    /// Discard a waiter without waiting for it. No-op if it is already gone.
    pub(crate) fn discard(&mut self, token: Token) {
        self.waiters.remove(&token);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of waiters that have not yet been resolved.
    pub(crate) fn waiting(&self) -> usize {
        self.waiters
            .values()
            .filter(|waiter| matches!(waiter, Waiter::Waiting { .. }))
            .count()
    }
}
