use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use futures::channel::mpsc;
use tracing::trace;

use crate::{
    codec::KeyCodec,
    config::CoalesceConfig,
    dispatcher::Dispatcher,
    error::CoalesceError,
    pending::PendingSet,
    registry::{BatchIndex, InFlightRegistry},
    signal::{CompletionSignal, Token},
};

/// Everything that is shared between the [`Coalescer`] handles, the
/// [`Ready`] futures and the [`Dispatcher`]. All of it sits behind a single
/// mutex, so that enqueueing, draining, registering waiters and retiring
/// batches are serialized with respect to each other.
#[derive(Debug)]
pub(crate) struct Shared<I> {
    pub(crate) pending: PendingSet,
    pub(crate) registry: InFlightRegistry<I>,

    /// The index that the next dispatched batch will get.
    pub(crate) next_index: BatchIndex,
    pub(crate) signal: CompletionSignal,
}

impl<I> Shared<I> {
    fn new() -> Self {
        Self {
            pending: PendingSet::new(),
            registry: InFlightRegistry::default(),
            next_index: BatchIndex::first(),
            signal: CompletionSignal::default(),
        }
    }
}

pub(crate) type SharedState<I> = Arc<Mutex<Shared<I>>>;

// The crate is built with panic=abort, so the mutex can't be poisoned by a
// panicking callback. If that ever changes, every handle will panic along
// with the callback, which is the behavior we want anyway.
pub(crate) fn lock<I>(state: &SharedState<I>) -> MutexGuard<'_, Shared<I>> {
    state.lock().unwrap()
}

/// Messages from the handles to the dispatcher's debounce trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// Requests were added; restart the window.
    Enqueued,

    /// The pending set reached `max_keys`; dispatch without waiting.
    Full,
}

/// The rules for a coalescer: how to canonicalize requests, how to service a
/// batch of them, and what to do with the result.
///
/// - `codec` converts requests to and from their canonical keys; see
///   [`KeyCodec`].
/// - `aggregate` performs the batched call. It's called with the deduplicated
///   requests of one batch and returns a future resolving to the aggregate
///   response. An `Err` is logged and otherwise swallowed; it is never
///   retried.
/// - `on_response` receives each successful aggregate response along with
///   the requests it covers. It runs on the dispatcher, before the batch's
///   waiters are released, so anything it stores is visible to them.
/// - `config` holds the debounce window and the optional batch size cap.
#[derive(Debug, Clone, Default)]
pub struct CoalesceRules<Codec, Aggregate, OnResponse> {
    pub codec: Codec,
    pub aggregate: Aggregate,
    pub on_response: OnResponse,
    pub config: CoalesceConfig,
}

/// A handle for submitting requests to a coalescer. Handles are cheap to
/// clone and can be shared across tasks and threads; all of them feed the
/// same [`Dispatcher`].
pub struct Coalescer<I, C> {
    shared: SharedState<I>,
    codec: Arc<C>,
    config: CoalesceConfig,
    triggers: mpsc::UnboundedSender<Trigger>,
}

impl<I, C> Clone for Coalescer<I, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            codec: Arc::clone(&self.codec),
            config: self.config,
            triggers: self.triggers.clone(),
        }
    }
}

impl<I, C> Debug for Coalescer<I, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("config", &self.config)
            .field("codec", &"<codec>")
            .finish()
    }
}

impl<I, C> Coalescer<I, C>
where
    C: KeyCodec<I>,
{
    /// Create a coalescer from a set of rules. Returns the handle along with
    /// the [`Dispatcher`], a future that performs the actual batching. The
    /// dispatcher must be spawned on an executor (or otherwise polled) for
    /// any batch to be dispatched.
    pub fn new<Aggregate, Fut, OnResponse>(
        rules: CoalesceRules<C, Aggregate, OnResponse>,
    ) -> (Self, Dispatcher<I, C, Aggregate, Fut, OnResponse>)
    where
        Aggregate: FnMut(Vec<I>) -> Fut,
    {
        let CoalesceRules {
            codec,
            aggregate,
            on_response,
            config,
        } = rules;

        let shared = Arc::new(Mutex::new(Shared::new()));
        let codec = Arc::new(codec);
        let (sender, receiver) = mpsc::unbounded();

        let dispatcher = Dispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&codec),
            config,
            receiver,
            aggregate,
            on_response,
        );

        let handle = Coalescer {
            shared,
            codec,
            config,
            triggers: sender,
        };

        (handle, dispatcher)
    }

    /// Queue requests for the next batch. Requests that are already queued
    /// are not queued twice. Requests that are currently in flight stay
    /// queued until their batch settles, and are then dispatched again in a
    /// fresh batch.
    ///
    /// Returns an error if the dispatcher is no longer running.
    pub fn enqueue(&self, requests: &[I]) -> Result<(), CoalesceError> {
        let keys = self.keys(requests);
        let mut shared = lock(&self.shared);
        self.enqueue_locked(&mut shared, keys)
    }

    fn keys(&self, requests: &[I]) -> Vec<String> {
        requests
            .iter()
            .map(|request| self.codec.to_key(request))
            .collect()
    }

    fn enqueue_locked(&self, shared: &mut Shared<I>, keys: Vec<String>) -> Result<(), CoalesceError> {
        if shared.signal.is_closed() {
            return Err(CoalesceError::Closed);
        }

        if keys.is_empty() {
            return Ok(());
        }

        let requests = keys.len();
        let added = keys
            .into_iter()
            .map(|key| shared.pending.add(key))
            .filter(|&added| added)
            .count();

        trace!(
            requests,
            added,
            pending = shared.pending.len(),
            "requests enqueued"
        );

        // The trigger is sent while the lock is held, so a concurrent drain
        // either sees these keys or sees the trigger that follows them.
        let trigger = if self.config.is_full(shared.pending.len()) {
            Trigger::Full
        } else {
            Trigger::Enqueued
        };

        self.triggers
            .unbounded_send(trigger)
            .map_err(|_| CoalesceError::Closed)
    }

    /// Get a future that resolves once the given requests have been serviced.
    ///
    /// If a single in-flight batch already covers every one of the requests,
    /// the future resolves when that batch settles. Otherwise, the requests
    /// are enqueued, and the future resolves once every one of them has gone
    /// out in a freshly dispatched batch and all of those batches have
    /// settled. This may take more than one batch: `max_keys` can split the
    /// requests, and requests that are still in flight from an earlier batch
    /// are only sent again after that batch settles.
    ///
    /// Requests that are split across several different in-flight batches
    /// count as not covered, and are enqueued again: batches can settle in
    /// any order, so there is no single batch to wait for.
    ///
    /// "Settles" includes failure. A resolved future means only that the
    /// relevant batches are finished; whether any data was delivered is up to
    /// the `on_response` callback. The future resolves with an error only if
    /// the dispatcher stops first.
    ///
    /// The wait is registered immediately, not when the future is first
    /// polled.
    pub fn await_ready(&self, requests: &[I]) -> Ready<I> {
        let mut shared = lock(&self.shared);

        let token = if requests.is_empty() {
            shared.signal.add_fired()
        } else {
            match shared.registry.find_covering(&*self.codec, requests) {
                Some(index) => {
                    trace!(batch = %index, "waiting on an in-flight batch");
                    shared.signal.add_waiter_on(index)
                }
                None => {
                    let keys = self.keys(requests);
                    let waiting_for = keys.iter().cloned().collect();

                    // On failure, the signal is closed, so the waiter is
                    // registered as closed and reports the error when polled.
                    let _ = self.enqueue_locked(&mut shared, keys);
                    trace!(requests = requests.len(), "waiting on fresh batches");
                    shared.signal.add_waiter_for(waiting_for)
                }
            }
        };

        Ready {
            token: Some(token),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of requests waiting for the next dispatch.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared).pending.len()
    }

    /// Number of batches whose aggregate call hasn't settled yet.
    pub fn in_flight_len(&self) -> usize {
        lock(&self.shared).registry.len()
    }

    /// The index that will be assigned to the next dispatched batch.
    pub fn next_batch_index(&self) -> BatchIndex {
        lock(&self.shared).next_index
    }
}

/// Future returned by [`Coalescer::await_ready`]. Resolves exactly once,
/// when the batches it is waiting for have settled.
pub struct Ready<I> {
    token: Option<Token>,
    shared: SharedState<I>,
}

impl<I> Debug for Ready<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ready")
            .field("token", &self.token)
            .finish()
    }
}

impl<I> Future for Ready<I> {
    type Output = Result<(), CoalesceError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        let token = unpinned
            .token
            .as_ref()
            .expect("Can't re-poll a completed Ready");

        let result = lock(&unpinned.shared)
            .signal
            .poll_waiter(token, ctx.waker());

        if result.is_ready() {
            // The waiter was removed from the signal along with the result
            unpinned.token = None;
        }

        result
    }
}

impl<I> Drop for Ready<I> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            lock(&self.shared).signal.discard(token);
        }
    }
}
