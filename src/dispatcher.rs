use std::{
    fmt::{self, Debug, Display, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    channel::mpsc,
    future::FutureExt,
    stream::{FuturesUnordered, StreamExt},
};
use tracing::{debug, trace, warn};

use crate::{
    codec::KeyCodec,
    coalescer::{lock, SharedState, Trigger},
    config::CoalesceConfig,
    debounce::Debounce,
    registry::{BatchIndex, InFlightBatch},
};

/// A single aggregate call, tagged with the index of the batch it services.
struct BatchCall<Fut> {
    index: BatchIndex,
    fut: Pin<Box<Fut>>,
}

impl<Fut: Future> Future for BatchCall<Fut> {
    type Output = (BatchIndex, Fut::Output);

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let call = Pin::into_inner(self);
        let index = call.index;

        call.fut.poll_unpin(ctx).map(move |output| (index, output))
    }
}

/// The engine behind a [`Coalescer`](crate::Coalescer).
///
/// The dispatcher is a future that must be spawned on an executor (or
/// otherwise polled to completion). It owns the debounce window and all of
/// the in-flight aggregate calls, which it polls concurrently; it doesn't
/// depend on any particular runtime.
///
/// Once the debounce window elapses, the dispatcher drains the pending
/// requests into a new batch, registers it as in flight, and starts its
/// aggregate call. When that call settles, a successful response is handed
/// to `on_response`, the batch is retired, and everyone waiting on it is
/// released. A failed call is logged and releases its waiters just the same.
///
/// The dispatcher resolves once every `Coalescer` handle has been dropped
/// and all outstanding work has finished. When it resolves or is dropped,
/// the coalescer is closed: outstanding [`Ready`](crate::Ready) futures
/// resolve with [`CoalesceError::Closed`](crate::CoalesceError::Closed).
pub struct Dispatcher<I, C, Aggregate, Fut, OnResponse> {
    shared: SharedState<I>,
    codec: Arc<C>,
    config: CoalesceConfig,

    // None once every handle has been dropped
    triggers: Option<mpsc::UnboundedReceiver<Trigger>>,
    debounce: Debounce,
    running: FuturesUnordered<BatchCall<Fut>>,

    aggregate: Aggregate,
    on_response: OnResponse,
    finished: bool,
}

// Nothing is ever pinned through a Dispatcher; the aggregate futures are
// boxed.
impl<I, C, Aggregate, Fut, OnResponse> Unpin for Dispatcher<I, C, Aggregate, Fut, OnResponse> {}

impl<I, C, Aggregate, Fut, OnResponse> Debug for Dispatcher<I, C, Aggregate, Fut, OnResponse> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("debounce", &self.debounce)
            .field("running", &self.running.len())
            .field("aggregate", &"<closure>")
            .field("on_response", &"<closure>")
            .field("finished", &self.finished)
            .finish()
    }
}

impl<I, C, Aggregate, Fut, OnResponse> Dispatcher<I, C, Aggregate, Fut, OnResponse> {
    pub(crate) fn new(
        shared: SharedState<I>,
        codec: Arc<C>,
        config: CoalesceConfig,
        triggers: mpsc::UnboundedReceiver<Trigger>,
        aggregate: Aggregate,
        on_response: OnResponse,
    ) -> Self {
        Self {
            shared,
            codec,
            config,
            triggers: Some(triggers),
            debounce: Debounce::new(config.window),
            running: FuturesUnordered::new(),
            aggregate,
            on_response,
            finished: false,
        }
    }

    fn close(&mut self) {
        lock(&self.shared).signal.close();
    }
}

impl<I, C, Aggregate, Fut, OnResponse, Response, Error>
    Dispatcher<I, C, Aggregate, Fut, OnResponse>
where
    I: Clone,
    C: KeyCodec<I>,
    Aggregate: FnMut(Vec<I>) -> Fut,
    Fut: Future<Output = Result<Response, Error>>,
    OnResponse: FnMut(Response, &[I]),
    Error: Display,
{
    /// Drain the pending set into a new batch and start its aggregate call.
    /// Does nothing if there's nothing to dispatch.
    fn dispatch(&mut self) {
        let (index, requests) = {
            let mut shared = lock(&self.shared);
            let shared = &mut *shared;

            let registry = &shared.registry;
            let drained = shared
                .pending
                .drain(self.config.max_keys, |key| registry.contains_key(key));

            // Keys beyond max_keys get a window of their own. Deferred keys
            // wait until their batch settles instead; see `settle`.
            let overflow = shared.pending.len() - drained.deferred;
            if self.config.is_full(overflow) {
                self.debounce.fire_now();
            } else if overflow > 0 {
                self.debounce.signal();
            }

            if drained.keys.is_empty() {
                trace!(
                    deferred = drained.deferred,
                    "debounce window elapsed with nothing to dispatch"
                );
                return;
            }

            let index = shared.next_index;
            shared.next_index = index.next();

            let codec = &self.codec;
            let requests: Vec<I> = drained
                .keys
                .iter()
                .map(|key| codec.from_key(key))
                .collect();

            let waiters = shared.signal.dispatched(index, &drained.keys);

            debug!(
                batch = %index,
                requests = requests.len(),
                deferred = drained.deferred,
                waiters,
                "dispatching aggregate call"
            );

            shared
                .registry
                .insert(InFlightBatch::new(index, drained.keys, requests.clone()));

            (index, requests)
        };

        // The aggregate call is made outside of the lock; it's caller code.
        let fut = Box::pin((self.aggregate)(requests));
        self.running.push(BatchCall { index, fut });
    }

    /// Deliver the result of a batch, retire it, and release its waiters.
    fn settle(&mut self, index: BatchIndex, result: Result<Response, Error>) {
        let requests = lock(&self.shared)
            .registry
            .requests(index)
            .expect("Settled batch is missing from the in-flight registry");

        match result {
            Ok(response) => (self.on_response)(response, &requests[..]),
            Err(err) => {
                warn!(
                    batch = %index,
                    requests = requests.len(),
                    error = %err,
                    "aggregate call failed; releasing waiters without data"
                );

                let keys: Vec<String> = requests
                    .iter()
                    .map(|request| self.codec.to_key(request))
                    .collect();
                debug!(batch = %index, ?keys, "requests of the failed batch");
            }
        }

        let mut shared = lock(&self.shared);
        shared.registry.retire(index);
        let released = shared.signal.publish(index);

        debug!(
            batch = %index,
            released,
            still_waiting = shared.signal.waiting(),
            "batch settled"
        );

        // Requests that were deferred because they were part of this batch
        // can go out now.
        if !shared.pending.is_empty() {
            self.debounce.arm();
        }
    }
}

impl<I, C, Aggregate, Fut, OnResponse, Response, Error> Future
    for Dispatcher<I, C, Aggregate, Fut, OnResponse>
where
    I: Clone,
    C: KeyCodec<I>,
    Aggregate: FnMut(Vec<I>) -> Fut,
    Fut: Future<Output = Result<Response, Error>>,
    OnResponse: FnMut(Response, &[I]),
    Error: Display,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        let this = Pin::into_inner(self);

        if this.finished {
            return Poll::Ready(());
        }

        // Every step here can create work for the others (a trigger arms the
        // debounce, a dispatch adds a running call, a settled call re-arms the
        // debounce), so keep going until a full pass makes no progress. This
        // also ensures that everything that returned Pending has registered
        // our waker.
        loop {
            let mut progress = false;

            if let Some(triggers) = this.triggers.as_mut() {
                loop {
                    match triggers.poll_next_unpin(ctx) {
                        Poll::Ready(Some(Trigger::Enqueued)) => this.debounce.signal(),
                        Poll::Ready(Some(Trigger::Full)) => this.debounce.fire_now(),
                        Poll::Ready(None) => {
                            trace!("all coalescer handles dropped");
                            this.triggers = None;
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
            }

            if this.debounce.poll_elapsed(ctx).is_ready() {
                this.dispatch();
                progress = true;
            }

            while let Poll::Ready(Some((index, result))) = this.running.poll_next_unpin(ctx) {
                this.settle(index, result);
                progress = true;
            }

            if !progress {
                break;
            }
        }

        if this.triggers.is_none() && !this.debounce.is_armed() && this.running.is_empty() {
            debug_assert!(lock(&this.shared).registry.is_empty());
            debug!("dispatcher finished");
            this.finished = true;
            this.close();
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

impl<I, C, Aggregate, Fut, OnResponse> Drop for Dispatcher<I, C, Aggregate, Fut, OnResponse> {
    fn drop(&mut self) {
        // Anyone still waiting would otherwise wait forever. Aggregate calls
        // that are still running are dropped along with us; their batches
        // never settle.
        if !self.finished {
            self.close();
        }
    }
}
