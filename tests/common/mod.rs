//! Helpers shared by the integration tests: an aggregate call that records
//! its batches and holds each one until the test releases it, and polling
//! helpers for waiting on the dispatcher.
#![allow(dead_code)]

use futures::{
    channel::oneshot,
    executor::LocalPool,
    future::{BoxFuture, FutureExt},
    task::LocalSpawnExt,
};
use futures_timer::Delay;
use request_coalescer::{CoalesceConfig, CoalesceRules, Coalescer, StringCodec};
use std::{
    future::Future,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

/// What a gated aggregate call resolves to: the number of requests it
/// serviced, or an error message.
pub type Outcome = Result<usize, String>;

pub fn strings(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

pub fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

struct Call {
    requests: Vec<String>,
    release: Option<oneshot::Sender<Outcome>>,
}

/// An aggregate call whose batches only settle when the test says so.
#[derive(Default)]
pub struct Gates {
    calls: Mutex<Vec<Call>>,
}

impl Gates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn aggregate(self: &Arc<Self>) -> impl FnMut(Vec<String>) -> BoxFuture<'static, Outcome> {
        let gates = Arc::clone(self);

        move |requests: Vec<String>| {
            let (sender, receiver) = oneshot::channel();
            gates.calls.lock().unwrap().push(Call {
                requests: sorted(requests),
                release: Some(sender),
            });

            receiver
                .map(|outcome| outcome.unwrap_or_else(|_| Err("gate dropped".to_string())))
                .boxed()
        }
    }

    /// The requests of every aggregate call so far, sorted within each call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.requests.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Settle the `n`th aggregate call (counting from 0).
    pub fn release(&self, n: usize, outcome: Outcome) {
        let sender = self.calls.lock().unwrap()[n]
            .release
            .take()
            .expect("Test failure: released the same call twice");

        sender.send(outcome).unwrap();
    }

    pub fn succeed(&self, n: usize) {
        let len = self.calls.lock().unwrap()[n].requests.len();
        self.release(n, Ok(len));
    }
}

/// Records every call of `on_response`.
#[derive(Default)]
pub struct Responses {
    seen: Mutex<Vec<(usize, Vec<String>)>>,
}

impl Responses {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handler(self: &Arc<Self>) -> impl FnMut(usize, &[String]) {
        let responses = Arc::clone(self);

        move |response: usize, requests: &[String]| {
            responses
                .seen
                .lock()
                .unwrap()
                .push((response, sorted(requests.to_vec())));
        }
    }

    pub fn seen(&self) -> Vec<(usize, Vec<String>)> {
        self.seen.lock().unwrap().clone()
    }
}

const PATIENCE: Duration = Duration::from_secs(5);

/// Asynchronously wait until `condition` holds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();

    while !condition() {
        assert!(start.elapsed() < PATIENCE, "Test failure: timed out waiting for {}", what);
        Delay::new(Duration::from_millis(1)).await;
    }
}

/// Block the current thread until `condition` holds.
pub fn block_until(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();

    while !condition() {
        assert!(start.elapsed() < PATIENCE, "Test failure: timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Create a coalescer over string requests, backed by `gates` and reporting
/// to `responses`.
pub fn gated(
    config: CoalesceConfig,
    gates: &Arc<Gates>,
    responses: &Arc<Responses>,
) -> (
    Coalescer<String, StringCodec>,
    impl Future<Output = ()> + Send + 'static,
) {
    Coalescer::new(CoalesceRules {
        codec: StringCodec,
        aggregate: gates.aggregate(),
        on_response: responses.handler(),
        config,
    })
}

/// Run `test` to completion on a single-threaded pool, with the dispatcher
/// spawned alongside it.
pub fn run<T>(dispatcher: impl Future<Output = ()> + 'static, test: impl Future<Output = T>) -> T {
    let mut pool = LocalPool::new();
    pool.spawner().spawn_local(dispatcher).unwrap();
    pool.run_until(test)
}
