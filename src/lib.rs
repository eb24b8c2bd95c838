//! request-coalescer reduces many fine-grained requests into a small number
//! of batched ("aggregate") calls. Requests are collected for a short quiet
//! window, deduplicated against each other and against the batches that are
//! already in flight, and then dispatched together. Callers that need to know
//! when their data has arrived can wait for the specific batch that covers
//! their requests.
//!
//! ## Overview
//!
//! Suppose you have an API that can look up the titles of many documents in
//! a single call, but the parts of your application that need those titles
//! each ask for one or two at a time, whenever they happen to need them:
//!
//! ```
//! # use std::collections::HashMap;
//! #[derive(Debug)]
//! struct LookupError;
//!
//! async fn fetch_titles(uris: Vec<String>) -> Result<HashMap<String, String>, LookupError> {
//!     todo!()
//! }
//! ```
//!
//! A coalescer is configured with a [`CoalesceRules`], which has 4 fields:
//! - `codec` is a [`KeyCodec`], which converts each request to a canonical
//!   string key and back. The key is the request's identity for
//!   deduplication. [`StringCodec`] covers requests that are already
//!   strings, and [`FnCodec`] builds a codec out of closures.
//! - `aggregate` is the async function that performs a batched call.
//! - `on_response` receives each successful aggregate response along with
//!   the requests it covers. This is where the response is mapped back to
//!   individual requests; typically it populates a cache.
//! - `config` is a [`CoalesceConfig`], with the debounce window (50ms by
//!   default) and an optional cap on the size of a batch.
//!
//! [`Coalescer::new`] returns a [`Coalescer`] handle, and a [`Dispatcher`].
//! The dispatcher is a future that does the actual work: it should be
//! spawned on whatever executor your application uses.
//!
//! ```
//! # use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc, time::Duration};
//! use futures::{executor::LocalPool, task::LocalSpawnExt};
//! use request_coalescer::{CoalesceConfig, CoalesceRules, Coalescer, StringCodec};
//!
//! # #[derive(Debug)]
//! # struct LookupError;
//! # impl fmt::Display for LookupError {
//! #     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//! #         write!(f, "lookup failed")
//! #     }
//! # }
//! # async fn fetch_titles(uris: Vec<String>) -> Result<HashMap<String, String>, LookupError> {
//! #     Ok(uris.into_iter().map(|uri| { let title = uri.to_uppercase(); (uri, title) }).collect())
//! # }
//! let titles = Rc::new(RefCell::new(HashMap::<String, String>::new()));
//! let cache = Rc::clone(&titles);
//!
//! let (coalescer, dispatcher) = Coalescer::new(CoalesceRules {
//!     codec: StringCodec,
//!     aggregate: fetch_titles,
//!     on_response: move |response: HashMap<String, String>, _uris: &[String]| {
//!         cache.borrow_mut().extend(response);
//!     },
//!     config: CoalesceConfig::default().with_window(Duration::from_millis(5)),
//! });
//!
//! let mut pool = LocalPool::new();
//! pool.spawner().spawn_local(dispatcher).unwrap();
//! ```
//!
//! Once you have a [`Coalescer`], there are two ways to use it. [`enqueue`]
//! simply queues requests for the next batch; this is useful for prefetching.
//! [`await_ready`] returns a [`Ready`] future that resolves once the batch
//! servicing those requests has settled, at which point `on_response` has
//! already seen the data.
//!
//! ```
//! # use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc, time::Duration};
//! # use futures::{executor::LocalPool, task::LocalSpawnExt};
//! # use request_coalescer::{CoalesceConfig, CoalesceRules, Coalescer, StringCodec};
//! # #[derive(Debug)]
//! # struct LookupError;
//! # impl fmt::Display for LookupError {
//! #     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//! #         write!(f, "lookup failed")
//! #     }
//! # }
//! # async fn fetch_titles(uris: Vec<String>) -> Result<HashMap<String, String>, LookupError> {
//! #     Ok(uris.into_iter().map(|uri| { let title = uri.to_uppercase(); (uri, title) }).collect())
//! # }
//! # let titles = Rc::new(RefCell::new(HashMap::<String, String>::new()));
//! # let cache = Rc::clone(&titles);
//! # let (coalescer, dispatcher) = Coalescer::new(CoalesceRules {
//! #     codec: StringCodec,
//! #     aggregate: fetch_titles,
//! #     on_response: move |response: HashMap<String, String>, _uris: &[String]| {
//! #         cache.borrow_mut().extend(response);
//! #     },
//! #     config: CoalesceConfig::default().with_window(Duration::from_millis(5)),
//! # });
//! # let mut pool = LocalPool::new();
//! # pool.spawner().spawn_local(dispatcher).unwrap();
//! pool.run_until(async {
//!     // Both of these end up in the same batch
//!     let intro = coalescer.await_ready(&["intro".to_string()]);
//!     let outro = coalescer.await_ready(&["outro".to_string()]);
//!
//!     intro.await.unwrap();
//!     outro.await.unwrap();
//! });
//!
//! assert_eq!(titles.borrow()["intro"], "INTRO");
//! assert_eq!(titles.borrow()["outro"], "OUTRO");
//! ```
//!
//! ## Design notes
//!
//! ### Waiting on batches, not on values
//!
//! Unlike a dataloader, a coalescer doesn't hand values back to the callers
//! that requested them. Each batch has an index, and waiting means waiting
//! for particular indexes to settle. If one in-flight batch already covers
//! all of a caller's requests, the caller waits on that batch. Otherwise its
//! requests are enqueued, and the caller waits until each of them has gone
//! out in a freshly dispatched batch and every one of those batches has
//! settled. Usually that is a single batch, but `max_keys` can split the
//! requests, and requests still in flight from an earlier batch go out later
//! than the rest (see below).
//!
//! Requests that are split across two different in-flight batches are
//! treated as not covered, and are enqueued again. Batches can settle in any
//! order, so neither one can vouch for the whole set; rather than waiting on
//! both, the requests are serviced again by fresh batches.
//!
//! ### In-flight deduplication
//!
//! A request is never part of two in-flight batches at once. If a request is
//! enqueued while it's already in flight, it stays queued until its batch
//! settles and then goes out in a new batch. A drain in which every pending
//! request is already in flight creates no batch at all.
//!
//! ### Failure
//!
//! A failed aggregate call is logged with [`tracing`] and then treated like a
//! success with no data: `on_response` isn't called, but the batch is retired
//! and everyone waiting on it is released. Nothing is retried; if the data is
//! still needed, enqueue it again. Timeouts are the aggregate function's job.
//!
//! ### Runtime independence
//!
//! Everything is driven by polling the [`Dispatcher`]. The debounce window is
//! a [`futures_timer::Delay`], and in-flight calls are polled concurrently by
//! the dispatcher itself, so no particular async runtime is required.
//!
//! [`enqueue`]: Coalescer::enqueue
//! [`await_ready`]: Coalescer::await_ready

mod codec;
mod coalescer;
mod config;
mod debounce;
mod dispatcher;
mod error;
mod pending;
mod registry;
mod signal;

pub use codec::{FnCodec, KeyCodec, StringCodec};
pub use coalescer::{CoalesceRules, Coalescer, Ready};
pub use config::{CoalesceConfig, DEFAULT_WINDOW};
pub use dispatcher::Dispatcher;
pub use error::CoalesceError;
pub use registry::BatchIndex;
