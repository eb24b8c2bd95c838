//! Canonicalization of individual requests.
//!
//! The coalescer never looks inside a request. Instead, it relies on a
//! [`KeyCodec`] to turn each request into a canonical string key (used for
//! deduplication in the pending set and for in-flight membership), to turn
//! a key back into a request when a batch is dispatched, and to compare two
//! requests semantically when deciding whether an in-flight batch already
//! covers a caller's requests.

use std::fmt::{self, Debug, Formatter};

/// Conversion between individual requests and their canonical keys.
///
/// `to_key` and `from_key` must be consistent with each other:
/// `from_key(&to_key(x))` should be interchangeable with `x` for the purpose
/// of making an aggregate call.
pub trait KeyCodec<I> {
    /// Get the canonical key for a request. Two requests with the same key
    /// are the same request as far as deduplication is concerned.
    fn to_key(&self, request: &I) -> String;

    /// Rebuild a request from its canonical key.
    fn from_key(&self, key: &str) -> I;

    /// Semantic equality, used when searching in-flight batches. The default
    /// compares canonical keys; override it when a request carries fields
    /// that don't matter for batching identity.
    fn equals(&self, a: &I, b: &I) -> bool {
        self.to_key(a) == self.to_key(b)
    }
}

/// Codec for requests that are already strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl KeyCodec<String> for StringCodec {
    #[inline]
    fn to_key(&self, request: &String) -> String {
        request.clone()
    }

    #[inline]
    fn from_key(&self, key: &str) -> String {
        key.to_owned()
    }

    #[inline]
    fn equals(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// A [`KeyCodec`] assembled from three closures.
#[derive(Clone)]
pub struct FnCodec<ToKey, FromKey, Equals> {
    pub to_key: ToKey,
    pub from_key: FromKey,
    pub equals: Equals,
}

impl<ToKey, FromKey, Equals> FnCodec<ToKey, FromKey, Equals> {
    pub fn new(to_key: ToKey, from_key: FromKey, equals: Equals) -> Self {
        Self {
            to_key,
            from_key,
            equals,
        }
    }
}

impl<ToKey, FromKey, Equals> Debug for FnCodec<ToKey, FromKey, Equals> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCodec")
            .field("to_key", &"<closure>")
            .field("from_key", &"<closure>")
            .field("equals", &"<closure>")
            .finish()
    }
}

impl<I, ToKey, FromKey, Equals> KeyCodec<I> for FnCodec<ToKey, FromKey, Equals>
where
    ToKey: Fn(&I) -> String,
    FromKey: Fn(&str) -> I,
    Equals: Fn(&I, &I) -> bool,
{
    fn to_key(&self, request: &I) -> String {
        (self.to_key)(request)
    }

    fn from_key(&self, key: &str) -> I {
        (self.from_key)(key)
    }

    fn equals(&self, a: &I, b: &I) -> bool {
        (self.equals)(a, b)
    }
}
