use std::{num::NonZeroUsize, time::Duration};

/// The default debounce window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(50);

/// Timing and sizing rules for a [`Coalescer`](crate::Coalescer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceConfig {
    /// The quiet period after the most recent `enqueue` before the pending
    /// requests are dispatched. Every enqueue restarts the window.
    pub window: Duration,

    /// Optional maximum number of requests per aggregate call. When this many
    /// requests are pending, they are dispatched immediately, regardless of
    /// the window. Requests beyond the limit wait for the next batch.
    pub max_keys: Option<NonZeroUsize>,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_keys: None,
        }
    }
}

impl CoalesceConfig {
    #[must_use]
    pub fn with_window(self, window: Duration) -> Self {
        Self { window, ..self }
    }

    #[must_use]
    pub fn with_max_keys(self, max_keys: usize) -> Self {
        Self {
            max_keys: NonZeroUsize::new(max_keys),
            ..self
        }
    }

    /// True if `pending` requests are enough to skip the rest of the window.
    pub(crate) fn is_full(&self, pending: usize) -> bool {
        match self.max_keys {
            Some(max_keys) => pending >= max_keys.get(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fifty_millis_uncapped() {
        let config = CoalesceConfig::default();
        assert_eq!(config.window, Duration::from_millis(50));
        assert_eq!(config.max_keys, None);
        assert!(!config.is_full(10_000));
    }

    #[test]
    fn builder_helpers() {
        let config = CoalesceConfig::default()
            .with_window(Duration::from_millis(5))
            .with_max_keys(3);

        assert_eq!(config.window, Duration::from_millis(5));
        assert!(!config.is_full(2));
        assert!(config.is_full(3));

        // Zero means "no cap"
        assert_eq!(config.with_max_keys(0).max_keys, None);
    }
}
