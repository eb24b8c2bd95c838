use std::{
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use futures_timer::Delay;
use tracing::trace;

/// Collapses bursts of signals into a single tick. Every [`signal`] restarts
/// the quiet window; the tick fires once the window elapses with no further
/// signals. [`fire_now`] skips the rest of the window.
///
/// The debounce doesn't own a task: it only makes progress while it is
/// polled, and it relies on the poller to re-poll it after every signal.
///
/// [`signal`]: Debounce::signal
/// [`fire_now`]: Debounce::fire_now
#[derive(Debug)]
pub(crate) struct Debounce {
    window: Duration,
    delay: Option<Delay>,
    immediate: bool,
}

impl Debounce {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            delay: None,
            immediate: false,
        }
    }

    /// Start the window, or restart it if it's already running.
    pub(crate) fn signal(&mut self) {
        match self.delay {
            Some(ref mut delay) => {
                trace!("debounce window restarted");
                delay.reset(self.window)
            }
            None => self.delay = Some(Delay::new(self.window)),
        }
    }

    /// Start the window if it isn't already running. Unlike `signal`, this
    /// doesn't push back a window that is already in progress.
    pub(crate) fn arm(&mut self) {
        if !self.is_armed() {
            self.delay = Some(Delay::new(self.window));
        }
    }

    /// Fire on the next poll, regardless of the window.
    pub(crate) fn fire_now(&mut self) {
        self.delay = None;
        self.immediate = true;
    }

    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.immediate || self.delay.is_some()
    }

    /// Check if the window has elapsed. Returns Ready at most once per
    /// window; an idle debounce is always Pending.
    pub(crate) fn poll_elapsed(&mut self, ctx: &mut Context<'_>) -> Poll<()> {
        if self.immediate {
            self.immediate = false;
            return Poll::Ready(());
        }

        match self.delay {
            None => Poll::Pending,
            Some(ref mut delay) => match delay.poll_unpin(ctx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(()) => {
                    self.delay = None;
                    Poll::Ready(())
                }
            },
        }
    }
}
