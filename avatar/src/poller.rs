//! Task Poller: the only looping control flow in the agent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::core::types::{TaskMessage, Topic};
use crate::io::backend::Backend;

/// Granularity at which sleeps observe a shutdown request.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Cooperative interrupt flag shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Injectable clock for the poll interval.
pub trait Sleeper {
    /// Wait up to `duration`, returning early once `shutdown` is requested.
    fn sleep(&self, duration: Duration, shutdown: &Shutdown);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) {
        (**self).sleep(duration, shutdown);
    }
}

/// Real sleeps, sliced into [`SHUTDOWN_POLL`] chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) {
        let mut remaining = duration;
        while !remaining.is_zero() && !shutdown.is_requested() {
            let slice = remaining.min(SHUTDOWN_POLL);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

/// Counters for one [`TaskPoller::run`] invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub cycles: u64,
    pub messages_handled: u64,
    pub fetch_errors: u64,
    pub handler_errors: u64,
}

pub struct TaskPoller<B: Backend, S: Sleeper = ThreadSleeper> {
    backend: B,
    topic_name: String,
    interval: Duration,
    sleeper: S,
    shutdown: Shutdown,
    max_cycles: Option<u64>,
    topic: Option<Topic>,
}

impl<B: Backend> TaskPoller<B> {
    pub fn new(backend: B, topic_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            backend,
            topic_name: topic_name.into(),
            interval,
            sleeper: ThreadSleeper,
            shutdown: Shutdown::new(),
            max_cycles: None,
            topic: None,
        }
    }
}

impl<B: Backend, S: Sleeper> TaskPoller<B, S> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> TaskPoller<B, S2> {
        TaskPoller {
            backend: self.backend,
            topic_name: self.topic_name,
            interval: self.interval,
            sleeper,
            shutdown: self.shutdown,
            max_cycles: self.max_cycles,
            topic: self.topic,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Stop after `max_cycles` fetches. `None` polls until shutdown.
    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    /// Resolve the topic name to an identifier. Returns `false` if it does not exist
    /// or the lookup failed.
    pub fn subscribe(&mut self) -> bool {
        match self.backend.find_topic(&self.topic_name) {
            Ok(Some(topic)) => {
                info!(topic = %topic.name, topic_id = topic.id, "subscribed");
                self.topic = Some(topic);
                true
            }
            Ok(None) => {
                error!(topic = %self.topic_name, "topic not found");
                false
            }
            Err(err) => {
                error!(topic = %self.topic_name, err = %err, "topic lookup failed");
                false
            }
        }
    }

    /// Fetch, dispatch, sleep, repeat until shutdown or `max_cycles`.
    ///
    /// Fetch and handler errors are counted and logged; neither stops the loop.
    /// Does nothing unless [`TaskPoller::subscribe`] succeeded.
    pub fn run<F>(&mut self, mut handler: F) -> PollSummary
    where
        F: FnMut(&TaskMessage) -> Result<()>,
    {
        let mut summary = PollSummary::default();
        let Some(topic_id) = self.topic.as_ref().map(|topic| topic.id) else {
            error!(topic = %self.topic_name, "poll loop started without a subscription");
            return summary;
        };

        info!(interval_secs = self.interval.as_secs_f64(), "polling started");
        while !self.shutdown.is_requested() {
            summary.cycles += 1;
            match self.backend.fetch_messages(topic_id) {
                Ok(messages) => {
                    debug!(cycle = summary.cycles, count = messages.len(), "fetched messages");
                    for message in &messages {
                        if self.shutdown.is_requested() {
                            break;
                        }
                        summary.messages_handled += 1;
                        if let Err(err) = handler(message) {
                            summary.handler_errors += 1;
                            warn!(message_id = ?message.id, err = %format!("{err:#}"), "message handler failed");
                        }
                    }
                }
                Err(err) => {
                    summary.fetch_errors += 1;
                    warn!(cycle = summary.cycles, err = %err, "fetching messages failed");
                }
            }

            if self
                .max_cycles
                .is_some_and(|max_cycles| summary.cycles >= max_cycles)
            {
                break;
            }
            self.sleeper.sleep(self.interval, &self.shutdown);
        }
        info!(
            cycles = summary.cycles,
            handled = summary.messages_handled,
            "polling stopped"
        );
        summary
    }
}
