//! Debounced outbound edit buffer.
//!
//! Rapid local edits (a drag produces dozens of `move`s) are coalesced into one
//! batch per debounce window. The first push arms a single deadline; when it
//! passes, everything queued goes to the sink as one ordered batch and the
//! buffer disarms. Later pushes do not extend the window.
//!
//! The buffer owns its deadline but not a task. Drive it from a `select!`
//! loop with [`OpBuffer::expired`], or from a manual clock with
//! [`OpBuffer::poll_expired`].

use std::time::Duration;

use tactic_core::Operation;
use tokio::time::Instant;

pub struct OpBuffer<S>
where
    S: FnMut(Vec<Operation>),
{
    pending: Vec<Operation>,
    interval: Duration,
    deadline: Option<Instant>,
    sink: S,
}

impl<S> OpBuffer<S>
where
    S: FnMut(Vec<Operation>),
{
    pub fn new(interval: Duration, sink: S) -> Self {
        Self {
            pending: Vec::new(),
            interval,
            deadline: None,
            sink,
        }
    }

    /// Queue `op`, arming the deadline if it is not armed yet.
    pub fn push(&mut self, op: Operation) {
        self.pending.push(op);
        if self.deadline.is_none() {
            self.arm();
        }
    }

    /// Emit everything now and disarm. No-op while empty.
    pub fn flush(&mut self) {
        self.cancel();
        if !self.pending.is_empty() {
            self.fire();
        }
    }

    /// Wait for the armed deadline and emit. Pending forever while disarmed.
    ///
    /// Cancel-safe: dropping the future before the deadline changes nothing.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.fire();
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Emit if the deadline is at or before `now`. Returns whether it fired.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.fire();
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn fire(&mut self) {
        self.deadline = None;
        let batch = std::mem::take(&mut self.pending);
        log::trace!("Flushing {} buffered ops", batch.len());
        (self.sink)(batch);
    }
}
