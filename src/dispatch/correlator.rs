//! One-shot completion objects shared between a waiting caller and the reader.
//!
//! A [`Correlator`] starts out [`Completion::Pending`] and leaves that state
//! exactly once, either through the reader (success or failure), through
//! teardown (cancel), or through its own waiter giving up (timeout). The
//! transition is decided under one mutex, so a reply racing a timeout is
//! either delivered to the waiter or dropped by the correlator, never both.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::dispatch::criteria::MatchCriteria;
use crate::error::{Error, Result};

/// Value delivered to a waiter.
pub enum Payload {
    /// Raw frame payload bytes.
    Bytes(Bytes),
    /// A decoded value.
    Value(Box<dyn Any + Send>),
}

impl Payload {
    /// Wraps a decoded value.
    #[must_use]
    pub fn value<T: Any + Send>(value: T) -> Self {
        Self::Value(Box::new(value))
    }

    /// Returns the raw bytes.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Value(_) => Err(Error::UnexpectedPayload),
        }
    }

    /// Returns the decoded value as `T`.
    pub fn downcast<T: Any>(self) -> Result<T> {
        match self {
            Self::Value(value) => value
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| Error::UnexpectedPayload),
            Self::Bytes(_) => Err(Error::UnexpectedPayload),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Value(_) => f.write_str("Value(..)"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// Completion state of a correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Not yet completed.
    Pending,
    /// Completed successfully.
    Succeeded,
    /// Completed with a device status code.
    Failed {
        /// Status reported by the radio.
        code: u8,
    },
    /// The waiter gave up.
    TimedOut,
    /// Torn down before completion.
    Cancelled,
}

/// Callback run on the reader task with the raw payload of a matching frame.
pub type Handler = Arc<dyn Fn(&Correlator, &Bytes) + Send + Sync>;

#[derive(Debug)]
struct Slot {
    state: Completion,
    payload: Option<Payload>,
}

/// Correlates a reply or notification with whoever is waiting for it.
pub struct Correlator {
    slot: Mutex<Slot>,
    notify: Notify,
    criteria: Option<MatchCriteria>,
    handler: Option<Handler>,
    wants_wait: bool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Creates a pending correlator that a caller will wait on.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: Completion::Pending,
                payload: None,
            }),
            notify: Notify::new(),
            criteria: None,
            handler: None,
            wants_wait: true,
        }
    }

    /// Sets the match criteria.
    #[must_use]
    pub const fn with_criteria(mut self, criteria: MatchCriteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Sets the handler run by the reader on a match.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Self, &Bytes) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Marks the correlator as fire-and-forget: nobody will wait on it.
    #[must_use]
    pub const fn fire_and_forget(mut self) -> Self {
        self.wants_wait = false;
        self
    }

    /// Returns the match criteria, if any.
    #[must_use]
    pub const fn criteria(&self) -> Option<&MatchCriteria> {
        self.criteria.as_ref()
    }

    /// Returns true if a caller waits on this correlator.
    #[must_use]
    pub const fn wants_wait(&self) -> bool {
        self.wants_wait
    }

    /// Returns true if a handler is registered.
    #[must_use]
    pub const fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> Completion {
        self.slot().state
    }

    /// Moves out of `Pending` into `state`.
    ///
    /// Only the first transition counts; later calls are ignored and return
    /// false.
    pub fn finish(&self, state: Completion) -> bool {
        self.transition(state, None)
    }

    /// Completes successfully with `payload`.
    ///
    /// If the correlator already left `Pending` (typically because its
    /// waiter timed out) the payload is dropped here.
    pub fn complete(&self, payload: impl Into<Payload>) -> bool {
        self.transition(Completion::Succeeded, Some(payload.into()))
    }

    /// Completes with a device status code.
    pub fn fail(&self, code: u8, payload: Option<Payload>) -> bool {
        self.transition(Completion::Failed { code }, payload)
    }

    /// Cancels a pending correlator.
    pub fn cancel(&self) -> bool {
        self.transition(Completion::Cancelled, None)
    }

    /// Re-arms a long-lived correlator and discards any uncollected payload.
    pub fn reset(&self) {
        let mut slot = self.slot();
        slot.state = Completion::Pending;
        slot.payload = None;
    }

    /// Stores a payload without completing.
    pub fn set_payload(&self, payload: impl Into<Payload>) {
        self.slot().payload = Some(payload.into());
    }

    /// Takes the payload. A second call returns `None`.
    pub fn take_payload(&self) -> Option<Payload> {
        self.slot().payload.take()
    }

    /// Runs the handler with the raw payload. Returns false if there is none.
    pub fn run_handler(&self, payload: &Bytes) -> bool {
        match &self.handler {
            Some(handler) => {
                handler(self, payload);
                true
            }
            None => false,
        }
    }

    /// Waits until the correlator completes or `timeout` elapses.
    ///
    /// On success the payload is moved out to the caller. On timeout the
    /// correlator is marked [`Completion::TimedOut`] so that a later reply
    /// is discarded rather than delivered.
    pub async fn wait(&self, timeout: Duration) -> Result<Option<Payload>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a completion in between is not lost.
            notified.as_mut().enable();

            if let Some(result) = self.collect(timeout) {
                return result;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                {
                    let mut slot = self.slot();
                    if slot.state == Completion::Pending {
                        slot.state = Completion::TimedOut;
                        return Err(Error::timeout(timeout));
                    }
                }
                // Completed right at the deadline.
                if let Some(result) = self.collect(timeout) {
                    return result;
                }
            }
        }
    }

    fn collect(&self, timeout: Duration) -> Option<Result<Option<Payload>>> {
        let mut slot = self.slot();
        match slot.state {
            Completion::Pending => None,
            Completion::Succeeded => Some(Ok(slot.payload.take())),
            Completion::Failed { code } => {
                slot.payload = None;
                Some(Err(Error::DeviceStatus { status: code }))
            }
            Completion::TimedOut => Some(Err(Error::timeout(timeout))),
            Completion::Cancelled => Some(Err(Error::ShutDown)),
        }
    }

    fn transition(&self, state: Completion, payload: Option<Payload>) -> bool {
        if state == Completion::Pending {
            return false;
        }
        {
            let mut slot = self.slot();
            if slot.state != Completion::Pending {
                tracing::debug!(
                    "ignoring {:?} for correlator already {:?}",
                    state,
                    slot.state
                );
                // `payload` drops here, after the lock is released.
                drop(slot);
                return false;
            }
            slot.state = state;
            if payload.is_some() {
                slot.payload = payload;
            }
        }
        self.notify.notify_waiters();
        true
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("state", &self.state())
            .field("criteria", &self.criteria)
            .field("has_handler", &self.handler.is_some())
            .field("wants_wait", &self.wants_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_not_before_deadline() {
        let correlator = Correlator::new();
        let start = Instant::now();
        let err = correlator
            .wait(Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(correlator.state(), Completion::TimedOut);
    }

    #[tokio::test]
    async fn test_complete_wakes_waiter() {
        let correlator = Arc::new(Correlator::new());
        let completer = Arc::clone(&correlator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(Bytes::from_static(b"reply"));
        });

        let payload = correlator
            .wait(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&payload.into_bytes().unwrap()[..], b"reply");
    }

    #[tokio::test]
    async fn test_completed_before_wait() {
        let correlator = Correlator::new();
        assert!(correlator.complete(Bytes::from_static(&[1])));
        let payload = correlator.wait(Duration::from_millis(1)).await.unwrap();
        assert!(payload.is_some());
        // Payload moved out exactly once.
        assert!(correlator.take_payload().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_drops_payload() {
        let marker = Arc::new(());
        let correlator = Correlator::new();
        assert!(correlator.wait(Duration::from_millis(10)).await.is_err());

        assert!(!correlator.complete(Payload::value(Arc::clone(&marker))));
        assert_eq!(Arc::strong_count(&marker), 1);
        assert!(correlator.take_payload().is_none());
    }

    #[test]
    fn test_first_transition_wins() {
        let correlator = Correlator::new();
        assert!(correlator.fail(0x02, None));
        assert!(!correlator.complete(Bytes::new()));
        assert!(!correlator.cancel());
        assert!(!correlator.finish(Completion::Pending));
        assert_eq!(correlator.state(), Completion::Failed { code: 0x02 });
    }

    #[tokio::test]
    async fn test_failure_and_cancel_map_to_errors() {
        let failed = Correlator::new();
        failed.fail(0x01, Some(Payload::Bytes(Bytes::from_static(&[0x01]))));
        let err = failed.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.device_status(), Some(0x01));

        let cancelled = Correlator::new();
        cancelled.cancel();
        assert!(matches!(
            cancelled.wait(Duration::from_secs(1)).await,
            Err(Error::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_reset_rearms() {
        let correlator = Correlator::new();
        correlator.complete(Bytes::from_static(&[1]));
        correlator.reset();
        assert_eq!(correlator.state(), Completion::Pending);
        assert!(correlator.take_payload().is_none());

        correlator.complete(Bytes::from_static(&[2]));
        let payload = correlator.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&payload.unwrap().into_bytes().unwrap()[..], &[2]);
    }

    #[test]
    fn test_handler_runs_with_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let correlator = Correlator::new()
            .fire_and_forget()
            .with_handler(move |_, bytes| {
                assert_eq!(&bytes[..], &[9]);
                seen.fetch_add(1, Ordering::SeqCst);
            });

        assert!(!correlator.wants_wait());
        assert!(correlator.run_handler(&Bytes::from_static(&[9])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!Correlator::new().run_handler(&Bytes::new()));
    }

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::value(42u32);
        assert_eq!(payload.downcast::<u32>().unwrap(), 42);
        assert!(Payload::value(1u8).downcast::<u16>().is_err());
        assert!(Payload::value(1u8).into_bytes().is_err());
    }
}
