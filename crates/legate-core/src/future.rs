//! FutureResponse: the caller-visible completion handle.
//!
//! Bound 1:1 to an [`InvocationContext`]; supports blocking retrieval with
//! and without a deadline, cooperative cancellation, and state inspection.
//! Contending readers are serialized through the `Consuming` state: one
//! reader consumes the reply producer while the rest wait for the cached
//! outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::InvocationError;
use crate::invocation::{
    AsyncState, InvocationContext, InvocationShared, InvocationState, InvocationValue,
};
use crate::receiver::ReceiverInvocationContext;

/// Completion handle for one invocation.
///
/// Cheap to clone; every clone observes the same invocation.
#[derive(Clone)]
pub struct FutureResponse {
    pub(crate) shared: Arc<InvocationShared>,
}

impl FutureResponse {
    /// The invocation this handle completes.
    pub fn invocation(&self) -> InvocationContext {
        InvocationContext {
            shared: self.shared.clone(),
        }
    }

    /// Current state, for diagnostics.
    pub fn state(&self) -> InvocationState {
        self.shared.lock.lock().state
    }

    /// Whether the invocation has left the pending states.
    ///
    /// `Ready` counts as done: a result is available even though it has not
    /// been consumed yet.
    pub fn is_done(&self) -> bool {
        let cell = self.shared.lock.lock();
        !matches!(
            cell.state,
            InvocationState::Waiting | InvocationState::CancelReq
        )
    }

    /// Whether the invocation ended in cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock.lock().state == InvocationState::Cancelled
    }

    /// Request cancellation.
    ///
    /// Moves a `Waiting` invocation to `CancelReq` and asks the bound
    /// receiver to cancel the exchange; the return value is the receiver's
    /// answer. Cancellation is cooperative: a reply that arrives during
    /// `CancelReq` wins the race and the invocation completes normally.
    /// Returns `false` without touching the receiver when the invocation is
    /// already past `Waiting` or no receiver is bound. `may_interrupt` is
    /// advisory; the core itself never interrupts a running exchange.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        {
            let mut cell = self.shared.lock.lock();
            if cell.state != InvocationState::Waiting {
                return false;
            }
            cell.state = InvocationState::CancelReq;
        }
        tracing::debug!(
            invocation = self.shared.id,
            may_interrupt,
            "cancellation requested"
        );
        let receiver = self.shared.receiver.lock().clone();
        match receiver {
            None => false,
            Some(receiver) => {
                let ctx = self.invocation();
                let receiver_ctx = ReceiverInvocationContext {
                    id: self.shared.id,
                    shared: Arc::downgrade(&self.shared),
                };
                receiver.cancel_invocation(&ctx, &receiver_ctx)
            }
        }
    }

    /// Block until the invocation settles and return its result.
    pub fn get(&self) -> Result<InvocationValue, InvocationError> {
        self.get_inner(None)
    }

    /// Block until the invocation settles or `timeout` elapses.
    ///
    /// The deadline is computed once against a monotonic clock; `TimedOut`
    /// leaves the invocation untouched, so a later call can still succeed.
    pub fn get_timeout(&self, timeout: Duration) -> Result<InvocationValue, InvocationError> {
        self.get_inner(Some(Instant::now() + timeout))
    }

    fn get_inner(&self, deadline: Option<Instant>) -> Result<InvocationValue, InvocationError> {
        let shared = &self.shared;
        let mut cell = shared.lock.lock();
        loop {
            if cell.async_state == AsyncState::OneWay {
                return Err(InvocationError::OneWay);
            }
            if !matches!(
                cell.state,
                InvocationState::Waiting | InvocationState::CancelReq | InvocationState::Consuming
            ) {
                break;
            }
            match deadline {
                None => {
                    shared.cond.wait(&mut cell);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(InvocationError::TimedOut);
                    }
                    // Wait at least one millisecond per iteration; the loop
                    // re-checks the deadline after every wake.
                    let remaining = (deadline - now).max(Duration::from_millis(1));
                    let _ = shared.cond.wait_for(&mut cell, remaining);
                }
            }
        }
        match cell.state {
            InvocationState::Ready => {
                cell.state = InvocationState::Consuming;
                drop(cell);
                self.invocation().consume()
            }
            InvocationState::Done => Ok(cell.cached_value()),
            InvocationState::Failed => Err(InvocationError::RemoteFailure(cell.cached_cause())),
            InvocationState::Cancelled => Err(InvocationError::Cancelled),
            InvocationState::Discarded => Err(InvocationError::OneWay),
            InvocationState::Waiting
            | InvocationState::CancelReq
            | InvocationState::Consuming => {
                unreachable!("left the wait loop in a pending state")
            }
        }
    }
}
