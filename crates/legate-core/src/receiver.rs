//! Receiver-side contracts.
//!
//! A [`Receiver`] is the transport adapter chosen for an invocation; it owns
//! the wire exchange. The core hands it a prepared [`InvocationContext`]
//! together with a [`ReceiverInvocationContext`], the cloneable handle the
//! receiver uses to deliver the outcome from whatever thread the exchange
//! finishes on.

use std::sync::{Arc, Weak};

use crate::error::{InvocationError, RemoteCause};
use crate::invocation::{InvocationContext, InvocationShared, InvocationValue};

/// Single-use handle owning the transport-side resources of one pending
/// reply.
///
/// Exactly one of [`produce`](ResultProducer::produce) or
/// [`discard`](ResultProducer::discard) is invoked per instance. Both
/// consume the producer, so double disposition is ruled out by ownership.
pub trait ResultProducer: Send {
    /// Read the reply, releasing transport resources.
    fn produce(self: Box<Self>) -> Result<InvocationValue, RemoteCause>;

    /// Release transport resources without reading the reply.
    fn discard(self: Box<Self>);
}

/// A producer over an outcome that is already available in-process.
///
/// Receivers that finish the exchange before installing the reply wrap the
/// outcome in this type; `discard` simply drops it.
pub struct ReadyProducer {
    outcome: Result<InvocationValue, RemoteCause>,
}

impl ReadyProducer {
    /// Wrap a successful result.
    pub fn ok(value: InvocationValue) -> Box<dyn ResultProducer> {
        Box::new(Self { outcome: Ok(value) })
    }

    /// Wrap a failure.
    pub fn err(cause: RemoteCause) -> Box<dyn ResultProducer> {
        Box::new(Self {
            outcome: Err(cause),
        })
    }
}

impl ResultProducer for ReadyProducer {
    fn produce(self: Box<Self>) -> Result<InvocationValue, RemoteCause> {
        self.outcome
    }

    fn discard(self: Box<Self>) {}
}

/// The transport adapter bound to an invocation.
pub trait Receiver: Send + Sync {
    /// Schedule the wire exchange for a prepared invocation.
    ///
    /// The receiver must eventually call exactly one of
    /// [`ReceiverInvocationContext::result_ready`],
    /// [`ReceiverInvocationContext::failed`], or
    /// [`ReceiverInvocationContext::cancelled`], on any thread. Returning an
    /// error from this method instead fails the request pass synchronously.
    fn process_invocation(
        &self,
        ctx: &InvocationContext,
        receiver_ctx: &ReceiverInvocationContext,
    ) -> Result<(), InvocationError>;

    /// Attempt to cancel an in-flight invocation.
    ///
    /// Returns whether cancellation was effected. Cancellation is
    /// cooperative: a reply may still arrive and win the race, in which
    /// case the receiver must not also report `cancelled`.
    fn cancel_invocation(
        &self,
        ctx: &InvocationContext,
        receiver_ctx: &ReceiverInvocationContext,
    ) -> bool;
}

/// Receiver-facing handle for completing one invocation.
///
/// Cheap to clone; receivers move clones onto whatever thread finishes the
/// exchange. All methods are safe to call from any thread and become no-ops
/// once the invocation has settled.
///
/// The handle holds a weak reference: it keeps the invocation reachable for
/// callers without creating a receiver↔invocation cycle. A completion that
/// arrives after every caller-side handle is gone is treated like a late
/// reply and its producer is discarded.
#[derive(Clone)]
pub struct ReceiverInvocationContext {
    pub(crate) id: u64,
    pub(crate) shared: Weak<InvocationShared>,
}

impl ReceiverInvocationContext {
    /// The invocation this handle completes, while any caller-side handle
    /// is still alive.
    pub fn invocation(&self) -> Option<InvocationContext> {
        self.shared
            .upgrade()
            .map(|shared| InvocationContext { shared })
    }

    /// Install the reply producer and wake waiters.
    ///
    /// If the invocation has already settled (cancelled, failed, marked
    /// one-way and dropped, or abandoned), the producer is discarded
    /// instead.
    pub fn result_ready(&self, producer: Box<dyn ResultProducer>) {
        match self.shared.upgrade() {
            Some(shared) => shared.result_ready(producer),
            None => {
                tracing::warn!(invocation = self.id, "discarding reply for dropped invocation");
                producer.discard();
            }
        }
    }

    /// Report that the exchange failed before any reply.
    pub fn failed(&self, cause: RemoteCause) {
        if let Some(shared) = self.shared.upgrade() {
            shared.failed(cause);
        }
    }

    /// Report that a requested cancellation took effect.
    pub fn cancelled(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.cancelled();
        }
    }

    /// Upgrade the invocation to asynchronous, releasing a blocked caller.
    pub fn proceed_asynchronously(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.proceed_asynchronously();
        }
    }
}
