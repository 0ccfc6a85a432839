//! legate-receiver-mem: In-process receiver for legate.
//!
//! This is the **semantic reference** implementation. All other receivers
//! must behave identically to this one with respect to the completion
//! protocol: exactly one of `result_ready`, `failed`, or `cancelled` per
//! invocation, delivered off the caller's thread.
//!
//! # Characteristics
//!
//! - Handlers are plain closures or trait impls registered by target path
//! - Each invocation is dispatched on its own spawned thread
//! - Cooperative cancellation: a cancel that lands before delivery wins
//! - Optional artificial latency for exercising timeout and race paths
//!
//! # Usage
//!
//! ```ignore
//! let receiver = InProcReceiver::new();
//! receiver.register("my-app/my-module/Greeter", |_method, params| {
//!     let name = params[0].downcast_ref::<String>().unwrap();
//!     Ok(Arc::new(format!("Hi {name}")) as InvocationValue)
//! });
//! ctx.set_receiver(receiver.into_shared());
//! ```

#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use legate_core::{
    InvocationContext, InvocationError, InvocationValue, MethodDescriptor, ReadyProducer,
    Receiver, ReceiverInvocationContext, RemoteCause,
};

/// A server-side method implementation hosted in-process.
pub trait InProcHandler: Send + Sync {
    /// Invoke the method with the given arguments.
    fn invoke(
        &self,
        method: &MethodDescriptor,
        parameters: &[InvocationValue],
    ) -> Result<InvocationValue, RemoteCause>;
}

impl<F> InProcHandler for F
where
    F: Fn(&MethodDescriptor, &[InvocationValue]) -> Result<InvocationValue, RemoteCause>
        + Send
        + Sync,
{
    fn invoke(
        &self,
        method: &MethodDescriptor,
        parameters: &[InvocationValue],
    ) -> Result<InvocationValue, RemoteCause> {
        self(method, parameters)
    }
}

/// Raised when no handler is registered under an invocation's target path.
#[derive(Debug)]
pub struct NoSuchTarget {
    /// The `application/module/name` path that missed.
    pub path: String,
}

impl fmt::Display for NoSuchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no handler registered for target {}", self.path)
    }
}

impl std::error::Error for NoSuchTarget {}

/// Raised in place of a handler panic.
#[derive(Debug)]
pub struct HandlerPanic {
    /// Panic payload, when it was a string.
    pub message: String,
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.message)
    }
}

impl std::error::Error for HandlerPanic {}

struct InProcInner {
    handlers: Mutex<HashMap<String, Arc<dyn InProcHandler>>>,
    /// Invocation ids dispatched but not yet delivered.
    pending: Mutex<HashSet<u64>>,
    /// Invocation ids cancelled while pending.
    cancelled: Mutex<HashSet<u64>>,
    latency: Option<Duration>,
}

/// In-process receiver implementation.
pub struct InProcReceiver {
    inner: Arc<InProcInner>,
}

impl InProcReceiver {
    /// Create a receiver that delivers as fast as the spawned thread runs.
    pub fn new() -> Self {
        Self::with_latency(None)
    }

    /// Create a receiver that sleeps for `latency` before delivering.
    pub fn with_latency(latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(InProcInner {
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                cancelled: Mutex::new(HashSet::new()),
                latency,
            }),
        }
    }

    /// Register a handler under an `application/module/name` path.
    ///
    /// Replaces any handler previously registered under the same path.
    pub fn register(&self, path: impl Into<String>, handler: impl InProcHandler + 'static) {
        let path = path.into();
        tracing::debug!(path = %path, "handler registered");
        self.inner
            .handlers
            .lock()
            .insert(path, Arc::new(handler));
    }

    /// This receiver as a shareable trait object.
    pub fn into_shared(self) -> Arc<dyn Receiver> {
        Arc::new(self)
    }
}

impl Default for InProcReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver for InProcReceiver {
    fn process_invocation(
        &self,
        ctx: &InvocationContext,
        receiver_ctx: &ReceiverInvocationContext,
    ) -> Result<(), InvocationError> {
        let path = ctx.locator().path();
        let handler = self.inner.handlers.lock().get(&path).cloned();
        let Some(handler) = handler else {
            return Err(InvocationError::RemoteFailure(Arc::new(NoSuchTarget {
                path,
            })));
        };

        let id = ctx.id();
        self.inner.pending.lock().insert(id);

        let inner = self.inner.clone();
        let receiver_ctx = receiver_ctx.clone();
        let method = ctx.invoked_method().clone();
        let parameters = ctx.parameters().to_vec();
        thread::spawn(move || {
            if let Some(latency) = inner.latency {
                thread::sleep(latency);
            }

            // Holding `pending` across the cancel check and removal keeps
            // cancel_invocation's answer consistent with what we deliver.
            let was_cancelled = {
                let mut pending = inner.pending.lock();
                let was_cancelled = inner.cancelled.lock().remove(&id);
                pending.remove(&id);
                was_cancelled
            };
            if was_cancelled {
                tracing::debug!(invocation = id, "dispatch cancelled before delivery");
                receiver_ctx.cancelled();
                return;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| handler.invoke(&method, &parameters)));
            match outcome {
                Ok(Ok(value)) => receiver_ctx.result_ready(ReadyProducer::ok(value)),
                Ok(Err(cause)) => receiver_ctx.failed(cause),
                Err(panic) => {
                    // A panicking handler must not leave the caller hanging.
                    let message = if let Some(s) = panic.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "non-string panic payload".to_string()
                    };
                    tracing::warn!(invocation = id, message = %message, "handler panicked");
                    receiver_ctx.failed(Arc::new(HandlerPanic { message }));
                }
            }
        });
        Ok(())
    }

    fn cancel_invocation(
        &self,
        ctx: &InvocationContext,
        _receiver_ctx: &ReceiverInvocationContext,
    ) -> bool {
        let id = ctx.id();
        let pending = self.inner.pending.lock();
        if pending.contains(&id) {
            self.inner.cancelled.lock().insert(id);
            tracing::debug!(invocation = id, "cancellation marked");
            true
        } else {
            false
        }
    }
}

// Note: conformance tests live in legate-testkit to avoid circular
// dev-dependencies between this crate and the shared mocks.
