//! legate: client-side remote business-object invocation.
//!
//! A call on a local stand-in object becomes an [`InvocationContext`] that
//! travels through a user-extensible interceptor chain to a pluggable
//! [`Receiver`], which owns the wire exchange. The caller blocks on
//! [`InvocationContext::await_response`] or holds the [`FutureResponse`]
//! handle; an interceptor can upgrade the call to asynchronous or mark it
//! fire-and-forget at any point before completion.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use legate::prelude::*;
//!
//! // A receiver hosting the target in-process (tests, demos):
//! let receiver = legate::receiver_mem::InProcReceiver::new();
//! receiver.register("my-app/my-module/Greeter", greet_handler);
//!
//! // One context per call:
//! let ctx = InvocationContext::new(
//!     proxy_handler,
//!     MethodDescriptor::new("greet", ["String"]),
//!     vec![Arc::new("test".to_string())],
//!     interceptor_chain,
//! );
//! ctx.set_receiver(receiver.into_shared());
//! ctx.send_request()?;
//!
//! match ctx.await_response()? {
//!     Response::Complete(value) => { /* synchronous result */ }
//!     Response::AsyncPending => {
//!         // hand ctx.future_response() back to the caller
//!     }
//! }
//! ```
//!
//! # Components
//!
//! - [`InvocationContext`]: per-call hub — pipeline cursor, state machine,
//!   context data, attachments
//! - [`FutureResponse`]: blocking completion handle with timeout and
//!   cancellation
//! - [`Interceptor`] / [`Receiver`] / [`ResultProducer`] /
//!   [`ProxyHandler`]: the seams user code plugs into
//!
//! Transports beyond the in-process reference, proxy generation, and
//! serialization live in other crates.

#![forbid(unsafe_code)]

pub use legate_core::*;

/// The in-process reference receiver.
#[cfg(feature = "receiver-mem")]
pub use legate_receiver_mem as receiver_mem;

/// Commonly used items.
pub mod prelude {
    pub use legate_core::{
        Affinity, FutureResponse, Interceptor, InvocationContext, InvocationError,
        InvocationValue, Locator, MethodDescriptor, ProxyHandler, Receiver,
        ReceiverInvocationContext, Response, ResultProducer,
    };
}
