//! legate-core: client-side invocation core for remote business objects.
//!
//! This crate defines:
//! - The per-call hub ([`InvocationContext`]) with its two-pass interceptor
//!   pipeline and completion state machine
//! - The caller-visible completion handle ([`FutureResponse`])
//! - The external contracts the core consumes ([`Interceptor`],
//!   [`Receiver`], [`ResultProducer`], [`ProxyHandler`])
//! - Call identity ([`Locator`], [`MethodDescriptor`])
//! - Typed attachments ([`AttachmentKey`], [`Attachments`])
//! - The error taxonomy ([`InvocationError`])
//!
//! Transports, interceptor implementations, proxy generation, and
//! serialization all live outside this crate; the core only coordinates
//! them for the lifetime of one call.

#![forbid(unsafe_code)]

mod attachment;
mod error;
mod future;
mod ident;
mod interceptor;
mod invocation;
mod proxy;
mod receiver;

pub use attachment::*;
pub use error::*;
pub use future::*;
pub use ident::*;
pub use interceptor::*;
pub use invocation::*;
pub use proxy::*;
pub use receiver::*;
