//! Client interceptor contract.

use std::sync::Arc;

use crate::error::InvocationError;
use crate::invocation::{InvocationContext, InvocationValue};

/// A user-supplied stage in the invocation pipeline.
///
/// Every invocation passes through the chain twice: once forward while the
/// request is being dispatched, and once again forward while the result is
/// being read. Interceptors hold no per-invocation state of their own; the
/// pipeline cursor lives in the [`InvocationContext`].
pub trait Interceptor: Send + Sync {
    /// Called during the request pass.
    ///
    /// Must call [`InvocationContext::send_request`] exactly once to hand
    /// the request to the next stage, unless the interceptor intentionally
    /// short-circuits the chain (in which case it is responsible for
    /// supplying a result through some other mechanism).
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError>;

    /// Called during the result pass.
    ///
    /// Must call [`InvocationContext::get_result`] exactly once to read the
    /// result from the next stage, or
    /// [`InvocationContext::discard_result`] to drop the reply unread.
    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError>;
}

/// An ordered, immutable interceptor chain, shared by every invocation made
/// through the same proxy.
pub type InterceptorChain = Arc<[Arc<dyn Interceptor>]>;

/// Build a chain from an iterator of interceptors.
pub fn chain<I>(interceptors: I) -> InterceptorChain
where
    I: IntoIterator<Item = Arc<dyn Interceptor>>,
{
    interceptors.into_iter().collect()
}

/// The empty chain.
pub fn empty_chain() -> InterceptorChain {
    Arc::from(Vec::<Arc<dyn Interceptor>>::new())
}
