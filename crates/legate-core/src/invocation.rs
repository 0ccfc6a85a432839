//! InvocationContext: the per-call hub of the invocation core.
//!
//! Exactly one context exists per remote call. It owns the call identity,
//! the two-pass interceptor pipeline, and the state machine that coordinates
//! the caller thread, the receiver's completion callback, cancellation, and
//! fire-and-forget discard.
//!
//! # State machine
//!
//! ```text
//! Waiting ──result_ready──▶ Ready ──get/await acquires──▶ Consuming
//! Waiting ──cancel──▶ CancelReq ──result_ready──▶ Ready     (result wins)
//!                     CancelReq ──cancelled──▶ Cancelled
//! Waiting/CancelReq ──failed──▶ Failed
//! Consuming ──produce ok──▶ Done          Consuming ──produce err──▶ Failed
//! Ready ──set_discard_result──▶ Discarded
//! ```
//!
//! Terminal states (`Done`, `Failed`, `Cancelled`, `Discarded`) are sticky.
//!
//! # Key invariant
//!
//! The context lock serializes every state transition but is never held
//! across a call into an interceptor, a receiver, or a result producer.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};

use crate::attachment::{Attachments, WEAK_AFFINITY};
use crate::error::{InvocationError, RemoteCause};
use crate::future::FutureResponse;
use crate::ident::{Locator, MethodDescriptor};
use crate::interceptor::InterceptorChain;
use crate::proxy::ProxyHandler;
use crate::receiver::{Receiver, ReceiverInvocationContext, ResultProducer};

/// A type-erased value moving through an invocation: an argument, a context
/// map entry, or the result itself.
///
/// Values are reference-counted because a finished invocation caches its
/// result and returns it again on every later read.
pub type InvocationValue = Arc<dyn Any + Send + Sync>;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// No reply yet; the exchange is in flight.
    Waiting,
    /// Cancellation was requested; a reply may still win the race.
    CancelReq,
    /// A reply producer is installed and unconsumed.
    Ready,
    /// One consumer is extracting the result from the producer.
    Consuming,
    /// The result was consumed and cached.
    Done,
    /// The invocation failed; the cause is cached.
    Failed,
    /// The transport confirmed cancellation before any reply.
    Cancelled,
    /// The invocation was marked fire-and-forget and its reply dropped.
    Discarded,
}

impl InvocationState {
    /// Whether this state can never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Cancelled | Self::Discarded
        )
    }

    /// Whether a blocking reader must keep waiting in this state.
    fn is_pending(self) -> bool {
        matches!(self, Self::Waiting | Self::CancelReq | Self::Consuming)
    }
}

/// Blocking-wait escalation of one invocation.
///
/// Monotonic along `Synchronous → {Asynchronous, OneWay}`; the latter two
/// never transition into each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AsyncState {
    Synchronous,
    Asynchronous,
    OneWay,
}

/// Outcome of [`InvocationContext::await_response`].
pub enum Response {
    /// The invocation completed synchronously with this value.
    Complete(InvocationValue),
    /// The invocation was upgraded to asynchronous; return the
    /// [`FutureResponse`] to the original caller instead of blocking.
    AsyncPending,
}

pub(crate) enum Outcome {
    Value(InvocationValue),
    Failure(RemoteCause),
}

pub(crate) struct StateCell {
    pub(crate) state: InvocationState,
    pub(crate) async_state: AsyncState,
    pub(crate) producer: Option<Box<dyn ResultProducer>>,
    pub(crate) cached: Option<Outcome>,
}

impl StateCell {
    pub(crate) fn cached_value(&self) -> InvocationValue {
        match &self.cached {
            Some(Outcome::Value(value)) => value.clone(),
            _ => unreachable!("done state without a cached value"),
        }
    }

    pub(crate) fn cached_cause(&self) -> RemoteCause {
        match &self.cached {
            Some(Outcome::Failure(cause)) => cause.clone(),
            _ => unreachable!("failed state without a cached cause"),
        }
    }
}

pub(crate) struct InvocationShared {
    pub(crate) id: u64,
    proxy: Arc<dyn ProxyHandler>,
    locator: Locator,
    method: MethodDescriptor,
    parameters: Vec<InvocationValue>,
    chain: InterceptorChain,
    attachments: Attachments,
    context_data: Mutex<Option<IndexMap<String, InvocationValue>>>,
    pub(crate) receiver: Mutex<Option<Arc<dyn Receiver>>>,

    // Pipeline state, touched only by the thread currently driving a pass.
    cursor: AtomicUsize,
    request_done: AtomicBool,
    result_done: AtomicBool,

    pub(crate) lock: Mutex<StateCell>,
    pub(crate) cond: Condvar,
}

impl InvocationShared {
    /// Install the reply producer: `Waiting`/`CancelReq` become `Ready`,
    /// the pipeline cursor rewinds for the result pass, and waiters wake.
    /// Anything else means the reply is late or duplicated, and the
    /// producer is discarded outside the lock.
    pub(crate) fn result_ready(&self, producer: Box<dyn ResultProducer>) {
        let late = {
            let mut cell = self.lock.lock();
            match cell.state {
                InvocationState::Waiting | InvocationState::CancelReq => {
                    cell.producer = Some(producer);
                    self.cursor.store(0, Ordering::Relaxed);
                    cell.state = InvocationState::Ready;
                    self.cond.notify_all();
                    None
                }
                _ => Some(producer),
            }
        };
        match late {
            None => tracing::debug!(invocation = self.id, "result ready"),
            Some(producer) => {
                tracing::warn!(invocation = self.id, "discarding reply for settled invocation");
                producer.discard();
            }
        }
    }

    /// Record a transport-level failure, if the invocation is still pending.
    pub(crate) fn failed(&self, cause: RemoteCause) {
        let mut cell = self.lock.lock();
        match cell.state {
            InvocationState::Waiting | InvocationState::CancelReq => {
                tracing::debug!(invocation = self.id, error = %cause, "invocation failed");
                cell.state = InvocationState::Failed;
                cell.cached = Some(Outcome::Failure(cause));
                self.cond.notify_all();
            }
            _ => {}
        }
    }

    /// Record that a requested cancellation took effect.
    pub(crate) fn cancelled(&self) {
        let mut cell = self.lock.lock();
        match cell.state {
            InvocationState::Waiting | InvocationState::CancelReq => {
                tracing::debug!(invocation = self.id, "invocation cancelled");
                cell.state = InvocationState::Cancelled;
                self.cond.notify_all();
            }
            _ => {}
        }
    }

    /// Upgrade a synchronous invocation to asynchronous and wake the
    /// blocked caller.
    pub(crate) fn proceed_asynchronously(&self) {
        let mut cell = self.lock.lock();
        if cell.async_state == AsyncState::Synchronous {
            tracing::debug!(invocation = self.id, "proceeding asynchronously");
            cell.async_state = AsyncState::Asynchronous;
            self.cond.notify_all();
        }
    }

    /// Mark the invocation fire-and-forget.
    ///
    /// An unconsumed `Ready` reply is released immediately; terminal states
    /// are left untouched. Readers observe the one-way flag before the
    /// state, so a later `get` fails with `OneWay` either way.
    pub(crate) fn set_discard_result(&self) {
        let producer = {
            let mut cell = self.lock.lock();
            if cell.async_state != AsyncState::OneWay {
                cell.async_state = AsyncState::OneWay;
                self.cond.notify_all();
            }
            if cell.state == InvocationState::Ready {
                cell.state = InvocationState::Discarded;
                self.cond.notify_all();
                cell.producer.take()
            } else {
                None
            }
        };
        if let Some(producer) = producer {
            tracing::debug!(invocation = self.id, "unread reply discarded (one-way)");
            producer.discard();
        }
    }
}

impl Drop for InvocationShared {
    fn drop(&mut self) {
        // Abandonment: the last handle went away with a reply still
        // installed. Transport resources must not outlive the context.
        let cell = self.lock.get_mut();
        if cell.state == InvocationState::Ready {
            if let Some(producer) = cell.producer.take() {
                tracing::debug!(invocation = self.id, "abandoned with unread reply; discarding");
                producer.discard();
            }
        }
    }
}

/// The per-call hub: call identity, interceptor pipeline, and completion
/// state machine.
///
/// Cloning yields another handle to the same invocation.
#[derive(Clone)]
pub struct InvocationContext {
    pub(crate) shared: Arc<InvocationShared>,
}

impl InvocationContext {
    /// Create a context for one invocation of `method` through `proxy`.
    pub fn new(
        proxy: Arc<dyn ProxyHandler>,
        method: MethodDescriptor,
        parameters: Vec<InvocationValue>,
        chain: InterceptorChain,
    ) -> Self {
        let id = NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed);
        let locator = proxy.locator().clone();
        tracing::debug!(invocation = id, locator = %locator, method = %method, "invocation created");
        Self {
            shared: Arc::new(InvocationShared {
                id,
                proxy,
                locator,
                method,
                parameters,
                chain,
                attachments: Attachments::new(),
                context_data: Mutex::new(None),
                receiver: Mutex::new(None),
                cursor: AtomicUsize::new(0),
                request_done: AtomicBool::new(false),
                result_done: AtomicBool::new(false),
                lock: Mutex::new(StateCell {
                    state: InvocationState::Waiting,
                    async_state: AsyncState::Synchronous,
                    producer: None,
                    cached: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Numeric id of this invocation, for diagnostics.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// The target descriptor.
    pub fn locator(&self) -> &Locator {
        &self.shared.locator
    }

    /// The invoked method.
    pub fn invoked_method(&self) -> &MethodDescriptor {
        &self.shared.method
    }

    /// The argument tuple.
    pub fn parameters(&self) -> &[InvocationValue] {
        &self.shared.parameters
    }

    /// The client-visible view named by the locator.
    pub fn view(&self) -> &str {
        self.shared.locator.view()
    }

    /// The proxy handler this invocation was made through.
    pub fn invoked_proxy(&self) -> &Arc<dyn ProxyHandler> {
        &self.shared.proxy
    }

    /// Attachments scoped to this invocation.
    pub fn attachments(&self) -> &Attachments {
        &self.shared.attachments
    }

    /// Get a value attached to the owning proxy.
    pub fn proxy_attachment<T: Any + Send + Sync>(
        &self,
        key: crate::attachment::AttachmentKey<T>,
    ) -> Option<Arc<T>> {
        self.shared.proxy.attachments().get(key)
    }

    /// Remove a value attached to the owning proxy.
    pub fn remove_proxy_attachment<T: Any + Send + Sync>(
        &self,
        key: crate::attachment::AttachmentKey<T>,
    ) -> Option<Arc<T>> {
        self.shared.proxy.attachments().remove(key)
    }

    /// The context-data map, created on first access.
    ///
    /// Entries keep insertion order and travel with the request verbatim, so
    /// interceptors can pass data to their server-side counterparts. Must
    /// not be mutated concurrently with the terminal request-pass step that
    /// reads it.
    pub fn context_data(&self) -> MappedMutexGuard<'_, IndexMap<String, InvocationValue>> {
        MutexGuard::map(self.shared.context_data.lock(), |slot| {
            slot.get_or_insert_with(IndexMap::new)
        })
    }

    /// Bind the receiver that will own the wire exchange.
    pub fn set_receiver(&self, receiver: Arc<dyn Receiver>) {
        *self.shared.receiver.lock() = Some(receiver);
    }

    /// The completion handle bound to this invocation.
    pub fn future_response(&self) -> FutureResponse {
        FutureResponse {
            shared: self.shared.clone(),
        }
    }

    /// Upgrade this invocation to asynchronous, releasing a blocked caller.
    pub fn proceed_asynchronously(&self) {
        self.shared.proceed_asynchronously();
    }

    /// Mark this invocation fire-and-forget: no result will be read, and
    /// any reply is dropped.
    pub fn set_discard_result(&self) {
        self.shared.set_discard_result();
    }

    /// Advance the request pass one stage.
    ///
    /// Interceptors call this to hand the request to the next stage; at the
    /// end of the chain the bound receiver is invoked instead. Fails with
    /// `WrongPhase` once the request pass has completed, including when the
    /// pass completed by unwinding an error.
    pub fn send_request(&self) -> Result<(), InvocationError> {
        let shared = &self.shared;
        if shared.request_done.load(Ordering::Acquire) {
            return Err(InvocationError::WrongPhase(
                "send_request called after the request pass completed",
            ));
        }
        let idx = shared.cursor.fetch_add(1, Ordering::Relaxed);
        let outcome = if idx == shared.chain.len() {
            let receiver = shared.receiver.lock().clone();
            match receiver {
                None => Err(InvocationError::NoReceiverBound),
                Some(receiver) => {
                    tracing::debug!(invocation = shared.id, "handing request to receiver");
                    let receiver_ctx = ReceiverInvocationContext {
                        id: shared.id,
                        shared: Arc::downgrade(shared),
                    };
                    receiver.process_invocation(self, &receiver_ctx)
                }
            }
        } else {
            shared.chain[idx].handle_invocation(self)
        };
        shared.request_done.store(true, Ordering::Release);
        outcome
    }

    /// Advance the result pass one stage.
    ///
    /// Interceptors call this to read the result from the next stage; at
    /// the end of the chain the installed producer is consumed instead.
    /// The outermost call applies a deposited weak-affinity hint to the
    /// owning proxy once the rest of the pass has returned successfully.
    pub fn get_result(&self) -> Result<InvocationValue, InvocationError> {
        let shared = &self.shared;
        if shared.result_done.load(Ordering::Acquire) || !self.producer_installed() {
            return Err(InvocationError::WrongPhase(
                "get_result called with no unconsumed reply",
            ));
        }
        let idx = shared.cursor.fetch_add(1, Ordering::Relaxed);
        let outcome = if idx == shared.chain.len() {
            let producer = shared.lock.lock().producer.take();
            match producer {
                None => Err(InvocationError::WrongPhase("reply already consumed")),
                Some(producer) => producer.produce().map_err(InvocationError::RemoteFailure),
            }
        } else {
            shared.chain[idx].handle_invocation_result(self)
        };
        shared.result_done.store(true, Ordering::Release);
        if idx == 0 && outcome.is_ok() {
            if let Some(affinity) = shared.attachments.get(*WEAK_AFFINITY) {
                tracing::debug!(invocation = shared.id, affinity = %affinity, "applying weak affinity");
                shared.proxy.set_weak_affinity((*affinity).clone());
            }
        }
        outcome
    }

    /// Drop the pending reply unread, releasing transport resources.
    ///
    /// Called by a result-pass interceptor in place of
    /// [`get_result`](Self::get_result).
    pub fn discard_result(&self) -> Result<(), InvocationError> {
        let producer = self.shared.lock.lock().producer.take();
        match producer {
            None => Err(InvocationError::WrongPhase(
                "discard_result called with no unconsumed reply",
            )),
            Some(producer) => {
                tracing::debug!(invocation = self.shared.id, "reply discarded by interceptor");
                producer.discard();
                Ok(())
            }
        }
    }

    /// Block the caller thread until the invocation resolves, goes
    /// asynchronous, or turns out to be one-way.
    ///
    /// Returns [`Response::AsyncPending`] when an interceptor or the
    /// receiver upgraded the invocation while we were blocked; the caller
    /// then returns the [`FutureResponse`] instead of a value. Must not be
    /// called with the context lock held (no public API exposes it).
    pub fn await_response(&self) -> Result<Response, InvocationError> {
        let shared = &self.shared;
        let mut cell = shared.lock.lock();
        loop {
            match cell.async_state {
                AsyncState::Asynchronous => return Ok(Response::AsyncPending),
                AsyncState::OneWay => return Err(InvocationError::OneWay),
                AsyncState::Synchronous => {}
            }
            if !cell.state.is_pending() {
                break;
            }
            shared.cond.wait(&mut cell);
        }
        match cell.state {
            InvocationState::Ready => {
                cell.state = InvocationState::Consuming;
                drop(cell);
                self.consume().map(Response::Complete)
            }
            InvocationState::Done => Ok(Response::Complete(cell.cached_value())),
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

    /// Drive the result pass and publish the terminal state.
    ///
    /// Entered with the state already moved to `Consuming` and the lock
    /// released. Exactly one thread runs this per invocation; contending
    /// readers wait out the `Consuming` state.
    pub(crate) fn consume(&self) -> Result<InvocationValue, InvocationError> {
        let shared = &self.shared;
        let outcome = self.get_result();
        let mut cell = shared.lock.lock();
        debug_assert_eq!(cell.state, InvocationState::Consuming);
        match &outcome {
            Ok(value) => {
                tracing::debug!(invocation = shared.id, "result consumed");
                cell.state = InvocationState::Done;
                cell.cached = Some(Outcome::Value(value.clone()));
            }
            Err(error) => {
                tracing::debug!(invocation = shared.id, error = %error, "result pass failed");
                cell.state = InvocationState::Failed;
                cell.cached = Some(Outcome::Failure(error.clone().into_cause()));
            }
        }
        shared.cond.notify_all();
        outcome
    }

    fn producer_installed(&self) -> bool {
        self.shared.lock.lock().producer.is_some()
    }
}

#[cfg(test)]
mod state_machine_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex as PlMutex;

    use super::*;
    use crate::interceptor::empty_chain;
    use crate::proxy::Affinity;

    struct StubProxy {
        locator: Locator,
        attachments: Attachments,
        affinity: PlMutex<Affinity>,
    }

    impl StubProxy {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                locator: Locator::new("app", "mod", "Thing", "ThingView"),
                attachments: Attachments::new(),
                affinity: PlMutex::new(Affinity::None),
            })
        }
    }

    impl ProxyHandler for StubProxy {
        fn locator(&self) -> &Locator {
            &self.locator
        }

        fn attachments(&self) -> &Attachments {
            &self.attachments
        }

        fn weak_affinity(&self) -> Affinity {
            self.affinity.lock().clone()
        }

        fn set_weak_affinity(&self, affinity: Affinity) {
            *self.affinity.lock() = affinity;
        }
    }

    struct CountedProducer {
        produced: Arc<AtomicUsize>,
        discarded: Arc<AtomicUsize>,
        value: &'static str,
    }

    impl CountedProducer {
        fn new(value: &'static str) -> (Box<dyn ResultProducer>, Arc<AtomicUsize>, Arc<AtomicUsize>)
        {
            let produced = Arc::new(AtomicUsize::new(0));
            let discarded = Arc::new(AtomicUsize::new(0));
            let producer: Box<dyn ResultProducer> = Box::new(Self {
                produced: produced.clone(),
                discarded: discarded.clone(),
                value,
            });
            (producer, produced, discarded)
        }
    }

    impl ResultProducer for CountedProducer {
        fn produce(self: Box<Self>) -> Result<InvocationValue, RemoteCause> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(self.value.to_string()))
        }

        fn discard(self: Box<Self>) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context() -> InvocationContext {
        InvocationContext::new(
            StubProxy::new(),
            MethodDescriptor::new("poke", Vec::<String>::new()),
            Vec::new(),
            empty_chain(),
        )
    }

    #[test]
    fn send_request_without_receiver_fails_and_closes_the_pass() {
        let ctx = context();
        assert!(matches!(
            ctx.send_request(),
            Err(InvocationError::NoReceiverBound)
        ));
        // The pass completed by unwinding; a retry is out of phase.
        assert!(matches!(
            ctx.send_request(),
            Err(InvocationError::WrongPhase(_))
        ));
    }

    #[test]
    fn get_result_before_any_reply_is_out_of_phase() {
        let ctx = context();
        assert!(matches!(
            ctx.get_result(),
            Err(InvocationError::WrongPhase(_))
        ));
    }

    #[test]
    fn late_reply_is_discarded_without_touching_state() {
        let ctx = context();
        // No receiver is bound, so cancel reports false, but the state
        // still moves to CancelReq and the explicit ack lands it.
        assert!(!ctx.future_response().cancel(false));
        ctx.shared.cancelled();
        let (producer, produced, discarded) = CountedProducer::new("late");
        ctx.shared.result_ready(producer);
        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
        assert!(ctx.future_response().is_cancelled());
    }

    #[test]
    fn duplicate_reply_is_discarded() {
        let ctx = context();
        let (first, first_produced, _) = CountedProducer::new("one");
        let (second, _, second_discarded) = CountedProducer::new("two");
        ctx.shared.result_ready(first);
        ctx.shared.result_ready(second);
        assert_eq!(second_discarded.load(Ordering::SeqCst), 1);

        let value = ctx.future_response().get().unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "one");
        assert_eq!(first_produced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discard_marks_one_way_and_releases_a_ready_reply() {
        let ctx = context();
        let (producer, produced, discarded) = CountedProducer::new("ignored");
        ctx.shared.result_ready(producer);
        ctx.set_discard_result();
        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
        assert!(matches!(
            ctx.future_response().get(),
            Err(InvocationError::OneWay)
        ));
    }

    #[test]
    fn abandonment_discards_an_unread_reply() {
        let (producer, produced, discarded) = CountedProducer::new("never read");
        {
            let ctx = context();
            ctx.shared.result_ready(producer);
        }
        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn consumed_invocation_is_not_discarded_on_drop() {
        let (producer, produced, discarded) = CountedProducer::new("kept");
        {
            let ctx = context();
            ctx.shared.result_ready(producer);
            let value = ctx.future_response().get().unwrap();
            assert_eq!(value.downcast_ref::<String>().unwrap(), "kept");
        }
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(discarded.load(Ordering::SeqCst), 0);
    }
}
