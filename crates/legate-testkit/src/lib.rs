//! legate-testkit: shared mocks and helpers for exercising the invocation
//! core.
//!
//! Provides counting result producers, a receiver that hands its completion
//! handle to the test, recording interceptors, and a test proxy handler.
//! The end-to-end scenario suite and the interleaving property tests live
//! in this crate's `tests/` directory, so that the core and the reference
//! receiver avoid circular dev-dependencies.
//!
//! Every mock calls back into the context through a lock-acquiring public
//! accessor (`future_response().is_done()`). The context mutex is not
//! reentrant, so a suite that runs to completion has also shown that the
//! core never holds its lock across user code.

#![forbid(unsafe_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use legate_core::{
    chain, Affinity, Attachments, FutureResponse, Interceptor, InterceptorChain,
    InvocationContext, InvocationError, InvocationValue, Locator, MethodDescriptor, ProxyHandler,
    Receiver, ReceiverInvocationContext, RemoteCause, ResultProducer, WEAK_AFFINITY,
};

/// Initialise a compact tracing subscriber for a test or demo binary.
///
/// Safe to call repeatedly; only the first call installs the subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wrap a value for use as an argument or result.
pub fn value<T: Any + Send + Sync>(value: T) -> InvocationValue {
    Arc::new(value)
}

/// Downcast a result to `String`, panicking with context on mismatch.
pub fn as_string(value: &InvocationValue) -> String {
    value
        .downcast_ref::<String>()
        .expect("result was not a String")
        .clone()
}

// ============================================================================
// Producers
// ============================================================================

/// Observation point shared with a [`CountingProducer`].
#[derive(Default)]
pub struct ProducerProbe {
    produced: AtomicUsize,
    discarded: AtomicUsize,
}

impl ProducerProbe {
    /// How many times `produce` ran.
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// How many times `discard` ran.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Total dispositions; at most one per producer.
    pub fn dispositions(&self) -> usize {
        self.produced() + self.discarded()
    }
}

/// A result producer that counts its disposition.
pub struct CountingProducer {
    outcome: Result<InvocationValue, RemoteCause>,
    probe: Arc<ProducerProbe>,
}

impl CountingProducer {
    /// A producer yielding `value`, plus its probe.
    pub fn ok<T: Any + Send + Sync>(value: T) -> (Box<dyn ResultProducer>, Arc<ProducerProbe>) {
        let probe = Arc::new(ProducerProbe::default());
        (
            Box::new(Self {
                outcome: Ok(Arc::new(value)),
                probe: probe.clone(),
            }),
            probe,
        )
    }

    /// A producer failing with `cause`, plus its probe.
    pub fn err(cause: RemoteCause) -> (Box<dyn ResultProducer>, Arc<ProducerProbe>) {
        let probe = Arc::new(ProducerProbe::default());
        (
            Box::new(Self {
                outcome: Err(cause),
                probe: probe.clone(),
            }),
            probe,
        )
    }
}

impl ResultProducer for CountingProducer {
    fn produce(self: Box<Self>) -> Result<InvocationValue, RemoteCause> {
        self.probe.produced.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }

    fn discard(self: Box<Self>) {
        self.probe.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Receivers
// ============================================================================

/// What [`ManualReceiver::cancel_invocation`] should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelBehavior {
    /// Report failure to cancel and do nothing else.
    #[default]
    Refuse,
    /// Acknowledge the cancellation through the completion handle and
    /// report success.
    Confirm,
    /// Report success but deliver nothing; the test drives completion.
    ReportOnly,
}

struct ManualInner {
    captured: Mutex<Vec<ReceiverInvocationContext>>,
    cancel_behavior: CancelBehavior,
    cancel_requests: AtomicUsize,
}

/// A receiver that schedules nothing: it hands its completion handle to the
/// test, which then plays the transport's role.
#[derive(Clone)]
pub struct ManualReceiver {
    inner: Arc<ManualInner>,
}

impl ManualReceiver {
    /// A receiver whose `cancel_invocation` refuses.
    pub fn new() -> Self {
        Self::with_cancel(CancelBehavior::Refuse)
    }

    /// A receiver with the given cancellation behavior.
    pub fn with_cancel(cancel_behavior: CancelBehavior) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                captured: Mutex::new(Vec::new()),
                cancel_behavior,
                cancel_requests: AtomicUsize::new(0),
            }),
        }
    }

    /// The completion handle captured for the most recent invocation.
    pub fn last_ctx(&self) -> ReceiverInvocationContext {
        self.inner
            .captured
            .lock()
            .last()
            .expect("no invocation was processed")
            .clone()
    }

    /// How many invocations reached this receiver.
    pub fn processed(&self) -> usize {
        self.inner.captured.lock().len()
    }

    /// How many cancellation requests reached this receiver.
    pub fn cancel_requests(&self) -> usize {
        self.inner.cancel_requests.load(Ordering::SeqCst)
    }

    /// This receiver as a shareable trait object.
    pub fn into_shared(self) -> Arc<dyn Receiver> {
        Arc::new(self)
    }
}

impl Default for ManualReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver for ManualReceiver {
    fn process_invocation(
        &self,
        ctx: &InvocationContext,
        receiver_ctx: &ReceiverInvocationContext,
    ) -> Result<(), InvocationError> {
        // Probe: acquiring context state here must not deadlock.
        let _ = ctx.future_response().is_done();
        self.inner.captured.lock().push(receiver_ctx.clone());
        Ok(())
    }

    fn cancel_invocation(
        &self,
        ctx: &InvocationContext,
        receiver_ctx: &ReceiverInvocationContext,
    ) -> bool {
        let _ = ctx.future_response().state();
        self.inner.cancel_requests.fetch_add(1, Ordering::SeqCst);
        match self.inner.cancel_behavior {
            CancelBehavior::Refuse => false,
            CancelBehavior::Confirm => {
                receiver_ctx.cancelled();
                true
            }
            CancelBehavior::ReportOnly => true,
        }
    }
}

// ============================================================================
// Interceptors
// ============================================================================

/// Shared, ordered log of pipeline events.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Create an empty event log.
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot the log contents.
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

/// An interceptor that records both passes and forwards them unchanged.
pub struct RecordingInterceptor {
    name: &'static str,
    log: EventLog,
}

impl RecordingInterceptor {
    /// Create a recording interceptor writing to `log`.
    pub fn new(name: &'static str, log: EventLog) -> Arc<dyn Interceptor> {
        Arc::new(Self { name, log })
    }
}

impl Interceptor for RecordingInterceptor {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        let _ = ctx.future_response().is_done();
        self.log.lock().push(format!("{}:request", self.name));
        ctx.send_request()
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        let _ = ctx.future_response().is_done();
        self.log.lock().push(format!("{}:result", self.name));
        ctx.get_result()
    }
}

/// An interceptor that upgrades the invocation to asynchronous before
/// dispatching it.
pub struct AsyncUpgradeInterceptor;

impl Interceptor for AsyncUpgradeInterceptor {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        ctx.proceed_asynchronously();
        ctx.send_request()
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        ctx.get_result()
    }
}

/// An interceptor that marks the invocation fire-and-forget after
/// dispatching it.
pub struct OneWayInterceptor;

impl Interceptor for OneWayInterceptor {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        let outcome = ctx.send_request();
        ctx.set_discard_result();
        outcome
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        ctx.get_result()
    }
}

/// An interceptor that deposits a weak-affinity hint during the result pass.
pub struct AffinityInterceptor {
    affinity: Affinity,
}

impl AffinityInterceptor {
    /// Create an interceptor depositing `affinity`.
    pub fn new(affinity: Affinity) -> Arc<dyn Interceptor> {
        Arc::new(Self { affinity })
    }
}

impl Interceptor for AffinityInterceptor {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        ctx.send_request()
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        ctx.attachments().set(*WEAK_AFFINITY, self.affinity.clone());
        ctx.get_result()
    }
}

// ============================================================================
// Proxy handler
// ============================================================================

/// A proxy handler that records weak-affinity updates.
pub struct TestProxyHandler {
    locator: Locator,
    attachments: Attachments,
    affinity: Mutex<Affinity>,
    affinity_updates: AtomicUsize,
}

impl TestProxyHandler {
    /// Create a handler for the given locator.
    pub fn new(locator: Locator) -> Arc<Self> {
        Arc::new(Self {
            locator,
            attachments: Attachments::new(),
            affinity: Mutex::new(Affinity::None),
            affinity_updates: AtomicUsize::new(0),
        })
    }

    /// A handler for the default greeter target.
    pub fn greeter() -> Arc<Self> {
        Self::new(Locator::new("my-app", "my-module", "Greeter", "GreeterView"))
    }

    /// How many times `set_weak_affinity` ran.
    pub fn affinity_updates(&self) -> usize {
        self.affinity_updates.load(Ordering::SeqCst)
    }
}

impl ProxyHandler for TestProxyHandler {
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
        self.affinity_updates.fetch_add(1, Ordering::SeqCst);
        *self.affinity.lock() = affinity;
    }
}

// ============================================================================
// Invocation helpers
// ============================================================================

/// Build a `greet("test")` invocation through the given chain.
pub fn greet_invocation(
    proxy: Arc<TestProxyHandler>,
    interceptors: Vec<Arc<dyn Interceptor>>,
) -> InvocationContext {
    InvocationContext::new(
        proxy,
        MethodDescriptor::new("greet", ["String"]),
        vec![value("test".to_string())],
        chain(interceptors),
    )
}

/// Build a `greet("test")` invocation, bind `receiver`, and run the request
/// pass. Returns the context and its completion handle.
pub fn dispatched_greet(
    proxy: Arc<TestProxyHandler>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    receiver: Arc<dyn Receiver>,
) -> (InvocationContext, FutureResponse) {
    let ctx = greet_invocation(proxy, interceptors);
    ctx.set_receiver(receiver);
    ctx.send_request().expect("request pass failed");
    let future = ctx.future_response();
    (ctx, future)
}

/// The interceptor chain used by most scenarios: a recording interceptor
/// around whatever the test adds.
pub fn recording_chain(log: &EventLog) -> Vec<Arc<dyn Interceptor>> {
    vec![RecordingInterceptor::new("outer", log.clone())]
}

/// An `InterceptorChain` from a plain vector, re-exported for tests that
/// build contexts by hand.
pub fn chain_of(interceptors: Vec<Arc<dyn Interceptor>>) -> InterceptorChain {
    chain(interceptors)
}
