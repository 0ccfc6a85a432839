//! End-to-end lifecycle scenarios for the invocation core, driven through
//! the manual receiver so the test plays the transport's role.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use legate_core::{
    Affinity, Interceptor, InvocationContext, InvocationError, InvocationState, InvocationValue,
    ProxyHandler, Response,
};
use legate_testkit::{
    as_string, dispatched_greet, event_log, events, greet_invocation, init_tracing,
    AffinityInterceptor, AsyncUpgradeInterceptor, CancelBehavior, CountingProducer, ManualReceiver,
    OneWayInterceptor, RecordingInterceptor, TestProxyHandler,
};

#[test]
fn happy_path_with_empty_chain() {
    init_tracing();
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    assert_eq!(future.state(), InvocationState::Waiting);
    assert!(!future.is_done());

    let (producer, probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    assert_eq!(future.state(), InvocationState::Ready);
    assert!(future.is_done());

    let result = future.get().unwrap();
    assert_eq!(as_string(&result), "Hi test");
    assert_eq!(future.state(), InvocationState::Done);
    assert_eq!(probe.produced(), 1);
    assert_eq!(probe.discarded(), 0);

    // A second read serves the cached value without touching the producer.
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
    assert_eq!(probe.produced(), 1);
}

/// Observes the serialization state from inside the result pass.
struct ConsumingObserver;

impl Interceptor for ConsumingObserver {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        assert_eq!(ctx.future_response().state(), InvocationState::Waiting);
        ctx.send_request()
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        assert_eq!(ctx.future_response().state(), InvocationState::Consuming);
        ctx.get_result()
    }
}

#[test]
fn result_pass_runs_in_consuming_state() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(
        proxy,
        vec![Arc::new(ConsumingObserver)],
        receiver.clone().into_shared(),
    );

    let (producer, _probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
}

#[test]
fn async_upgrade_releases_the_caller() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let ctx = greet_invocation(proxy, vec![Arc::new(AsyncUpgradeInterceptor)]);
    ctx.set_receiver(receiver.clone().into_shared());
    ctx.send_request().unwrap();

    match ctx.await_response() {
        Ok(Response::AsyncPending) => {}
        Ok(Response::Complete(_)) => panic!("expected the asynchronous upgrade"),
        Err(e) => panic!("await failed: {e}"),
    }

    let future = ctx.future_response();
    let (producer, probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
    assert_eq!(probe.produced(), 1);
}

#[test]
fn synchronous_await_drives_the_result_pass() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    let rcv = receiver.last_ctx();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let (producer, probe) = CountingProducer::ok("Hi test".to_string());
        rcv.result_ready(producer);
        probe
    });

    match ctx.await_response() {
        Ok(Response::Complete(value)) => assert_eq!(as_string(&value), "Hi test"),
        _ => panic!("expected a synchronous completion"),
    }
    let probe = handle.join().unwrap();
    assert_eq!(probe.produced(), 1);

    // The handle now serves the same cached value.
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
    assert_eq!(probe.produced(), 1);
}

#[test]
fn cancellation_wins_when_the_receiver_confirms() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::with_cancel(CancelBehavior::Confirm);
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    assert!(future.cancel(true));
    assert!(future.is_cancelled());
    assert_eq!(receiver.cancel_requests(), 1);
    assert!(matches!(future.get(), Err(InvocationError::Cancelled)));

    // Repeated cancel reports false once the race is settled.
    assert!(!future.cancel(true));
    assert_eq!(receiver.cancel_requests(), 1);
}

#[test]
fn result_beats_cancel_in_the_race() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::with_cancel(CancelBehavior::ReportOnly);
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    assert!(future.cancel(true));
    assert_eq!(future.state(), InvocationState::CancelReq);

    let (producer, probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);

    assert!(!future.is_cancelled());
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
    assert_eq!(probe.produced(), 1);
    assert_eq!(probe.discarded(), 0);
}

#[test]
fn one_way_reply_is_released_on_abandonment() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (ctx, future) = dispatched_greet(
        proxy,
        vec![Arc::new(OneWayInterceptor)],
        receiver.clone().into_shared(),
    );

    let (producer, probe) = CountingProducer::ok("ignored".to_string());
    receiver.last_ctx().result_ready(producer);

    assert!(matches!(future.get(), Err(InvocationError::OneWay)));
    assert_eq!(probe.dispositions(), 0);

    // The receiver holds only a weak handle, so dropping the caller-side
    // handles releases the unread reply.
    drop(future);
    drop(ctx);
    assert_eq!(probe.produced(), 0);
    assert_eq!(probe.discarded(), 1);
}

#[test]
fn timeout_leaves_the_invocation_usable() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    assert!(matches!(
        future.get_timeout(Duration::from_millis(50)),
        Err(InvocationError::TimedOut)
    ));
    assert_eq!(future.state(), InvocationState::Waiting);

    let (producer, probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    let result = future.get_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(as_string(&result), "Hi test");
    assert_eq!(probe.produced(), 1);
}

#[test]
fn timeout_then_abandonment_releases_the_reply() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    assert!(matches!(
        future.get_timeout(Duration::from_millis(10)),
        Err(InvocationError::TimedOut)
    ));

    let (producer, probe) = CountingProducer::ok("never read".to_string());
    receiver.last_ctx().result_ready(producer);
    drop(future);
    drop(ctx);
    assert_eq!(probe.produced(), 0);
    assert_eq!(probe.discarded(), 1);
}

#[test]
fn producer_failure_is_cached_and_rethrown() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    let (producer, probe) = CountingProducer::err(Arc::new(std::io::Error::other("x")));
    receiver.last_ctx().result_ready(producer);

    let first = match future.get() {
        Err(InvocationError::RemoteFailure(cause)) => cause,
        Err(other) => panic!("expected a remote failure, got {other}"),
        Ok(_) => panic!("expected a remote failure, got a value"),
    };
    assert_eq!(first.to_string(), "x");
    assert_eq!(future.state(), InvocationState::Failed);

    let second = match future.get() {
        Err(InvocationError::RemoteFailure(cause)) => cause,
        Err(other) => panic!("expected a remote failure, got {other}"),
        Ok(_) => panic!("expected a remote failure, got a value"),
    };
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(probe.produced(), 1);
    assert_eq!(probe.discarded(), 0);
}

#[test]
fn interceptors_run_in_order_on_both_passes() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let log = event_log();
    let (_ctx, future) = dispatched_greet(
        proxy,
        vec![
            RecordingInterceptor::new("a", log.clone()),
            RecordingInterceptor::new("b", log.clone()),
        ],
        receiver.clone().into_shared(),
    );

    let (producer, _probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    future.get().unwrap();

    assert_eq!(
        events(&log),
        vec!["a:request", "b:request", "a:result", "b:result"]
    );
}

#[test]
fn weak_affinity_applies_once_after_a_successful_pass() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let log = event_log();
    let (_ctx, future) = dispatched_greet(
        proxy.clone(),
        vec![
            RecordingInterceptor::new("outer", log.clone()),
            AffinityInterceptor::new(Affinity::Node("node-7".into())),
        ],
        receiver.clone().into_shared(),
    );

    let (producer, _probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    future.get().unwrap();

    assert_eq!(proxy.affinity_updates(), 1);
    assert_eq!(proxy.weak_affinity(), Affinity::Node("node-7".into()));

    // The cached result does not re-apply the hint.
    future.get().unwrap();
    assert_eq!(proxy.affinity_updates(), 1);
}

#[test]
fn weak_affinity_is_not_applied_on_failure() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(
        proxy.clone(),
        vec![AffinityInterceptor::new(Affinity::Node("node-7".into()))],
        receiver.clone().into_shared(),
    );

    let (producer, _probe) = CountingProducer::err(Arc::new(std::io::Error::other("x")));
    receiver.last_ctx().result_ready(producer);
    assert!(future.get().is_err());
    assert_eq!(proxy.affinity_updates(), 0);
    assert_eq!(proxy.weak_affinity(), Affinity::None);
}

/// Calls `send_request` twice to provoke the phase guard.
struct DoubleSend;

impl Interceptor for DoubleSend {
    fn handle_invocation(&self, ctx: &InvocationContext) -> Result<(), InvocationError> {
        ctx.send_request()?;
        match ctx.send_request() {
            Err(InvocationError::WrongPhase(_)) => Ok(()),
            other => panic!("second send_request should be out of phase, got {other:?}"),
        }
    }

    fn handle_invocation_result(
        &self,
        ctx: &InvocationContext,
    ) -> Result<InvocationValue, InvocationError> {
        ctx.get_result()
    }
}

#[test]
fn repeated_send_request_is_rejected() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(
        proxy,
        vec![Arc::new(DoubleSend)],
        receiver.clone().into_shared(),
    );

    let (producer, _probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);
    assert_eq!(as_string(&future.get().unwrap()), "Hi test");
}

#[test]
fn contending_getters_share_one_consumption() {
    let proxy = TestProxyHandler::greeter();
    let receiver = ManualReceiver::new();
    let (_ctx, future) = dispatched_greet(proxy, vec![], receiver.clone().into_shared());

    let mut getters = Vec::new();
    for _ in 0..4 {
        let future = future.clone();
        getters.push(thread::spawn(move || {
            future.get().map(|value| as_string(&value))
        }));
    }

    thread::sleep(Duration::from_millis(20));
    let (producer, probe) = CountingProducer::ok("Hi test".to_string());
    receiver.last_ctx().result_ready(producer);

    for getter in getters {
        assert_eq!(getter.join().unwrap().unwrap(), "Hi test");
    }
    assert_eq!(probe.produced(), 1);
    assert_eq!(probe.discarded(), 0);
}

#[test]
fn context_data_keeps_insertion_order() {
    let proxy = TestProxyHandler::greeter();
    let ctx = greet_invocation(proxy, vec![]);
    {
        let mut data = ctx.context_data();
        data.insert("z".into(), Arc::new(1u32) as _);
        data.insert("a".into(), Arc::new(2u32) as _);
        data.insert("m".into(), Arc::new(3u32) as _);
    }
    let data = ctx.context_data();
    let keys: Vec<&str> = data.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
}
