//! Minimal end-to-end invocation: a greet call dispatched through a
//! recording interceptor to the in-process receiver.
//!
//! Run with `RUST_LOG=debug` to watch the pipeline and state transitions.

use std::sync::Arc;

use legate::prelude::*;
use legate::receiver_mem::InProcReceiver;
use legate_testkit::{as_string, event_log, events, RecordingInterceptor, TestProxyHandler};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<(), InvocationError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let receiver = InProcReceiver::new();
    receiver.register(
        "my-app/my-module/Greeter",
        |_method: &MethodDescriptor,
         parameters: &[InvocationValue]|
         -> Result<InvocationValue, legate::RemoteCause> {
            let name = parameters[0]
                .downcast_ref::<String>()
                .expect("greet takes a String");
            Ok(Arc::new(format!("Hi {name}")))
        },
    );

    let log = event_log();
    let proxy = TestProxyHandler::greeter();
    let ctx = InvocationContext::new(
        proxy,
        MethodDescriptor::new("greet", ["String"]),
        vec![Arc::new("demo".to_string())],
        legate::chain(vec![RecordingInterceptor::new("demo", log.clone())]),
    );
    ctx.set_receiver(receiver.into_shared());
    ctx.send_request()?;

    match ctx.await_response()? {
        Response::Complete(value) => {
            println!("greeting: {}", as_string(&value));
            println!("pipeline: {:?}", events(&log));
        }
        Response::AsyncPending => unreachable!("nothing upgraded this invocation"),
    }
    Ok(())
}
