#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Remote method invocation scenarios: success, overload mismatch, fault
//! propagation, interleaving, and shutdown draining.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{pair, pair_with, wait_until, Adder, Point, Recorder, Translator, ADDER, ECHO, POINT};
use objlink::{
    CallArg, Connection, ControllerSource, FaultKind, LinkError, RemoteInterface, TypeRegistry,
    Value,
};

fn rmi_pair() -> (Connection, Connection) {
    let (a, b) = pair();
    b.expose(ADDER, ControllerSource::instance(Adder));
    a.set_listening(true);
    b.set_listening(true);
    (a, b)
}

#[tokio::test]
async fn add_returns_the_sum_and_drains_the_table() {
    let (a, _b) = rmi_pair();
    let adder = a.controller(ADDER);
    let sum = adder
        .invoke("Add", vec![2i32.into(), 3i32.into()])
        .await
        .unwrap();
    assert_eq!(sum.as_i32(), Some(5));
    assert_eq!(a.outstanding_calls(), 0);
}

#[tokio::test]
async fn wrong_parameter_types_fault_without_killing_the_connection() {
    let (a, _b) = rmi_pair();
    let adder = a.controller(ADDER);

    let err = adder
        .invoke("Add", vec![2.0f64.into(), 3.0f64.into()])
        .await
        .unwrap_err();
    match err {
        LinkError::ControllerInvocation { kind, .. } => {
            assert_eq!(kind, FaultKind::MethodNotFound)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The connection survives and the int overload still works.
    let sum = adder
        .invoke("Add", vec![1i32.into(), 1i32.into()])
        .await
        .unwrap();
    assert_eq!(sum.as_i32(), Some(2));
}

#[tokio::test]
async fn unknown_controller_reports_controller_not_found() {
    let (a, _b) = rmi_pair();
    let ghost = a.controller("demo.IGhost, demo");
    let err = ghost.invoke("Anything", vec![]).await.unwrap_err();
    match err {
        LinkError::ControllerInvocation { kind, message, .. } => {
            assert_eq!(kind, FaultKind::ControllerNotFound);
            assert!(message.contains("demo.IGhost, demo"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn method_errors_carry_message_and_remote_detail() {
    let (a, _b) = rmi_pair();
    let adder = a.controller(ADDER);
    let err = adder.invoke("Fail", vec![]).await.unwrap_err();
    match err {
        LinkError::ControllerInvocation {
            kind,
            message,
            remote_detail,
        } => {
            assert_eq!(kind, FaultKind::MethodInvokeException);
            assert!(message.contains("boom"));
            assert!(remote_detail.contains("Fail always faults"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_hundred_interleaved_calls_each_get_their_own_result() {
    let (a, _b) = rmi_pair();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..100i32 {
        let proxy = a.controller(ADDER);
        tasks.spawn(async move {
            let value = proxy
                .invoke("Add", vec![i.into(), i.into()])
                .await
                .unwrap();
            (i, value.as_i32().unwrap())
        });
    }

    let mut seen = std::collections::BTreeMap::new();
    while let Some(result) = tasks.join_next().await {
        let (i, sum) = result.unwrap();
        assert_eq!(sum, 2 * i, "call {i} got someone else's result");
        // No result observed twice.
        assert!(seen.insert(i, sum).is_none());
    }
    assert_eq!(seen.len(), 100);
    assert_eq!(a.outstanding_calls(), 0);
}

#[tokio::test]
async fn responses_correlate_by_id_not_position() {
    let (a, _b) = rmi_pair();
    let slow = a.controller(ADDER);
    let fast = a.controller(ADDER);

    let slow_call =
        tokio::spawn(async move { slow.invoke("SlowAdd", vec![10i32.into(), 10i32.into()]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Issued second, completes first.
    let quick = fast
        .invoke("Add", vec![1i32.into(), 2i32.into()])
        .await
        .unwrap();
    assert_eq!(quick.as_i32(), Some(3));

    let slow_result = slow_call.await.unwrap().unwrap();
    assert_eq!(slow_result.as_i32(), Some(20));
}

#[tokio::test]
async fn rmi_works_in_both_directions_concurrently() {
    let (a, b) = pair();
    a.expose(ECHO, ControllerSource::instance(common::EchoController));
    b.expose(ADDER, ControllerSource::instance(Adder));
    a.set_listening(true);
    b.set_listening(true);

    let from_a = a.controller(ADDER);
    let from_b = b.controller(ECHO);

    let (sum, echoed) = tokio::join!(
        from_a.invoke("Add", vec![20i32.into(), 22i32.into()]),
        from_b.invoke("Echo", vec!["ping".into()]),
    );
    assert_eq!(sum.unwrap().as_i32(), Some(42));
    assert_eq!(echoed.unwrap().as_str(), Some("ping"));
}

#[tokio::test]
async fn object_parameters_and_results_cross_the_wire() {
    let registry = Arc::new(TypeRegistry::new());
    registry.register::<Point>(POINT);
    let (a, b) = pair_with(Arc::clone(&registry), Arc::clone(&registry));
    b.expose(
        "demo.ITranslate, demo",
        ControllerSource::instance(Translator {
            registry: Arc::clone(&registry),
        }),
    );
    a.set_listening(true);
    b.set_listening(true);

    let translator = a.controller("demo.ITranslate, demo");
    let argument = registry.object(Point { x: 1, y: 2 }).unwrap();
    let moved = translator
        .invoke("Translate", vec![CallArg::object(argument), 10i32.into()])
        .await
        .unwrap();
    assert_eq!(*moved.get::<Point>().unwrap(), Point { x: 11, y: 12 });
}

#[tokio::test]
async fn broken_transport_cancels_every_pending_call() {
    let (a, b) = pair();
    a.set_listening(true);
    // The peer never answers: no listener, no controllers.

    let closed: Recorder<bool> = Recorder::new();
    let closed_sink = closed.clone();
    a.on_closed(move |error| closed_sink.push(error.is_some()))
        .detach();

    let proxy = a.controller(ADDER);
    let pending = tokio::spawn(async move {
        proxy.invoke("Add", vec![1i32.into(), 1i32.into()]).await
    });
    wait_until("call in flight", || a.outstanding_calls() == 1).await;

    drop(b);

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending call must complete in bounded time")
        .unwrap();
    match outcome.unwrap_err() {
        LinkError::ControllerInvocation { kind, .. } => {
            assert_eq!(kind, FaultKind::OperationCancelled)
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(a.outstanding_calls(), 0);

    wait_until("closed event", || closed.len() == 1).await;
    let err = a.write_value(Value::I32(1)).await.unwrap_err();
    assert!(matches!(err, LinkError::ObjectDisposed));
}

#[tokio::test]
async fn local_close_cancels_pending_calls() {
    let (a, _b) = pair();
    a.set_listening(true);

    let proxy = a.controller(ADDER);
    let pending = tokio::spawn(async move {
        proxy.invoke("Add", vec![1i32.into(), 1i32.into()]).await
    });
    wait_until("call in flight", || a.outstanding_calls() == 1).await;

    a.close().await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending call must complete in bounded time")
        .unwrap();
    match outcome.unwrap_err() {
        LinkError::ControllerInvocation { kind, .. } => {
            assert_eq!(kind, FaultKind::OperationCancelled)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn factories_run_once_per_connection() {
    let (a, b) = pair();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&constructions);
    b.expose(
        ADDER,
        ControllerSource::factory(move |_connection| {
            counter.fetch_add(1, Ordering::SeqCst);
            Adder
        }),
    );
    a.set_listening(true);
    b.set_listening(true);

    let proxy = a.controller(ADDER);
    for _ in 0..3 {
        proxy
            .invoke("Add", vec![1i32.into(), 1i32.into()])
            .await
            .unwrap();
    }
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn controller_registrations_are_first_wins() {
    let (a, b) = pair();
    b.expose(ADDER, ControllerSource::instance(Adder));
    // A later registration under the same identifier is ignored.
    b.expose(ADDER, ControllerSource::instance(common::EchoController));
    a.set_listening(true);
    b.set_listening(true);

    let proxy = a.controller(ADDER);
    let sum = proxy
        .invoke("Add", vec![2i32.into(), 2i32.into()])
        .await
        .unwrap();
    assert_eq!(sum.as_i32(), Some(4));
}

struct AddClient {
    remote: Arc<objlink::RemoteController>,
}

impl RemoteInterface for AddClient {
    const IDENTIFIER: &'static str = ADDER;

    fn attach(remote: Arc<objlink::RemoteController>) -> Self {
        AddClient { remote }
    }
}

impl AddClient {
    async fn add(&self, a: i32, b: i32) -> objlink::Result<i32> {
        let value = self.remote.invoke("Add", vec![a.into(), b.into()]).await?;
        Ok(value.as_i32().unwrap_or_default())
    }
}

#[tokio::test]
async fn typed_stubs_attach_to_the_cached_proxy() {
    let (a, _b) = rmi_pair();
    let stub = a.controller_as::<AddClient>();
    assert_eq!(stub.add(19, 23).await.unwrap(), 42);
    // The stub shares the per-identifier cached proxy.
    assert!(Arc::ptr_eq(&stub.remote, &a.controller(ADDER)));
}
