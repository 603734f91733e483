//! Poller and HTTP bridge sharing one dispatcher against a mock daemon.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use test_log::test;
use tokio::sync::{Mutex, broadcast};
use tower::ServiceExt;

use radiolink_core::Dispatcher;
use radiolink_core::bridge::{self, BridgeState};
use radiolink_core::ipc::{Message, Opcode};
use radiolink_core::telemetry::{Poller, ShutdownSignal, TelemetryHistory, lock_history};
use radiolink_test_utils::{MockDaemon, Reply, TestConfigBuilder};

/// Answers REPORT with one port and one status block; everything else with 0.
fn handler(request: &Message) -> Reply {
    if request.command == Opcode::Report.code() {
        let mut ints = vec![0; 22];
        ints[0] = 3;
        ints[1] = 7;
        ints[11] = 0;
        let mut doubles = vec![0.0; 22];
        doubles[0] = 1_000_000.0;
        doubles[11] = 42.0;
        Reply::payloads(request, ints, b"PU", doubles)
    } else {
        Reply::status(request, 0)
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[test(tokio::test)]
async fn poller_fills_history_and_publishes_latest() {
    let daemon = MockDaemon::start(handler).await;
    let dispatcher = Arc::new(Mutex::new(daemon.dispatcher()));
    let history = Arc::new(std::sync::Mutex::new(TelemetryHistory::new(2)));
    let poller = Poller::new(dispatcher, Arc::clone(&history), Duration::from_millis(10));
    let latest = poller.subscribe();

    for _ in 0..3 {
        assert_eq!(poller.poll_once().await, 2);
    }

    let history = lock_history(&history);
    assert_eq!(history.keys().collect::<Vec<_>>(), vec!["P3", "U0"]);
    assert_eq!(history.series("P3").unwrap().len(), 2);
    assert_eq!(latest.borrow().len(), 2);
}

#[test(tokio::test)]
async fn configured_poller_uses_layout_timeout_and_history_len() {
    // Two 10-wide V1 blocks; under V2 the second block would not fit.
    let daemon = MockDaemon::start(|request| {
        let mut ints = vec![0; 20];
        ints[10] = 4;
        Reply::payloads(request, ints, b"PC", vec![1.0; 20])
    })
    .await;
    let config = TestConfigBuilder::new()
        .report_protocol("v1")
        .read_timeout_ms(500)
        .history_len(3)
        .build();
    let dispatcher = Dispatcher::from_config(daemon.socket_path(), &config);
    let poller = Poller::from_config(Arc::new(Mutex::new(dispatcher)), &config);

    for _ in 0..5 {
        assert_eq!(poller.poll_once().await, 2);
    }

    let history = poller.history();
    let history = lock_history(&history);
    assert_eq!(history.capacity(), 3);
    assert_eq!(history.keys().collect::<Vec<_>>(), vec!["C4", "P0"]);
    assert_eq!(history.series("C4").unwrap().len(), 3);
}

#[test(tokio::test)]
async fn poller_run_loop_records_until_shutdown() {
    let daemon = MockDaemon::start(handler).await;
    let dispatcher = Arc::new(Mutex::new(daemon.dispatcher()));
    let poller = Poller::new(
        dispatcher,
        Arc::new(std::sync::Mutex::new(TelemetryHistory::new(50))),
        Duration::from_millis(20),
    );
    let history = poller.history();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(poller.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(ShutdownSignal).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert!(!lock_history(&history).is_empty());
    let polled = daemon.requests().len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(daemon.requests().len(), polled);
}

#[test(tokio::test)]
async fn bridge_commands_reach_the_daemon() {
    let daemon = MockDaemon::start(handler).await;
    let state = Arc::new(BridgeState {
        dispatcher: Arc::new(Mutex::new(daemon.dispatcher())),
        history: Arc::new(std::sync::Mutex::new(TelemetryHistory::new(50))),
        static_dir: None,
    });

    let req = Request::post("/command")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"cmd":"switch","port":1,"new_channel":4103}"#))
        .unwrap();
    let resp = bridge::router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({"status": 0}));

    let req = Request::post("/command")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"cmd":"report"}"#))
        .unwrap();
    let resp = bridge::router(state).oneshot(req).await.unwrap();
    let report = body_json(resp).await;
    assert_eq!(report[0]["kind"], "port");
    assert_eq!(report[0]["id"], 3);
    assert_eq!(report[0]["bound"], 7);
    assert_eq!(report[0]["stats"]["tx_bits"], 1_000_000.0);
    assert_eq!(report[1]["kind"], "status");
    assert_eq!(report[1]["stats"]["usage"], 42.0);

    let requests = daemon.requests();
    assert_eq!(requests[0].payload_int, vec![1, 0x1007]);
    assert_eq!(requests[1].command, Opcode::Report.code());
}

#[test(tokio::test)]
async fn bridge_reports_serve_poller_history() {
    let daemon = MockDaemon::start(handler).await;
    let dispatcher = Arc::new(Mutex::new(daemon.dispatcher()));
    let poller = Poller::new(
        Arc::clone(&dispatcher),
        Arc::new(std::sync::Mutex::new(TelemetryHistory::new(50))),
        Duration::from_secs(1),
    );
    poller.poll_once().await;

    let state = Arc::new(BridgeState {
        dispatcher,
        history: poller.history(),
        static_dir: None,
    });
    let req = Request::get("/reports").body(Body::empty()).unwrap();
    let resp = bridge::router(state).oneshot(req).await.unwrap();
    let reports = body_json(resp).await;
    assert_eq!(reports["P3"].as_array().unwrap().len(), 1);
    assert_eq!(reports["U0"][0]["stats"]["usage"], 42.0);
    assert!(reports["U0"][0]["stats"]["t"].as_f64().unwrap() > 0.0);
}
