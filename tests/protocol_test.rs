//! Protocol engine and session integration tests
//!
//! Drives a `ProtocolEngine` through a `FakeTransport` whose peer side is
//! scripted by hand, so response ordering and timing are under test control.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use common::init_result;
use toolgate::mcp::protocol::ProtocolEngine;
use toolgate::mcp::session::{Session, SessionState};
use toolgate::mcp::transport::fake::FakeTransport;
use toolgate::mcp::types::Implementation;
use toolgate::ToolgateError;

fn client_info() -> Implementation {
    Implementation {
        name: "toolgate-it".to_string(),
        version: "0.0.0".to_string(),
    }
}

/// Next message the client sent, parsed.
async fn next_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("client sent nothing")
        .expect("client closed");
    serde_json::from_str(&raw).expect("client sent invalid JSON")
}

/// Connect and complete the handshake by hand.
async fn handshaken(
    timeout: Duration,
) -> (
    Arc<ProtocolEngine>,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let (transport, handle) = FakeTransport::new();
    let mut outbound = handle.outbound_rx;
    let inbound = handle.inbound_tx;

    let engine = Arc::new(ProtocolEngine::new(
        Arc::new(transport),
        client_info(),
        timeout,
    ));
    engine.connect().await.unwrap();

    let init = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.initialize().await })
    };
    let request = next_sent(&mut outbound).await;
    assert_eq!(request["method"], "initialize");
    assert_eq!(request["params"]["protocolVersion"], "2025-03-26");
    assert_eq!(request["params"]["clientInfo"]["name"], "toolgate-it");
    inbound
        .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": init_result()}).to_string())
        .unwrap();
    init.await.unwrap().unwrap();

    let initialized = next_sent(&mut outbound).await;
    assert_eq!(initialized["method"], "notifications/initialized");
    assert!(initialized.get("id").is_none());

    (engine, outbound, inbound)
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let (engine, mut outbound, inbound) = handshaken(Duration::from_secs(5)).await;

    let mut calls = Vec::new();
    for n in 0..50 {
        let engine = Arc::clone(&engine);
        calls.push(tokio::spawn(async move {
            let result = engine
                .call("tools/call", Some(json!({"n": n})), None)
                .await
                .unwrap();
            (n, result)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..50 {
        requests.push(next_sent(&mut outbound).await);
    }

    // IDs are unique
    let mut ids: Vec<u64> = requests.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);

    // Answer in reverse order, echoing each request's payload
    for request in requests.iter().rev() {
        inbound
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"echo": request["params"]["n"]}
                })
                .to_string(),
            )
            .unwrap();
    }

    for call in calls {
        let (n, result) = call.await.unwrap();
        assert_eq!(result["echo"], n);
    }
    assert_eq!(engine.in_flight().await, 0);
}

#[tokio::test]
async fn test_call_timeout_then_late_reply_is_ignored() {
    let (engine, mut outbound, inbound) = handshaken(Duration::from_millis(100)).await;

    let err = engine.call("tools/list", None, None).await.unwrap_err();
    assert!(matches!(err, ToolgateError::Timeout { ref method, .. } if method == "tools/list"));
    let late = next_sent(&mut outbound).await;

    // The late reply must not disturb the next exchange
    inbound
        .send(json!({"jsonrpc": "2.0", "id": late["id"], "result": {"stale": true}}).to_string())
        .unwrap();

    let next = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .call("tools/list", None, Some(Duration::from_secs(2)))
                .await
        })
    };
    let request = next_sent(&mut outbound).await;
    inbound
        .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"fresh": true}}).to_string())
        .unwrap();

    let result = next.await.unwrap().unwrap();
    assert_eq!(result, json!({"fresh": true}));
}

#[tokio::test]
async fn test_reply_with_unknown_id_is_protocol_violation() {
    let (engine, mut outbound, inbound) = handshaken(Duration::from_secs(5)).await;

    let pending = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.call("tools/list", None, None).await })
    };
    let request = next_sent(&mut outbound).await;
    let bogus = request["id"].as_u64().unwrap() + 1000;
    inbound
        .send(json!({"jsonrpc": "2.0", "id": bogus, "result": {}}).to_string())
        .unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ToolgateError::Protocol(_)));
}

#[tokio::test]
async fn test_server_error_object_is_rpc_error() {
    let (engine, mut outbound, inbound) = handshaken(Duration::from_secs(5)).await;

    let pending = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.call("tools/list", None, None).await })
    };
    let request = next_sent(&mut outbound).await;
    inbound
        .send(
            json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32601, "message": "Method not found", "data": {"hint": "x"}}
            })
            .to_string(),
        )
        .unwrap();

    match pending.await.unwrap() {
        Err(ToolgateError::Rpc {
            method,
            code,
            message,
            data,
        }) => {
            assert_eq!(method, "tools/list");
            assert_eq!(code, -32601);
            assert_eq!(message, "Method not found");
            assert_eq!(data, Some(json!({"hint": "x"})));
        }
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_peer_close_fails_in_flight_calls() {
    let (transport, handle) = FakeTransport::new();
    let engine = Arc::new(ProtocolEngine::new(
        Arc::new(transport),
        client_info(),
        Duration::from_secs(5),
    ));
    engine.connect().await.unwrap();

    let init = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.initialize().await })
    };
    // Let the handshake request go out, then hang up without answering
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.close();

    let err = tokio::time::timeout(Duration::from_secs(2), init)
        .await
        .expect("handshake never failed")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ToolgateError::Eof));
    assert!(!engine.is_initialized());
}

#[tokio::test]
async fn test_session_lifecycle_over_fake_gateway() {
    let (transport, handle) = FakeTransport::new();
    handle.serve(|method, params| common::gateway_reply(method, params));

    let session = Session::new(ProtocolEngine::new(
        Arc::new(transport),
        client_info(),
        Duration::from_secs(2),
    ));
    assert_eq!(session.state(), SessionState::Unstarted);

    let capabilities = session.enter().await.unwrap();
    assert!(capabilities.has("tools"));
    assert_eq!(session.state(), SessionState::Active);
    assert!(matches!(
        session.enter().await,
        Err(ToolgateError::SessionReentry(_))
    ));

    let tools = session
        .engine()
        .call("tools/list", None, None)
        .await
        .unwrap();
    assert_eq!(tools["tools"].as_array().unwrap().len(), 2);

    session.exit().await;
    assert_eq!(session.state(), SessionState::Ended);
    session.exit().await;
    assert_eq!(session.state(), SessionState::Ended);
    assert!(matches!(
        session.engine().call("tools/list", None, None).await,
        Err(ToolgateError::SessionInactive(_))
    ));
}
