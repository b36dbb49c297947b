//! `WsChainSource` against a scripted in-process WebSocket node.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use chainrelay_core::{ChainEventSource, Delivery, LogFilter, SourceError, StreamKind};
use chainrelay_ws::{WsChainSource, WsClientConfig, WsRpcClient};

enum Frame {
    Json(Value),
    Close,
}

/// Serve one connection, answering each request with `script(request)`.
async fn mock_node<F>(script: F) -> String
where
    F: Fn(&Value) -> Vec<Frame> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let script = Arc::new(script);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();
        while let Some(Ok(msg)) = read.next().await {
            let Message::Text(text) = msg else { continue };
            let request: Value = serde_json::from_str(&text).unwrap();
            for frame in script(&request) {
                match frame {
                    Frame::Json(v) => write.send(Message::Text(v.to_string())).await.unwrap(),
                    Frame::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
        }
    });

    format!("ws://{addr}")
}

fn reply(request: &Value, result: Value) -> Frame {
    Frame::Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
}

fn notify(subscription: &str, result: Value) -> Frame {
    Frame::Json(json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": subscription, "result": result},
    }))
}

fn head_json(hash: &str) -> Value {
    json!({"hash": hash, "parentHash": "0x00", "number": "0x2a", "timestamp": "0x1"})
}

async fn connect(url: &str) -> (WsChainSource, CancellationToken) {
    let cancel = CancellationToken::new();
    let config = WsClientConfig {
        request_timeout: Some(Duration::from_secs(2)),
    };
    let source = WsChainSource::connect(url, config, cancel.clone()).await.unwrap();
    (source, cancel)
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut).await.expect("timed out")
}

#[tokio::test]
async fn headers_arrive_decoded() {
    let url = mock_node(|req| match req["method"].as_str() {
        Some("eth_subscribe") => vec![
            reply(req, json!("0xs1")),
            notify("0xs1", head_json("0xaa")),
        ],
        _ => vec![],
    })
    .await;
    let (source, cancel) = connect(&url).await;

    let mut headers = source.subscribe_headers().await.unwrap();
    match within(headers.recv()).await {
        Delivery::Event(header) => {
            assert_eq!(header.hash, "0xaa");
            assert_eq!(header.number_u64(), 42);
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    cancel.cancel();
}

#[tokio::test]
async fn log_filter_is_sent_and_rpc_rejection_maps_to_subscribe_error() {
    let url = mock_node(|req| {
        assert_eq!(req["params"][0], "logs");
        assert_eq!(req["params"][1]["address"][0], "0xfeed");
        vec![Frame::Json(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": -32602, "message": "invalid filter"},
        }))]
    })
    .await;
    let (source, _cancel) = connect(&url).await;

    let err = source
        .subscribe_logs(&LogFilter::all().with_address("0xfeed"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Subscribe { kind: StreamKind::Logs, .. }));
}

#[tokio::test]
async fn block_lookup_handles_known_and_unknown_hashes() {
    let url = mock_node(|req| {
        assert_eq!(req["method"], "eth_getBlockByHash");
        assert_eq!(req["params"][1], true);
        let result = match req["params"][0].as_str() {
            Some("0xaa") => json!({
                "hash": "0xaa",
                "parentHash": "0x00",
                "number": "0x2a",
                "timestamp": "0x1",
                "transactions": [{"hash": "0xt1", "blockHash": "0xaa"}],
            }),
            _ => Value::Null,
        };
        vec![reply(req, result)]
    })
    .await;
    let (source, cancel) = connect(&url).await;

    let block = source.block_by_hash("0xaa").await.unwrap().unwrap();
    assert_eq!(block.number_u64(), 42);
    assert_eq!(block.full_transactions()[0].hash, "0xt1");
    assert!(source.block_by_hash("0xbb").await.unwrap().is_none());
    cancel.cancel();
}

#[tokio::test]
async fn node_close_fails_open_subscriptions() {
    let url = mock_node(|req| vec![reply(req, json!("0xs1")), Frame::Close]).await;
    let (source, _cancel) = connect(&url).await;

    let mut headers = source.subscribe_headers().await.unwrap();
    assert!(matches!(
        within(headers.recv()).await,
        Delivery::Failed(SourceError::Disconnected(_))
    ));
    assert!(!source.client().is_connected());
}

#[tokio::test]
async fn pending_hashes_are_resolved_to_transactions() {
    let url = mock_node(|req| match req["method"].as_str() {
        Some("eth_subscribe") => vec![
            reply(req, json!("0xp")),
            notify("0xp", json!("0xgone")),
            notify("0xp", json!("0xlive")),
        ],
        Some("eth_getTransactionByHash") => match req["params"][0].as_str() {
            Some("0xlive") => vec![reply(req, json!({"hash": "0xlive", "nonce": "0x7"}))],
            _ => vec![reply(req, Value::Null)],
        },
        _ => vec![],
    })
    .await;
    let (source, cancel) = connect(&url).await;

    let mut pending = source.monitor_pending_transactions();
    match within(pending.recv()).await {
        Delivery::Event(tx) => {
            assert_eq!(tx.hash, "0xlive");
            assert_eq!(tx.fields["nonce"], "0x7");
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    cancel.cancel();
}

#[tokio::test]
async fn block_transactions_follow_new_heads() {
    let url = mock_node(|req| match req["method"].as_str() {
        Some("eth_subscribe") => vec![
            reply(req, json!("0xh")),
            notify("0xh", head_json("0xaa")),
        ],
        Some("eth_getBlockByHash") => vec![reply(
            req,
            json!({
                "hash": "0xaa",
                "parentHash": "0x00",
                "number": "0x2a",
                "timestamp": "0x1",
                "transactions": [
                    {"hash": "0xt1", "blockHash": "0xaa"},
                    {"hash": "0xt2", "blockHash": "0xaa"},
                ],
            }),
        )],
        _ => vec![],
    })
    .await;
    let (source, cancel) = connect(&url).await;

    let mut txs = source.stream_block_transactions();
    let mut hashes = Vec::new();
    for _ in 0..2 {
        match within(txs.recv()).await {
            Delivery::Event(tx) => hashes.push(tx.hash),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }
    assert_eq!(hashes, ["0xt1", "0xt2"]);
    cancel.cancel();
}

#[tokio::test]
async fn trace_calls_follow_new_heads() {
    let url = mock_node(|req| match req["method"].as_str() {
        Some("eth_subscribe") => vec![
            reply(req, json!("0xh")),
            notify("0xh", head_json("0xaa")),
        ],
        Some("debug_traceBlockByHash") => {
            assert_eq!(req["params"][0], "0xaa");
            assert_eq!(req["params"][1], json!({"tracer": "callTracer"}));
            vec![reply(
                req,
                json!([
                    {"txHash": "0xt1", "result": {"type": "CALL", "to": "0xfeed"}},
                    {"result": {"type": "CALL"}},
                ]),
            )]
        }
        _ => vec![],
    })
    .await;
    let (source, cancel) = connect(&url).await;

    let mut traces = source.stream_trace_calls();
    match within(traces.recv()).await {
        Delivery::Event(trace) => {
            assert_eq!(trace.tx_hash, "0xt1");
            assert_eq!(trace.result["type"], "CALL");
            assert_eq!(trace.result["to"], "0xfeed");
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    cancel.cancel();
}

#[tokio::test]
async fn timed_out_request_is_forgotten() {
    let url = mock_node(|req| match req["method"].as_str() {
        Some("eth_blockNumber") => vec![reply(req, json!("0x2a"))],
        _ => vec![],
    })
    .await;
    let cancel = CancellationToken::new();
    let config = WsClientConfig {
        request_timeout: Some(Duration::from_millis(50)),
    };
    let client = WsRpcClient::connect(url, config, cancel.clone()).await.unwrap();

    let err = client.call::<Value>("eth_chainId", vec![]).await.unwrap_err();
    assert!(matches!(err, SourceError::Timeout { ms: 50 }));
    within(async {
        while client.in_flight() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let number: String = client.call("eth_blockNumber", vec![]).await.unwrap();
    assert_eq!(number, "0x2a");
    cancel.cancel();
}

#[tokio::test]
async fn cancellation_closes_the_connection() {
    let url = mock_node(|req| vec![reply(req, json!("0xs1"))]).await;
    let (source, cancel) = connect(&url).await;
    let mut headers = source.subscribe_headers().await.unwrap();

    cancel.cancel();
    assert!(!matches!(within(headers.recv()).await, Delivery::Event(_)));
    within(async {
        while source.client().is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
