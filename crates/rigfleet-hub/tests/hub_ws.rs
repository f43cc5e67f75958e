//! End-to-end: a real hub on an ephemeral port, spoken to over WebSocket.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use rigfleet_core::protocol::CommandKind;
use rigfleet_core::{HubConfig, RigStatus};
use rigfleet_hub::dispatch::CommandError;
use rigfleet_hub::hub::Hub;
use rigfleet_hub::server;
use rigfleet_hub::storage::HubDatabase;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    hub: Hub,
    addr: SocketAddr,
    rig_id: String,
    rig_token: String,
    _shutdown: watch::Sender<bool>,
}

async fn start_hub() -> TestHub {
    let db = HubDatabase::open_in_memory().await.unwrap();
    let hub = Hub::new(HubConfig::default(), db).await.unwrap();
    let (rig, rig_token) = hub.provision_rig("garage-1").await.unwrap();

    let (shutdown, shutdown_rx) = watch::channel(false);
    hub.spawn_background(&shutdown_rx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(hub.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });

    TestHub {
        hub,
        addr,
        rig_id: rig.id,
        rig_token,
        _shutdown: shutdown,
    }
}

async fn connect(addr: SocketAddr, path: &str) -> Socket {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read dashboard pushes until one matches.
async fn wait_for_push(ws: &mut Socket, pred: impl Fn(&Value) -> bool) -> Value {
    loop {
        let push = next_json(ws).await;
        if pred(&push) {
            return push;
        }
    }
}

async fn authed_agent(t: &TestHub) -> Socket {
    let mut agent = connect(t.addr, "/ws/agent").await;
    send_json(&mut agent, json!({"type": "auth", "token": t.rig_token})).await;
    let ack = next_json(&mut agent).await;
    assert_eq!(ack["type"], "authenticated");
    assert_eq!(ack["rigId"], t.rig_id.as_str());
    agent
}

#[tokio::test]
async fn stop_miner_succeeds_then_reboot_fails_fast_on_disconnect() {
    let t = start_hub().await;
    let mut agent = authed_agent(&t).await;

    let dispatcher = t.hub.dispatcher().clone();
    let rig_id = t.rig_id.clone();
    let stop = tokio::spawn(async move {
        dispatcher
            .dispatch(&rig_id, CommandKind::StopMiner, Value::Null, None)
            .await
    });

    let cmd = next_json(&mut agent).await;
    assert_eq!(cmd["type"], "command");
    assert_eq!(cmd["command"], "stop_miner");
    send_json(
        &mut agent,
        json!({"type": "command_result", "commandId": cmd["id"], "success": true}),
    )
    .await;
    let reply = stop.await.unwrap().unwrap();
    assert!(reply.success);

    let dispatcher = t.hub.dispatcher().clone();
    let rig_id = t.rig_id.clone();
    let started = Instant::now();
    let reboot = tokio::spawn(async move {
        dispatcher
            .dispatch(
                &rig_id,
                CommandKind::Reboot,
                Value::Null,
                Some(Duration::from_secs(30)),
            )
            .await
    });
    let cmd = next_json(&mut agent).await;
    assert_eq!(cmd["command"], "reboot");

    // Rig drops off the network without answering.
    drop(agent);

    let result = tokio::time::timeout(Duration::from_secs(5), reboot)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(CommandError::Disconnected(_))));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(!t.hub.registry().is_online(&t.rig_id).await);
}

#[tokio::test]
async fn dashboard_sees_rig_come_online_and_report_stats() {
    let t = start_hub().await;
    let (token, _) = t.hub.jwt().issue_access_token("operator-1").unwrap();

    let mut dash = connect(t.addr, "/ws/dashboard").await;
    send_json(&mut dash, json!({"type": "auth", "token": token})).await;
    let ack = next_json(&mut dash).await;
    assert_eq!(ack["event"], "authenticated");
    let initial = next_json(&mut dash).await;
    assert_eq!(initial["event"], "rigs");
    assert_eq!(initial["data"][0]["status"], "OFFLINE");

    let mut agent = authed_agent(&t).await;
    let online = wait_for_push(&mut dash, |p| p["event"] == "rigs").await;
    assert_eq!(online["data"][0]["status"], "ONLINE");

    send_json(
        &mut agent,
        json!({
            "type": "stats",
            "gpus": [{"index": 0, "name": "RTX 3070", "temperature": 61.0, "hashrate": 61_000_000.0}],
            "miner": {"running": true, "name": "t-rex"}
        }),
    )
    .await;
    let stats = wait_for_push(&mut dash, |p| p["event"] == "stats").await;
    assert_eq!(stats["data"]["rigId"], t.rig_id.as_str());
    assert_eq!(stats["data"]["gpus"][0]["temperature"], 61.0);

    agent.close(None).await.unwrap();
    let offline = wait_for_push(&mut dash, |p| {
        p["event"] == "rigs" && p["data"][0]["status"] == "OFFLINE"
    })
    .await;
    assert_eq!(offline["data"].as_array().unwrap().len(), 1);
    assert_eq!(
        t.hub.telemetry().status(&t.rig_id).await,
        Some(RigStatus::Offline)
    );
}

#[tokio::test]
async fn agent_with_bad_token_is_told_and_closed() {
    let t = start_hub().await;
    let mut agent = connect(t.addr, "/ws/agent").await;
    send_json(&mut agent, json!({"type": "auth", "token": "rig_wrong"})).await;

    let err = next_json(&mut agent).await;
    assert_eq!(err, json!({"type": "error", "message": "invalid token"}));

    // The hub closes the socket after the error frame.
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = agent.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;
    assert!(end.is_ok());
    assert_eq!(t.hub.registry().connection_count().await, 0);
}
