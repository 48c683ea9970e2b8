//! WebSocket transport: JSON framing, authentication and presence over a real socket.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use batnav::game::engine::MatchEngine;
use batnav::network::{GameServer, Gateway, GatewayConfig, PairingQueue, ServerConfig, SessionRegistry};
use batnav::store::MemoryAccountStore;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    server: Arc<GameServer>,
    gateway: Arc<Gateway>,
    store: Arc<MemoryAccountStore>,
    url: String,
}

async fn spawn_server() -> Result<Running> {
    spawn_server_with(ServerConfig::default()).await
}

async fn spawn_server_with(config: ServerConfig) -> Result<Running> {
    let sessions = Arc::new(SessionRegistry::default());
    let store = Arc::new(MemoryAccountStore::new());
    let engine = Arc::new(MatchEngine::new(sessions.clone(), store.clone()));
    let gateway = Gateway::new(
        GatewayConfig::default(),
        sessions,
        store.clone(),
        Arc::new(PairingQueue::default()),
        engine,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let server = Arc::new(GameServer::new(config, gateway.clone()));
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    Ok(Running { server, gateway, store, url })
}

async fn send(ws: &mut Client, value: Value) -> Result<()> {
    ws.send(Message::Text(value.to_string())).await?;
    Ok(())
}

/// Next text frame whose `event` equals `event`.
async fn expect_event(ws: &mut Client, event: &str) -> Result<Value> {
    tokio::time::timeout(Duration::from_secs(5), next_event(ws, event))
        .await
        .map_err(|_| anyhow!("timed out waiting for {event}"))?
}

async fn next_event(ws: &mut Client, event: &str) -> Result<Value> {
    while let Some(frame) = ws.next().await {
        if let Message::Text(text) = frame? {
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == event {
                return Ok(value["data"].clone());
            }
        }
    }
    Err(anyhow!("socket closed before {event}"))
}

#[tokio::test]
async fn test_ping_over_socket() -> Result<()> {
    let running = spawn_server().await?;
    let (mut ws, _) = connect_async(running.url.as_str()).await?;

    send(&mut ws, json!({ "event": "ping", "data": { "timestamp": 7 } })).await?;
    let pong = expect_event(&mut ws, "pong").await?;
    assert_eq!(pong["timestamp"], 7);
    assert!(pong["serverTime"].as_u64().unwrap_or(0) > 0);

    running.server.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_gets_error() -> Result<()> {
    let running = spawn_server().await?;
    let (mut ws, _) = connect_async(running.url.as_str()).await?;

    ws.send(Message::Text("not json".into())).await?;
    let error = expect_event(&mut ws, "error").await?;
    assert_eq!(error["code"], "invalid_input");

    // The connection stays usable
    send(&mut ws, json!({ "event": "ping", "data": { "timestamp": 1 } })).await?;
    expect_event(&mut ws, "pong").await?;

    running.server.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_authenticate_and_presence() -> Result<()> {
    let running = spawn_server().await?;
    let account = running.store.create_account("alice", 1200).await;
    let token = running.gateway.sessions().create(account.id).await;

    let (mut ws, _) = connect_async(running.url.as_str()).await?;
    send(&mut ws, json!({ "event": "authenticate", "data": { "token": token.to_string() } })).await?;

    let auth = expect_event(&mut ws, "authentication").await?;
    assert_eq!(auth["success"], true);
    assert_eq!(auth["account"]["username"], "alice");
    assert_eq!(auth["account"]["rating"], 1200);

    let presence = expect_event(&mut ws, "user-connection").await?;
    assert_eq!(presence["username"], "alice");

    running.server.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_closing_socket_releases_session() -> Result<()> {
    let running = spawn_server().await?;
    let account = running.store.create_account("alice", 1000).await;
    let token = running.gateway.sessions().create(account.id).await;

    let (mut ws, _) = connect_async(running.url.as_str()).await?;
    send(&mut ws, json!({ "event": "authenticate", "data": { "token": token.to_string() } })).await?;
    expect_event(&mut ws, "authentication").await?;
    assert!(running.gateway.is_bound(&token).await);

    ws.close(None).await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while running.gateway.is_bound(&token).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(running.gateway.connection_count().await, 0);

    running.server.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_full_server_turns_clients_away() -> Result<()> {
    let running = spawn_server_with(ServerConfig { max_connections: 0, ..Default::default() }).await?;
    let (mut ws, _) = connect_async(running.url.as_str()).await?;

    let error = expect_event(&mut ws, "error").await?;
    assert_eq!(error["code"], "server_overloaded");
    assert_eq!(running.gateway.connection_count().await, 0);

    running.server.shutdown();
    Ok(())
}
