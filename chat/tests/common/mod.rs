#![allow(dead_code)]

use futures::StreamExt;
use room_chat::api::{build_router, AppState};
use room_chat::config::Config;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config::for_data_dir(addr.to_string(), tmp.path().to_path_buf());
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

pub async fn register(client: &reqwest::Client, addr: SocketAddr, name: &str, handle: &str) {
    let resp = client
        .post(format!("http://{}/api/register", addr))
        .json(&serde_json::json!({"full_name": name, "username": handle, "password": "hunter22"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
}

pub async fn login(client: &reqwest::Client, addr: SocketAddr, handle: &str) -> String {
    let resp = client
        .post(format!("http://{}/api/login", addr))
        .json(&serde_json::json!({"username": handle, "password": "hunter22"}))
        .send()
        .await
        .unwrap();
    if !resp.status().is_success() {
        panic!("login failed {}", resp.text().await.unwrap());
    }
    resp.json::<serde_json::Value>().await.unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string()
}

pub async fn connect_ws(addr: SocketAddr, token: &str) -> Ws {
    let mut req = format!("ws://{}/ws", addr).into_client_request().unwrap();
    req.headers_mut().append(
        "Authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    let (ws, _) = connect_async(req).await.unwrap();
    ws
}

/// Next JSON event from the socket, skipping control frames.
pub async fn next_event(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .unwrap();
        if let WsMessage::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

/// Assert that nothing arrives on the socket for a short while.
pub async fn assert_silent(ws: &mut Ws) {
    assert!(tokio::time::timeout(Duration::from_millis(200), ws.next())
        .await
        .is_err());
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
