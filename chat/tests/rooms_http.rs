mod common;

use common::*;
use futures::SinkExt;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn post_room(
    client: &reqwest::Client,
    addr: std::net::SocketAddr,
    token: &str,
    action: &str,
    room: &str,
) -> reqwest::Response {
    client
        .post(format!("http://{}/api/rooms/{}", addr, action))
        .bearer_auth(token)
        .json(&json!({ "room": room }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn join_creates_once_and_delete_is_creator_only() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    register(&client, addr, "Alice", "alice").await;
    register(&client, addr, "Bob", "bob").await;
    let alice = login(&client, addr, "alice").await;
    let bob = login(&client, addr, "bob").await;

    let resp = post_room(&client, addr, &alice, "join", "general").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], json!(true));
    let room_id = body["room_id"].as_i64().unwrap();

    let body: Value = post_room(&client, addr, &bob, "join", "general")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["created"], json!(false));
    assert_eq!(body["room_id"].as_i64().unwrap(), room_id);

    // bob listens live on the room
    let mut bob_ws = connect_ws(addr, &bob).await;
    let hub = state.service.hub().clone();
    eventually(|| hub.connection_count() == 1).await;
    bob_ws
        .send(tokio_tungstenite::tungstenite::Message::Text(
            json!({"event": "join_room", "data": {"room": "general"}}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut bob_ws).await,
        json!({"event": "message", "data": {"msg": "Bob joined general"}})
    );
    assert_eq!(hub.subscribers(room_id).len(), 1);

    let resp = post_room(&client, addr, &bob, "delete", "general").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_creator");

    let resp = post_room(&client, addr, &alice, "delete", "general").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        next_event(&mut bob_ws).await,
        json!({"event": "room_deleted", "data": {"room": "general"}})
    );
    assert!(hub.subscribers(room_id).is_empty());

    let resp = client
        .get(format!("http://{}/api/rooms/general/history", addr))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = post_room(&client, addr, &alice, "delete", "general").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.abort();
}

#[tokio::test]
async fn leave_drops_membership_only() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    register(&client, addr, "Alice", "alice").await;
    let alice = login(&client, addr, "alice").await;

    post_room(&client, addr, &alice, "join", "general").await;
    let resp = post_room(&client, addr, &alice, "leave", "general").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let listing: Value = client
        .get(format!("http://{}/api/rooms", addr))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["rooms"].as_array().unwrap().len(), 1);
    assert_eq!(listing["rooms"][0]["room_name"], "general");
    assert!(listing["joined"].as_array().unwrap().is_empty());

    let resp = post_room(&client, addr, &alice, "join", "   ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    server.abort();
}

#[tokio::test]
async fn credentials_and_tokens() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    register(&client, addr, "Alice", "alice").await;
    let resp = client
        .post(format!("http://{}/api/register", addr))
        .json(&json!({"full_name": "Other Alice", "username": "alice", "password": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "duplicate_handle");

    let resp = client
        .post(format!("http://{}/api/register", addr))
        .json(&json!({"full_name": "Nobody", "username": "", "password": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    for (handle, password) in [("alice", "wrong"), ("nobody", "hunter22")] {
        let resp = client
            .post(format!("http://{}/api/login", addr))
            .json(&json!({"username": handle, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid_credentials");
    }

    let resp = client
        .get(format!("http://{}/api/rooms", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = client
        .get(format!("http://{}/api/me", addr))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let token = login(&client, addr, "alice").await;
    let me: Value = client
        .get(format!("http://{}/api/me", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["full_name"], "Alice");
    assert_eq!(me["login_handle"], "alice");
    assert!(me.get("password_hash").is_none());

    server.abort();
}
