use std::time::Duration;

use axum::{
    extract::{ws::Message as ServerMessage, Path as RoutePath, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::{json, Map, Value};
use shared::protocol::{close_code, RestResponseStatus};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

use super::*;
use crate::test_support::RecordingLink;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn reconnect_buckets() {
    for code in [1005, 1006, 1011, 1012, 1013, 1014, 1015] {
        assert_eq!(ReconnectBehavior::for_code(code), ReconnectBehavior::SoonIncremental);
    }
    for code in [1002, 1003, 1007, 1009, 1010] {
        assert_eq!(ReconnectBehavior::for_code(code), ReconnectBehavior::OnlyManual);
    }
    for code in [0, 1, 1000, 1008, 1200, 4000] {
        assert_eq!(ReconnectBehavior::for_code(code), ReconnectBehavior::NextDay);
    }
}

fn open_driver() -> (SocketDriver, crate::test_support::LinkController) {
    let (link, controller, _events) = RecordingLink::new();
    let mut driver = SocketDriver::new(Box::new(link));
    driver.open(&Url::parse("wss://chat.example.com/atom").expect("url"), &[]);
    (driver, controller)
}

#[test]
fn flushed_cache_keeps_order() {
    let (mut driver, controller) = open_driver();
    driver.start_caching();
    for n in 0..5 {
        driver.send_plain(format!("frame-{n}"), true);
    }
    assert!(controller.sent().is_empty());

    assert_eq!(driver.stop_caching(true), 5);
    assert_eq!(
        controller.sent(),
        (0..5).map(|n| format!("frame-{n}")).collect::<Vec<_>>()
    );
    assert!(!driver.is_caching());
}

#[test]
fn dropped_cache_sends_nothing() {
    let (mut driver, controller) = open_driver();
    driver.start_caching();
    driver.send_plain("held".into(), true);
    driver.send_plain("urgent".into(), false);

    assert_eq!(driver.stop_caching(false), 1);
    assert_eq!(controller.sent(), vec!["urgent".to_owned()]);
    assert_eq!(driver.stop_caching(true), 0);
    assert_eq!(controller.sent().len(), 1);
}

#[test]
fn rpc_ids_increase_and_frames_are_enveloped() {
    let (mut driver, controller) = open_driver();
    let first = driver.call("chat.open", Map::new(), false);
    let mut body = Map::new();
    body.insert("text".into(), json!("hi"));
    driver.send_command("typing", body, false);
    let second = driver.call("chat.close", Map::new(), false);

    assert_eq!((first, second), (1, 2));
    let frames = controller.sent_json();
    assert_eq!(frames[0], json!({"id": "1", "method": "chat.open", "params": {}}));
    assert_eq!(frames[1], json!({"text": "hi", "name": "typing"}));
    assert_eq!(frames[2]["id"], "2");
}

async fn spawn_ws_server(
    behaviour: fn(axum::extract::ws::WebSocket) -> futures::future::BoxFuture<'static, ()>,
) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        "/atom/*rest",
        get(move |ws: WebSocketUpgrade| async move { ws.on_upgrade(behaviour) }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://{addr}/atom/42:acme")
}

fn echo_then_close(socket: axum::extract::ws::WebSocket) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(async move {
        let (mut sender, mut receiver) = socket.split();
        while let Some(Ok(message)) = receiver.next().await {
            if let ServerMessage::Text(text) = message {
                if text == "bye" {
                    let _ = sender
                        .send(ServerMessage::Close(Some(axum::extract::ws::CloseFrame {
                            code: 1000,
                            reason: "you are in blacklist".into(),
                        })))
                        .await;
                    break;
                }
                let _ = sender.send(ServerMessage::Text(format!("echo:{text}"))).await;
            }
        }
    })
}

fn silent(socket: axum::extract::ws::WebSocket) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(async move {
        let (_sender, mut receiver) = socket.split();
        while let Some(Ok(_)) = receiver.next().await {}
    })
}

fn keepalive(ping_ms: u64, pong_ms: u64) -> KeepAlive {
    KeepAlive {
        ping_interval: Duration::from_millis(ping_ms),
        pong_timeout: Duration::from_millis(pong_ms),
        ping_payload: " ".into(),
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("link event in time")
        .expect("link event")
}

#[tokio::test]
async fn websocket_link_reports_open_messages_and_server_close() {
    let url = spawn_ws_server(echo_then_close).await;
    let (sink, mut events) = mpsc::unbounded_channel();
    let mut connection = WsConnection::new(keepalive(60_000, 60_000), sink);

    let link = connection.open(
        &Url::parse(&url).expect("url"),
        &[("User-Agent".into(), "sdk-session/test".into())],
    );
    assert_eq!(next_event(&mut events).await, LinkEvent::Open { link });
    assert_eq!(connection.state(), LinkState::Connected);

    assert!(connection.transmit("hello".into()));
    assert_eq!(
        next_event(&mut events).await,
        LinkEvent::Message {
            link,
            text: "echo:hello".into()
        }
    );

    connection.transmit("bye".into());
    match next_event(&mut events).await {
        LinkEvent::Close {
            link: closed,
            code,
            reason,
            error,
        } => {
            assert_eq!(closed, link);
            assert_eq!(code, close_code::SESSION_END);
            assert_eq!(reason, "you are in blacklist");
            assert!(error.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn websocket_link_closes_on_missing_pong() {
    let url = spawn_ws_server(silent).await;
    let (sink, mut events) = mpsc::unbounded_channel();
    let mut connection = WsConnection::new(keepalive(50, 100), sink);

    let link = connection.open(&Url::parse(&url).expect("url"), &[]);
    assert_eq!(next_event(&mut events).await, LinkEvent::Open { link });
    match next_event(&mut events).await {
        LinkEvent::Close { code, .. } => assert_eq!(code, close_code::MISSING_PONG),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(connection.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn websocket_link_reports_unreachable_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (sink, mut events) = mpsc::unbounded_channel();
    let mut connection = WsConnection::new(keepalive(60_000, 60_000), sink);
    let link = connection.open(&Url::parse(&format!("ws://{addr}/atom/1:x")).expect("url"), &[]);

    match next_event(&mut events).await {
        LinkEvent::Close {
            link: closed,
            code,
            error,
            ..
        } => {
            assert_eq!(closed, link);
            assert_eq!(code, close_code::NOT_REACHABLE);
            assert!(error.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_detaches_without_close_event() {
    let url = spawn_ws_server(silent).await;
    let (sink, mut events) = mpsc::unbounded_channel();
    let mut connection = WsConnection::new(keepalive(60_000, 60_000), sink);

    let link = connection.open(&Url::parse(&url).expect("url"), &[]);
    assert_eq!(next_event(&mut events).await, LinkEvent::Open { link });
    connection.disconnect();

    assert_eq!(connection.state(), LinkState::Disconnected);
    assert!(!connection.transmit("late".into()));
    assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
}

async fn config_handler(RoutePath(channel): RoutePath<String>) -> impl IntoResponse {
    if channel == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "no such channel"})));
    }
    (
        StatusCode::OK,
        Json(json!({"site_id": 42, "chatserver_host": "chat.example.com:443"})),
    )
}

async fn device_handler(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let client_id = headers
        .get("x-jv-client-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    Json(json!({"client": client_id, "echo": body}))
}

async fn spawn_rest_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/config/:channel", get(config_handler))
        .route("/client/:site/:channel/device", post(device_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn rest_request(url: String) -> RestRequest {
    RestRequest {
        url: Url::parse(&url).expect("url"),
        method: RestMethod::Get,
        headers: Vec::new(),
        query: Vec::new(),
        body: RestBody::Omit,
    }
}

#[tokio::test]
async fn http_driver_maps_status_and_body() {
    let base = spawn_rest_server().await;
    let driver = HttpRestDriver::new();

    let ok = driver.execute(rest_request(format!("{base}/config/acme"))).await;
    assert_eq!(ok.status, RestResponseStatus::Success);
    assert_eq!(ok.body["site_id"], 42);

    let missing = driver.execute(rest_request(format!("{base}/config/missing"))).await;
    assert_eq!(missing.status, RestResponseStatus::NotFound);
    assert_eq!(missing.body["error"], "no such channel");
}

#[tokio::test]
async fn http_driver_sends_headers_and_json_body() {
    let base = spawn_rest_server().await;
    let driver = HttpRestDriver::new();
    let mut request = rest_request(format!("{base}/client/42/acme/device"));
    request.method = RestMethod::Post;
    request.headers = vec![("x-jv-client-id".into(), "17.abc".into())];
    request.body = RestBody::Json(json!({"device_id": "d1", "platform": "ios"}));

    let result = driver.execute(request).await;
    assert_eq!(result.status, RestResponseStatus::Success);
    assert_eq!(result.body["client"], "17.abc");
    assert_eq!(result.body["echo"]["platform"], "ios");
}

#[tokio::test]
async fn http_driver_turns_transport_failure_into_unknown_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let result = HttpRestDriver::new()
        .execute(rest_request(format!("http://{addr}/config/acme")))
        .await;
    assert_eq!(result.status, RestResponseStatus::Unknown(0));
    assert_eq!(result.body, Value::Null);
}
