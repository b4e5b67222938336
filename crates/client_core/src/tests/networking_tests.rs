use std::sync::Arc;

use serde_json::{json, Map};
use tokio::sync::mpsc;

use super::*;
use crate::{
    config::SessionSettings,
    test_support::{LinkController, RecordingLink, ScriptedRest},
    transport::{LinkId, SocketDriver},
};

struct Harness {
    networking: Networking<&'static str>,
    link: LinkController,
    inbound: mpsc::UnboundedReceiver<SocketInbound>,
    rest_events: mpsc::UnboundedReceiver<RestEvent>,
    rest: ScriptedRest,
}

impl Harness {
    fn new(rest: ScriptedRest) -> Self {
        let settings = SessionSettings::default();
        let (recording, link, link_events) = RecordingLink::new();
        let (rest_tx, rest_events) = mpsc::unbounded_channel();
        let networking = Networking::new(
            NetworkingContext::new(&settings),
            SubSocket::new(SocketDriver::new(Box::new(recording))),
            SubRest::new(Arc::new(rest.clone()), settings.user_agent.clone(), rest_tx),
            Arc::new(EndpointUrlBuilder),
        );
        Self {
            networking,
            link,
            inbound: spawn_decoder(link_events),
            rest_events,
            rest,
        }
    }

    async fn connected(rest: ScriptedRest) -> Self {
        let mut harness = Self::new(rest);
        let url = Url::parse("wss://node.example.com/atom/1:abc").expect("url");
        harness.networking.connect(&url, &[]);
        harness.link.accept();
        let opened = harness.next_socket_event().await.expect("open event");
        assert_eq!(opened.subject, NetworkingSubject::Socket(SocketEvent::Open));
        harness
    }

    async fn next_socket_event(&mut self) -> Option<NetworkingEvent<&'static str>> {
        let inbound = self.inbound.recv().await.expect("inbound");
        self.networking.handle_socket(inbound)
    }
}

fn typing_rpc() -> Call {
    Call::Rpc {
        kind: Some(ResponseKind::Custom("typing".into())),
        method: "typing".into(),
        params: Map::new(),
    }
}

#[tokio::test]
async fn rpc_ack_comes_back_with_context_exactly_once() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    let backsignal = harness
        .networking
        .send_with_context(typing_rpc(), "typing-ctx", Caching::Disabled)
        .expect("correlated call");
    assert_eq!(harness.networking.pending_requests(), 1);

    let frame = harness.link.sent_json().remove(0);
    assert_eq!(frame["method"], "typing");
    let ack = json!({ "id": frame["id"], "result": { "ok": true } }).to_string();

    harness.link.deliver(ack.clone());
    let event = harness.next_socket_event().await.expect("ack event");
    let expected = NetworkingSubject::Socket(SocketEvent::Payload(SocketPayload::RpcAck {
        kind: ResponseKind::Custom("typing".into()),
        status: RestResponseStatus::Success,
        result: json!({ "ok": true }),
    }));
    assert_eq!(event.context, Some("typing-ctx"));
    assert_eq!(event.subject, expected);
    assert_eq!(backsignal.await.expect("backsignal"), expected);

    harness.link.deliver(ack);
    assert!(harness.next_socket_event().await.is_none());
    assert_eq!(harness.networking.pending_requests(), 0);
}

#[tokio::test]
async fn uncorrelated_rpc_ack_is_dropped() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    let call = Call::Rpc {
        kind: None,
        method: "ping".into(),
        params: Map::new(),
    };
    assert!(harness.networking.send(call, Caching::Disabled).is_none());
    assert_eq!(harness.networking.pending_requests(), 0);

    harness.link.deliver(r#"{"id":"1","result":null}"#);
    assert!(harness.next_socket_event().await.is_none());
}

#[tokio::test]
async fn disconnect_cancels_pending_socket_calls() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    let backsignal = harness
        .networking
        .send(typing_rpc(), Caching::Disabled)
        .expect("correlated call");

    harness.networking.disconnect();

    assert_eq!(harness.networking.pending_requests(), 0);
    assert!(backsignal.await.is_err());
    assert_eq!(harness.link.disconnects(), 1);
}

#[tokio::test]
async fn server_close_purges_socket_calls_and_reports_reconnect_policy() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    let backsignal = harness
        .networking
        .send(typing_rpc(), Caching::Disabled)
        .expect("correlated call");

    harness.link.close_from_server(1000, "you are in blacklist", None);
    let event = harness.next_socket_event().await.expect("close event");

    assert_eq!(
        event.subject,
        NetworkingSubject::Socket(SocketEvent::Close {
            code: 1000,
            reason: "you are in blacklist".into(),
            error: None,
            reconnect: ReconnectBehavior::for_code(1000),
        })
    );
    assert!(backsignal.await.is_err());
}

#[tokio::test]
async fn events_from_a_replaced_link_are_ignored() {
    let mut harness = Harness::new(ScriptedRest::new());
    let url = Url::parse("wss://node.example.com/atom/1:abc").expect("url");
    harness.networking.connect(&url, &[]);
    harness.networking.connect(&url, &[]);
    assert_eq!(harness.link.current(), Some(LinkId(2)));

    harness.link.deliver_on(LinkId(1), r#"{"type":"atom/me.id","data":"1.2"}"#);
    assert!(harness.next_socket_event().await.is_none());

    harness.link.deliver_on(LinkId(2), r#"{"type":"atom/me.id","data":"1.2"}"#);
    let event = harness.next_socket_event().await.expect("current link event");
    assert!(matches!(
        event.subject,
        NetworkingSubject::Socket(SocketEvent::Payload(SocketPayload::Atom { ref kind, .. })) if kind == "atom/me.id"
    ));
}

#[tokio::test]
async fn paused_listening_holds_frames_until_resumed() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    harness.networking.pause_listening();

    harness.link.deliver(r#"{"name":"typing_start"}"#);
    harness.link.deliver(r#"{"name":"typing_stop"}"#);
    assert!(harness.next_socket_event().await.is_none());
    assert!(harness.next_socket_event().await.is_none());

    let resumed = harness.networking.resume_listening(true);
    let names: Vec<_> = resumed
        .into_iter()
        .filter_map(|event| match event.subject {
            NetworkingSubject::Socket(SocketEvent::Payload(SocketPayload::Legacy { name, .. })) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["typing_start", "typing_stop"]);

    harness.networking.pause_listening();
    harness.link.deliver(r#"{"name":"typing_start"}"#);
    assert!(harness.next_socket_event().await.is_none());
    assert!(harness.networking.resume_listening(false).is_empty());
}

#[tokio::test]
async fn rest_response_comes_back_with_context() {
    let rest = ScriptedRest::new().route(
        "/config/abc",
        RestResponseStatus::Success,
        json!({ "site_id": 7 }),
    );
    let mut harness = Harness::new(rest);
    let call = Call::Rest {
        kind: Some(ResponseKind::ConnectionConfig),
        target: RestTarget::Url("https://sdk.jivosite.com/config/abc".into()),
        options: RestOptions::get(),
    };

    let backsignal = harness
        .networking
        .send_with_context(call, "config-ctx", Caching::Auto)
        .expect("correlated call");
    let rest_event = harness.rest_events.recv().await.expect("rest event");
    let event = harness.networking.handle_rest(rest_event).expect("delivered");

    assert_eq!(event.context, Some("config-ctx"));
    let NetworkingSubject::Rest(response) = event.subject else {
        panic!("expected a rest subject");
    };
    assert_eq!(response.kind, ResponseKind::ConnectionConfig);
    assert_eq!(response.status, RestResponseStatus::Success);
    assert_eq!(response.body, json!({ "site_id": 7 }));
    assert!(backsignal.await.is_ok());

    let requests = harness.rest.requests();
    let headers = &requests[0].headers;
    assert!(headers.iter().any(|(name, _)| name == "User-Agent"));
    let request_id = headers
        .iter()
        .find(|(name, _)| name == "x-request-id")
        .map(|(_, value)| value.clone())
        .expect("x-request-id header");
    assert_eq!(request_id.len(), 13);
}

#[tokio::test]
async fn uncorrelated_rest_response_is_dropped() {
    let mut harness = Harness::new(ScriptedRest::new());
    let call = Call::Rest {
        kind: None,
        target: RestTarget::Url("https://api.jivosite.com/telemetry".into()),
        options: RestOptions::post_json(json!({})),
    };

    assert!(harness.networking.send(call, Caching::Auto).is_none());
    let rest_event = harness.rest_events.recv().await.expect("rest event");
    assert!(harness.networking.handle_rest(rest_event).is_none());
}

#[tokio::test]
async fn chat_server_target_needs_a_learned_endpoint() {
    let mut harness = Harness::new(ScriptedRest::new());
    let register = || Call::Rest {
        kind: Some(ResponseKind::PushRegistration),
        target: RestTarget::chat_server("/client/1/abc/device"),
        options: RestOptions::post_json(json!({})),
    };

    assert!(harness.networking.send(register(), Caching::Auto).is_none());
    assert_eq!(harness.networking.pending_requests(), 0);

    harness
        .networking
        .set_endpoint(Some("node3.jivosite.com:8443".into()));
    assert!(harness.networking.send(register(), Caching::Auto).is_some());
    let rest_event = harness.rest_events.recv().await.expect("rest event");
    assert_eq!(
        rest_event.url.as_str(),
        "https://node3.jivosite.com:8443/client/1/abc/device"
    );
    assert_eq!(harness.rest.requests().len(), 1);
}

#[tokio::test]
async fn cancel_active_requests_purges_rest_calls_only() {
    let mut harness = Harness::connected(ScriptedRest::new()).await;
    let socket_call = harness.networking.send(typing_rpc(), Caching::Disabled);
    let rest_call = harness.networking.send(
        Call::Rest {
            kind: Some(ResponseKind::Custom("history".into())),
            target: RestTarget::Url("https://api.jivosite.com/history".into()),
            options: RestOptions::get(),
        },
        Caching::Auto,
    );
    assert!(socket_call.is_some());
    assert_eq!(harness.networking.pending_requests(), 2);

    harness.networking.cancel_active_requests();

    assert_eq!(harness.networking.pending_requests(), 1);
    assert!(rest_call.expect("rest backsignal").await.is_err());
}
