use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use shared::protocol::{AtomEnvelope, RestResponseStatus};
use tracing::{debug, warn};
use url::Url;

pub mod context;
pub mod correlation;
pub mod slicer;
pub mod sub_apns;
pub mod sub_rest;
pub mod sub_socket;

pub use context::{
    EndpointUrlBuilder, NetworkingContext, NetworkingDomain, UrlBuilder, UrlScope, ZoneId,
};
pub use correlation::{Backsignal, Channel, CorrelationTable, RequestId, RequestMeta};
pub use slicer::Slicer;
pub use sub_apns::{detect_target, PushPayload, PushTarget, SubApns};
pub use sub_rest::{RestEvent, RestOptions, SubRest};
pub use sub_socket::{spawn_decoder, SocketInbound, SubSocket, SubSocketEvent, SubSocketPayload};

use crate::{
    transport::{LinkState, ReconnectBehavior},
    types::AppState,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    ConnectionConfig,
    PushRegistration,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caching {
    #[default]
    Auto,
    Disabled,
}

impl Caching {
    fn supports_caching(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestTarget {
    Url(String),
    Build { scope: UrlScope, path: String },
}

impl RestTarget {
    pub fn chat_server(path: impl Into<String>) -> Self {
        Self::Build {
            scope: UrlScope::ChatServer,
            path: path.into(),
        }
    }

    pub fn api(path: impl Into<String>) -> Self {
        Self::specific("api", path)
    }

    pub fn telephony(path: impl Into<String>) -> Self {
        Self::specific("telephony", path)
    }

    pub fn telemetry(path: impl Into<String>) -> Self {
        Self::specific("telemetry", path)
    }

    fn specific(label: &str, path: impl Into<String>) -> Self {
        Self::Build {
            scope: UrlScope::Specific(label.to_owned()),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Raw(String),
    Legacy {
        name: String,
        params: Map<String, Value>,
    },
    Rpc {
        kind: Option<ResponseKind>,
        method: String,
        params: Map<String, Value>,
    },
    Atom(AtomEnvelope),
    Rest {
        kind: Option<ResponseKind>,
        target: RestTarget,
        options: RestOptions,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPayload {
    Legacy {
        name: String,
        body: Value,
    },
    Rpc {
        method: String,
        params: Value,
    },
    Atom {
        kind: String,
        body: Value,
    },
    RpcAck {
        kind: ResponseKind,
        status: RestResponseStatus,
        result: Value,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Payload(SocketPayload),
    Close {
        code: u16,
        reason: String,
        error: Option<String>,
        reconnect: ReconnectBehavior,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub kind: ResponseKind,
    pub url: Url,
    pub status: RestResponseStatus,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkingSubject {
    Socket(SocketEvent),
    Rest(RestResponse),
    Apns(PushPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkingEvent<C> {
    pub subject: NetworkingSubject,
    pub context: Option<C>,
}

impl<C> NetworkingEvent<C> {
    fn bare(subject: NetworkingSubject) -> Self {
        Self {
            subject,
            context: None,
        }
    }
}

/// Single way in and out of the network for the session: socket, REST and
/// push traffic go through here, and responses to correlated calls come back
/// carrying the context they were sent with.
pub struct Networking<C> {
    context: NetworkingContext,
    sub_socket: SubSocket,
    sub_rest: SubRest,
    sub_apns: SubApns,
    url_builder: Arc<dyn UrlBuilder>,
    endpoint: Option<String>,
    correlations: CorrelationTable<C>,
}

impl<C> Networking<C> {
    pub fn new(
        context: NetworkingContext,
        sub_socket: SubSocket,
        sub_rest: SubRest,
        url_builder: Arc<dyn UrlBuilder>,
    ) -> Self {
        Self {
            context,
            sub_socket,
            sub_rest,
            sub_apns: SubApns::default(),
            url_builder,
            endpoint: None,
            correlations: CorrelationTable::new(),
        }
    }

    pub fn context(&self) -> &NetworkingContext {
        &self.context
    }

    pub fn primary_domain(&self) -> String {
        self.context.primary_domain()
    }

    pub fn set_preferred_domain(&mut self, domain: NetworkingDomain) {
        debug!(?domain, "networking: preferred domain");
        self.context.set_preferred_domain(domain);
    }

    pub fn base_url(&self, module: &str) -> Option<Url> {
        self.context.base_url(module)
    }

    /// The chat-server host learned from the connection config, as `host[:port]`.
    pub fn set_endpoint(&mut self, endpoint: Option<String>) {
        self.endpoint = endpoint.filter(|endpoint| !endpoint.is_empty());
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn is_connecting(&self) -> bool {
        self.sub_socket.state() == LinkState::Connecting
    }

    pub fn is_connected(&self) -> bool {
        self.sub_socket.state() == LinkState::Connected
    }

    pub fn connect(&mut self, url: &Url, headers: &[(String, String)]) {
        self.correlations.purge(Channel::Socket);
        self.sub_socket.connect(url, headers);
    }

    /// Drops the socket silently. Pending socket calls are cancelled.
    pub fn disconnect(&mut self) {
        self.sub_socket.disconnect();
        self.correlations.purge(Channel::Socket);
    }

    pub fn start_caching(&mut self) {
        self.sub_socket.start_caching();
    }

    pub fn stop_caching(&mut self, flush: bool) -> usize {
        self.sub_socket.stop_caching(flush)
    }

    pub fn is_caching(&self) -> bool {
        self.sub_socket.is_caching()
    }

    pub fn pause_listening(&mut self) {
        self.sub_socket.pause_listening();
    }

    pub fn resume_listening(&mut self, flush: bool) -> Vec<NetworkingEvent<C>> {
        self.sub_socket
            .resume_listening(flush)
            .into_iter()
            .filter_map(|event| self.proceed_socket(event))
            .collect()
    }

    pub fn cancel_active_requests(&mut self) {
        self.sub_rest.cancel_active_requests();
        self.correlations.purge(Channel::Rest);
    }

    pub fn pending_requests(&self) -> usize {
        self.correlations.len()
    }

    pub fn send(&mut self, call: Call, caching: Caching) -> Option<Backsignal> {
        self.dispatch(call, None, caching)
    }

    /// Like `send`, but the response to a correlated call comes back with
    /// `context` attached.
    pub fn send_with_context(&mut self, call: Call, context: C, caching: Caching) -> Option<Backsignal> {
        self.dispatch(call, Some(context), caching)
    }

    fn dispatch(&mut self, call: Call, context: Option<C>, caching: Caching) -> Option<Backsignal> {
        let supports_caching = caching.supports_caching();
        match call {
            Call::Raw(text) => {
                self.sub_socket.send_raw(text, supports_caching);
                None
            }
            Call::Legacy { name, params } => {
                self.sub_socket.send_legacy(&name, params, supports_caching);
                None
            }
            Call::Atom(atom) => {
                self.sub_socket.send_atom(&atom, supports_caching);
                None
            }
            Call::Rpc {
                kind,
                method,
                params,
            } => {
                let Some(kind) = kind else {
                    self.sub_socket.send_rpc(None, &method, params, supports_caching);
                    return None;
                };
                let request_id = RequestId::generate();
                let (meta, backsignal) = RequestMeta::new(kind, Channel::Socket, context);
                self.correlations.insert(request_id, meta);
                self.sub_socket
                    .send_rpc(Some(request_id), &method, params, supports_caching);
                Some(backsignal)
            }
            Call::Rest {
                kind,
                target,
                options,
            } => {
                let Some(url) = self.resolve(&target) else {
                    warn!(?target, "networking: cannot resolve url, call abandoned");
                    return None;
                };
                let request_id = RequestId::generate();
                let backsignal = kind.map(|kind| {
                    let (meta, backsignal) = RequestMeta::new(kind, Channel::Rest, context);
                    self.correlations.insert(request_id, meta);
                    backsignal
                });
                self.sub_rest.request(request_id, url, options);
                backsignal
            }
        }
    }

    fn resolve(&self, target: &RestTarget) -> Option<Url> {
        match target {
            RestTarget::Url(raw) => Url::parse(raw)
                .map_err(|err| warn!(url = %raw, error = %err, "networking: invalid url"))
                .ok(),
            RestTarget::Build { scope, path } => {
                let base = self.context.base_url("api");
                self.url_builder
                    .build(base.as_ref(), self.endpoint.as_deref(), scope, path)
            }
        }
    }

    pub fn handle_socket(&mut self, inbound: SocketInbound) -> Option<NetworkingEvent<C>> {
        let event = self.sub_socket.accept(inbound)?;
        self.proceed_socket(event)
    }

    fn proceed_socket(&mut self, event: SubSocketEvent) -> Option<NetworkingEvent<C>> {
        let event = match event {
            SubSocketEvent::Open => SocketEvent::Open,
            SubSocketEvent::Close {
                code,
                reason,
                error,
                reconnect,
            } => {
                self.correlations.purge(Channel::Socket);
                SocketEvent::Close {
                    code,
                    reason,
                    error,
                    reconnect,
                }
            }
            SubSocketEvent::Payload(SubSocketPayload::RpcAck {
                request_id,
                status,
                result,
            }) => {
                let Some(meta) = self.correlations.take(&request_id) else {
                    debug!(%request_id, "networking: ack nobody waits for dropped");
                    return None;
                };
                let subject = NetworkingSubject::Socket(SocketEvent::Payload(SocketPayload::RpcAck {
                    kind: meta.kind.clone(),
                    status,
                    result,
                }));
                return Some(meta.deliver(subject));
            }
            SubSocketEvent::Payload(payload) => SocketEvent::Payload(match payload {
                SubSocketPayload::Legacy { name, body } => SocketPayload::Legacy { name, body },
                SubSocketPayload::Rpc { method, params } => SocketPayload::Rpc { method, params },
                SubSocketPayload::Atom { kind, body } => SocketPayload::Atom { kind, body },
                SubSocketPayload::Unknown(json) => SocketPayload::Unknown(json),
                SubSocketPayload::RpcAck { .. } => return None,
            }),
        };
        Some(NetworkingEvent::bare(NetworkingSubject::Socket(event)))
    }

    /// Push notifications are never correlated.
    pub fn handle_push(
        &self,
        body: Value,
        app_state: AppState,
        delivered_at: DateTime<Utc>,
    ) -> NetworkingEvent<C> {
        let payload = self.sub_apns.accept(body, app_state, delivered_at);
        NetworkingEvent::bare(NetworkingSubject::Apns(payload))
    }

    pub fn handle_rest(&mut self, event: RestEvent) -> Option<NetworkingEvent<C>> {
        let Some(meta) = self.correlations.take(&event.request_id) else {
            debug!(request_id = %event.request_id, url = %event.url, "networking: response nobody waits for dropped");
            return None;
        };
        let subject = NetworkingSubject::Rest(RestResponse {
            kind: meta.kind.clone(),
            url: event.url,
            status: event.status,
            body: event.body,
        });
        Some(meta.deliver(subject))
    }
}

#[cfg(test)]
#[path = "../tests/networking_tests.rs"]
mod tests;
