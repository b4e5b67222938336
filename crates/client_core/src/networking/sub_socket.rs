use std::collections::HashMap;

use serde_json::{Map, Value};
use shared::{
    error::ProtocolError,
    protocol::{AtomEnvelope, InboundFrame, RestResponseStatus},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::correlation::RequestId;
use crate::transport::{LinkEvent, LinkId, LinkState, ReconnectBehavior, SocketDriver};

/// Link event after the decoding stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketInbound {
    Open {
        link: LinkId,
    },
    Frame {
        link: LinkId,
        frame: InboundFrame,
    },
    Close {
        link: LinkId,
        code: u16,
        reason: String,
        error: Option<String>,
    },
}

impl SocketInbound {
    pub fn link(&self) -> LinkId {
        match self {
            Self::Open { link } | Self::Frame { link, .. } | Self::Close { link, .. } => *link,
        }
    }
}

/// Parses raw link events on a task of its own and forwards them, in arrival
/// order, to the worker.
pub fn spawn_decoder(
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
) -> mpsc::UnboundedReceiver<SocketInbound> {
    let (decoded, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = link_events.recv().await {
            let inbound = match event {
                LinkEvent::Open { link } => SocketInbound::Open { link },
                LinkEvent::Message { link, text } => match InboundFrame::decode(&text) {
                    Ok(frame) => SocketInbound::Frame { link, frame },
                    Err(ProtocolError::Keepalive) => continue,
                    Err(err) => {
                        warn!(%link, error = %err, "socket: undecodable frame dropped");
                        continue;
                    }
                },
                LinkEvent::Close {
                    link,
                    code,
                    reason,
                    error,
                } => SocketInbound::Close {
                    link,
                    code,
                    reason,
                    error,
                },
            };
            if decoded.send(inbound).is_err() {
                break;
            }
        }
    });
    receiver
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubSocketPayload {
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
        request_id: RequestId,
        status: RestResponseStatus,
        result: Value,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubSocketEvent {
    Open,
    Payload(SubSocketPayload),
    Close {
        code: u16,
        reason: String,
        error: Option<String>,
        reconnect: ReconnectBehavior,
    },
}

pub struct SubSocket {
    driver: SocketDriver,
    current_link: Option<LinkId>,
    rpc_requests: HashMap<u64, RequestId>,
    listening: bool,
    held: Vec<SocketInbound>,
}

impl SubSocket {
    pub fn new(driver: SocketDriver) -> Self {
        Self {
            driver,
            current_link: None,
            rpc_requests: HashMap::new(),
            listening: true,
            held: Vec::new(),
        }
    }

    pub fn connect(&mut self, url: &Url, headers: &[(String, String)]) -> LinkId {
        self.rpc_requests.clear();
        self.held.clear();
        let link = self.driver.open(url, headers);
        self.current_link = Some(link);
        link
    }

    pub fn disconnect(&mut self) {
        self.driver.disconnect();
        self.current_link = None;
        self.rpc_requests.clear();
        self.held.clear();
    }

    pub fn state(&self) -> LinkState {
        self.driver.state()
    }

    pub fn start_caching(&mut self) {
        self.driver.start_caching();
    }

    pub fn stop_caching(&mut self, flush: bool) -> usize {
        self.driver.stop_caching(flush)
    }

    pub fn is_caching(&self) -> bool {
        self.driver.is_caching()
    }

    pub fn pending_rpcs(&self) -> usize {
        self.rpc_requests.len()
    }

    pub fn send_raw(&mut self, text: String, supports_caching: bool) {
        self.driver.send_plain(text, supports_caching);
    }

    pub fn send_legacy(&mut self, name: &str, params: Map<String, Value>, supports_caching: bool) {
        self.driver.send_command(name, params, supports_caching);
    }

    pub fn send_atom(&mut self, atom: &AtomEnvelope, supports_caching: bool) {
        self.driver.send_atom(atom, supports_caching);
    }

    pub fn send_rpc(
        &mut self,
        request_id: Option<RequestId>,
        method: &str,
        params: Map<String, Value>,
        supports_caching: bool,
    ) {
        let rpc_id = self.driver.call(method, params, supports_caching);
        if let Some(request_id) = request_id {
            self.rpc_requests.insert(rpc_id, request_id);
        }
    }

    /// Frames arriving while paused are held until `resume_listening`.
    pub fn pause_listening(&mut self) {
        self.listening = false;
    }

    pub fn resume_listening(&mut self, flush: bool) -> Vec<SubSocketEvent> {
        self.listening = true;
        let held = std::mem::take(&mut self.held);
        if !flush {
            debug!(count = held.len(), "socket: dropped held frames");
            return Vec::new();
        }
        held.into_iter()
            .filter_map(|inbound| self.resolve(inbound))
            .collect()
    }

    pub fn accept(&mut self, inbound: SocketInbound) -> Option<SubSocketEvent> {
        if !self.listening {
            self.held.push(inbound);
            return None;
        }
        self.resolve(inbound)
    }

    fn resolve(&mut self, inbound: SocketInbound) -> Option<SubSocketEvent> {
        if self.current_link != Some(inbound.link()) {
            debug!(link = %inbound.link(), "socket: event from a detached link ignored");
            return None;
        }
        match inbound {
            SocketInbound::Open { .. } => Some(SubSocketEvent::Open),
            SocketInbound::Frame { frame, .. } => self.resolve_frame(frame).map(SubSocketEvent::Payload),
            SocketInbound::Close {
                code,
                reason,
                error,
                ..
            } => {
                self.current_link = None;
                self.rpc_requests.clear();
                Some(SubSocketEvent::Close {
                    code,
                    reason,
                    error,
                    reconnect: ReconnectBehavior::for_code(code),
                })
            }
        }
    }

    fn resolve_frame(&mut self, frame: InboundFrame) -> Option<SubSocketPayload> {
        let payload = match frame {
            InboundFrame::Legacy { name, body } => SubSocketPayload::Legacy { name, body },
            InboundFrame::Rpc { method, params } => SubSocketPayload::Rpc { method, params },
            InboundFrame::Atom { kind, body } => SubSocketPayload::Atom { kind, body },
            InboundFrame::AckCandidate {
                rpc_id,
                status,
                result,
            } => {
                let Some(request_id) = self.rpc_requests.remove(&rpc_id) else {
                    debug!(rpc_id, "socket: ack for unknown rpc dropped");
                    return None;
                };
                SubSocketPayload::RpcAck {
                    request_id,
                    status,
                    result,
                }
            }
            InboundFrame::Unknown(json) => SubSocketPayload::Unknown(json),
        };
        Some(payload)
    }
}
