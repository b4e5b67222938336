use serde_json::{Map, Value};
use shared::protocol::{legacy_command, AtomEnvelope, RpcEnvelope};
use tracing::{debug, warn};
use url::Url;

use super::{LinkId, LinkState, LiveConnection};

/// Frames protocol messages onto a [`LiveConnection`] and holds them back
/// while caching is on.
pub struct SocketDriver {
    link: Box<dyn LiveConnection>,
    rpc_counter: u64,
    outgoing_cache: Option<Vec<String>>,
}

impl SocketDriver {
    pub fn new(link: Box<dyn LiveConnection>) -> Self {
        Self {
            link,
            rpc_counter: 0,
            outgoing_cache: None,
        }
    }

    pub fn open(&mut self, url: &Url, headers: &[(String, String)]) -> LinkId {
        self.link.open(url, headers)
    }

    pub fn disconnect(&mut self) {
        self.link.disconnect();
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn is_caching(&self) -> bool {
        self.outgoing_cache.is_some()
    }

    pub fn start_caching(&mut self) {
        if self.outgoing_cache.is_none() {
            self.outgoing_cache = Some(Vec::new());
        }
        debug!("socket: start caching");
    }

    /// Ends caching and either sends the held frames in their original order
    /// or drops them.
    pub fn stop_caching(&mut self, flush: bool) -> usize {
        let held = self.outgoing_cache.take().unwrap_or_default();
        let count = held.len();
        if flush {
            for frame in held {
                self.link.transmit(frame);
            }
            debug!(count, "socket: stop caching, flushed");
        } else {
            debug!(count, "socket: stop caching, dropped");
        }
        count
    }

    pub fn send_plain(&mut self, text: String, supports_caching: bool) {
        self.dispatch(text, supports_caching, "plain");
    }

    pub fn send_json(&mut self, json: &Value, supports_caching: bool) {
        match serde_json::to_string(json) {
            Ok(text) => self.dispatch(text, supports_caching, "json"),
            Err(err) => warn!(error = %err, "socket: failed to encode json"),
        }
    }

    pub fn send_command(&mut self, name: &str, body: Map<String, Value>, supports_caching: bool) {
        let payload = legacy_command(name, body);
        self.send_json(&payload, supports_caching);
    }

    pub fn send_atom(&mut self, atom: &AtomEnvelope, supports_caching: bool) {
        match serde_json::to_string(atom) {
            Ok(text) => self.dispatch(text, supports_caching, "atom"),
            Err(err) => warn!(error = %err, "socket: failed to encode atom"),
        }
    }

    /// Sends an rpc call and returns the id the peer will acknowledge with.
    pub fn call(&mut self, method: &str, params: Map<String, Value>, supports_caching: bool) -> u64 {
        self.rpc_counter += 1;
        let rpc_id = self.rpc_counter;
        match serde_json::to_string(&RpcEnvelope::new(rpc_id, method, params)) {
            Ok(text) => self.dispatch(text, supports_caching, "rpc"),
            Err(err) => warn!(error = %err, method, "socket: failed to encode rpc"),
        }
        rpc_id
    }

    fn dispatch(&mut self, frame: String, supports_caching: bool, kind: &'static str) {
        match &mut self.outgoing_cache {
            Some(cache) if supports_caching => {
                cache.push(frame);
                debug!(kind, queued = cache.len(), "socket: enqueue");
            }
            _ => {
                if self.link.transmit(frame) {
                    debug!(kind, "socket: send");
                } else {
                    warn!(kind, "socket: nothing open, frame dropped");
                }
            }
        }
    }
}
