use std::fmt;

use url::Url;

pub mod rest;
pub mod socket;
pub mod websocket;

pub use rest::{HttpRestDriver, RestBody, RestDriver, RestMethod, RestRequest, RestResult};
pub use socket::SocketDriver;
pub use websocket::{KeepAlive, WsConnection};

/// Identifies one connection attempt of a [`LiveConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open {
        link: LinkId,
    },
    Message {
        link: LinkId,
        text: String,
    },
    Close {
        link: LinkId,
        code: u16,
        reason: String,
        error: Option<String>,
    },
}

impl LinkEvent {
    pub fn link(&self) -> LinkId {
        match self {
            Self::Open { link } | Self::Message { link, .. } | Self::Close { link, .. } => *link,
        }
    }
}

/// A persistent bidirectional text link. Implementations report everything
/// that happens on the link through the event sink handed to them at
/// construction, tagged with the [`LinkId`] returned by `open`.
pub trait LiveConnection: Send {
    /// Drops any current attempt silently and starts a new one.
    fn open(&mut self, url: &Url, headers: &[(String, String)]) -> LinkId;
    /// Queues a frame on the current attempt. False when nothing is open.
    fn transmit(&mut self, frame: String) -> bool;
    /// Tears the current attempt down without reporting a `Close` event.
    fn disconnect(&mut self);
    fn state(&self) -> LinkState;
}

/// How whoever owns reconnection should treat a close code. The driver only
/// classifies; it never reconnects on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectBehavior {
    SoonIncremental,
    OnlyManual,
    NextDay,
}

impl ReconnectBehavior {
    pub fn for_code(code: u16) -> Self {
        match code {
            1005 | 1006 | 1011..=1015 => Self::SoonIncremental,
            1002 | 1003 | 1007 | 1009 | 1010 => Self::OnlyManual,
            _ => Self::NextDay,
        }
    }
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
