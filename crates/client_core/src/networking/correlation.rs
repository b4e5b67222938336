use std::{collections::HashMap, fmt};

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::{NetworkingEvent, NetworkingSubject, ResponseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Socket,
    Rest,
}

/// Receives the response subject of one correlated request. Dropped without
/// a value when the request is purged.
pub type Backsignal = oneshot::Receiver<NetworkingSubject>;

pub struct RequestMeta<C> {
    pub kind: ResponseKind,
    pub channel: Channel,
    pub context: Option<C>,
    backsignal: oneshot::Sender<NetworkingSubject>,
}

impl<C> RequestMeta<C> {
    pub fn new(kind: ResponseKind, channel: Channel, context: Option<C>) -> (Self, Backsignal) {
        let (backsignal, receiver) = oneshot::channel();
        (
            Self {
                kind,
                channel,
                context,
                backsignal,
            },
            receiver,
        )
    }

    /// Hands the subject to whoever awaits the backsignal and returns the
    /// event carrying the caller's context.
    pub fn deliver(self, subject: NetworkingSubject) -> NetworkingEvent<C> {
        let _ = self.backsignal.send(subject.clone());
        NetworkingEvent {
            subject,
            context: self.context,
        }
    }
}

/// Pending requests keyed by request id. Every entry is removed exactly once,
/// either by its response or by a purge.
pub struct CorrelationTable<C> {
    entries: HashMap<RequestId, RequestMeta<C>>,
}

impl<C> Default for CorrelationTable<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> CorrelationTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses a second entry for the same id.
    pub fn insert(&mut self, id: RequestId, meta: RequestMeta<C>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, meta);
        true
    }

    pub fn take(&mut self, id: &RequestId) -> Option<RequestMeta<C>> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry that went out on `channel`; their backsignals
    /// resolve as cancelled.
    pub fn purge(&mut self, channel: Channel) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, meta| meta.channel != channel);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(?channel, purged, "networking: purged pending requests");
        }
        purged
    }
}
