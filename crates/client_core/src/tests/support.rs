use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::RestResponseStatus;
use tokio::sync::mpsc;
use url::Url;

use crate::transport::{
    LinkEvent, LinkId, LinkState, LiveConnection, RestDriver, RestRequest, RestResult,
};

#[derive(Debug, Default)]
pub struct LinkProbe {
    pub opened: Vec<(Url, Vec<(String, String)>)>,
    pub sent: Vec<String>,
    pub disconnects: usize,
    pub state: LinkState,
    pub current: Option<LinkId>,
}

/// In-memory link that records what the session sends and lets a test play
/// the server side through its [`LinkController`].
pub struct RecordingLink {
    probe: Arc<Mutex<LinkProbe>>,
    next_link: u64,
}

#[derive(Clone)]
pub struct LinkController {
    probe: Arc<Mutex<LinkProbe>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl RecordingLink {
    pub fn new() -> (Self, LinkController, mpsc::UnboundedReceiver<LinkEvent>) {
        let probe = Arc::new(Mutex::new(LinkProbe::default()));
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                probe: Arc::clone(&probe),
                next_link: 0,
            },
            LinkController { probe, events },
            rx,
        )
    }
}

impl LiveConnection for RecordingLink {
    fn open(&mut self, url: &Url, headers: &[(String, String)]) -> LinkId {
        self.next_link += 1;
        let link = LinkId(self.next_link);
        let mut probe = self.probe.lock().expect("probe");
        probe.opened.push((url.clone(), headers.to_vec()));
        probe.state = LinkState::Connecting;
        probe.current = Some(link);
        link
    }

    fn transmit(&mut self, frame: String) -> bool {
        let mut probe = self.probe.lock().expect("probe");
        if probe.current.is_none() {
            return false;
        }
        probe.sent.push(frame);
        true
    }

    fn disconnect(&mut self) {
        let mut probe = self.probe.lock().expect("probe");
        probe.disconnects += 1;
        probe.current = None;
        probe.state = LinkState::Disconnected;
    }

    fn state(&self) -> LinkState {
        self.probe.lock().expect("probe").state
    }
}

impl LinkController {
    pub fn current(&self) -> Option<LinkId> {
        self.probe.lock().expect("probe").current
    }

    pub fn accept(&self) {
        let link = {
            let mut probe = self.probe.lock().expect("probe");
            probe.state = LinkState::Connected;
            probe.current.expect("a link must be open before accepting")
        };
        self.events.send(LinkEvent::Open { link }).expect("link events");
    }

    pub fn deliver(&self, text: impl Into<String>) {
        let link = self.current().expect("open link");
        self.deliver_on(link, text);
    }

    pub fn deliver_on(&self, link: LinkId, text: impl Into<String>) {
        self.events
            .send(LinkEvent::Message {
                link,
                text: text.into(),
            })
            .expect("link events");
    }

    pub fn close_from_server(&self, code: u16, reason: &str, error: Option<&str>) {
        let link = {
            let mut probe = self.probe.lock().expect("probe");
            probe.state = LinkState::Disconnected;
            probe.current.expect("open link")
        };
        self.events
            .send(LinkEvent::Close {
                link,
                code,
                reason: reason.to_owned(),
                error: error.map(str::to_owned),
            })
            .expect("link events");
    }

    pub fn sent(&self) -> Vec<String> {
        self.probe.lock().expect("probe").sent.clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("json frame"))
            .collect()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.probe
            .lock()
            .expect("probe")
            .opened
            .iter()
            .map(|(url, _)| url.to_string())
            .collect()
    }

    pub fn opened_headers(&self) -> Vec<Vec<(String, String)>> {
        self.probe
            .lock()
            .expect("probe")
            .opened
            .iter()
            .map(|(_, headers)| headers.clone())
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.probe.lock().expect("probe").disconnects
    }
}

/// REST driver answering from a routing table keyed by URL substring.
#[derive(Clone, Default)]
pub struct ScriptedRest {
    routes: Arc<Mutex<Vec<(String, RestResponseStatus, Value)>>>,
    requests: Arc<Mutex<Vec<RestRequest>>>,
}

impl ScriptedRest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, fragment: &str, status: RestResponseStatus, body: Value) -> Self {
        self.routes
            .lock()
            .expect("routes")
            .push((fragment.to_owned(), status, body));
        self
    }

    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.url.to_string())
            .collect()
    }
}

#[async_trait]
impl RestDriver for ScriptedRest {
    async fn execute(&self, request: RestRequest) -> RestResult {
        self.requests.lock().expect("requests").push(request.clone());
        let matched = self
            .routes
            .lock()
            .expect("routes")
            .iter()
            .find(|(fragment, _, _)| request.url.as_str().contains(fragment.as_str()))
            .map(|(_, status, body)| (*status, body.clone()));
        let (status, body) = matched.unwrap_or((RestResponseStatus::NotFound, Value::Null));
        RestResult {
            url: request.url,
            status,
            headers: Default::default(),
            body,
        }
    }
}
