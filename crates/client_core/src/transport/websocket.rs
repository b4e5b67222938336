use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::protocol::close_code;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
        Error as WsError, Message,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use super::{LinkEvent, LinkId, LinkState, LiveConnection};
use crate::{config::SessionSettings, error::TransportError};

/// Close code reported when the peer closes without a status.
const NO_STATUS_CODE: u16 = 1005;

#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub ping_payload: String,
}

impl KeepAlive {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval(),
            pong_timeout: settings.pong_timeout(),
            ping_payload: settings.ping_payload.clone(),
        }
    }
}

enum LinkCommand {
    Send(String),
}

struct ActiveLink {
    id: LinkId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

/// WebSocket link. Each `open` spawns one task that owns the stream and the
/// keep-alive timers for that attempt.
pub struct WsConnection {
    keepalive: KeepAlive,
    events: mpsc::UnboundedSender<LinkEvent>,
    next_link: u64,
    active: Option<ActiveLink>,
}

impl WsConnection {
    pub fn new(keepalive: KeepAlive, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            keepalive,
            events,
            next_link: 0,
            active: None,
        }
    }
}

impl LiveConnection for WsConnection {
    fn open(&mut self, url: &Url, headers: &[(String, String)]) -> LinkId {
        self.disconnect();
        self.next_link += 1;
        let link = LinkId(self.next_link);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Connecting);
        let task = tokio::spawn(run_link(LinkTask {
            link,
            url: url.clone(),
            headers: headers.to_vec(),
            keepalive: self.keepalive.clone(),
            commands: command_rx,
            state: state_tx,
            events: self.events.clone(),
        }));

        info!(%link, host = url.host_str().unwrap_or_default(), "socket: opening");
        self.active = Some(ActiveLink {
            id: link,
            commands,
            state,
            task,
        });
        link
    }

    fn transmit(&mut self, frame: String) -> bool {
        match &self.active {
            Some(active) => active.commands.send(LinkCommand::Send(frame)).is_ok(),
            None => false,
        }
    }

    fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            debug!(link = %active.id, "socket: detached");
        }
    }

    fn state(&self) -> LinkState {
        self.active
            .as_ref()
            .map(|active| *active.state.borrow())
            .unwrap_or_default()
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct LinkTask {
    link: LinkId,
    url: Url,
    headers: Vec<(String, String)>,
    keepalive: KeepAlive,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    state: watch::Sender<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

struct Closing {
    code: u16,
    reason: String,
    error: Option<String>,
}

impl Closing {
    fn failed(code: u16, error: impl ToString) -> Self {
        Self {
            code,
            reason: String::new(),
            error: Some(error.to_string()),
        }
    }
}

async fn run_link(task: LinkTask) {
    let LinkTask {
        link,
        url,
        headers,
        keepalive,
        mut commands,
        state,
        events,
    } = task;

    let connected = match build_request(&url, &headers) {
        Ok(request) => connect_async(request).await.map_err(TransportError::from),
        Err(err) => Err(err),
    };
    let stream = match connected {
        Ok((stream, _)) => stream,
        Err(err) => {
            // never opened: tell TLS trouble apart from plain unreachability
            let code = if is_secure_failure(&err) {
                close_code::SECURE_FAILURE
            } else {
                close_code::NOT_REACHABLE
            };
            warn!(%link, code, error = %err, "socket: failed to connect");
            let _ = state.send(LinkState::Disconnected);
            let _ = events.send(LinkEvent::Close {
                link,
                code,
                reason: String::new(),
                error: Some(err.to_string()),
            });
            return;
        }
    };

    let _ = state.send(LinkState::Connected);
    info!(%link, "socket: open");
    let _ = events.send(LinkEvent::Open { link });

    let (mut writer, mut reader) = stream.split();
    let ping = sleep(keepalive.ping_interval);
    tokio::pin!(ping);
    let mut pong_deadline: Option<Instant> = None;

    let closing = loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    ping.as_mut().reset(Instant::now() + keepalive.ping_interval);
                    pong_deadline = None;
                    let _ = events.send(LinkEvent::Message { link, text });
                }
                Some(Ok(Message::Binary(bytes))) => {
                    ping.as_mut().reset(Instant::now() + keepalive.ping_interval);
                    pong_deadline = None;
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(LinkEvent::Message { link, text });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    ping.as_mut().reset(Instant::now() + keepalive.ping_interval);
                    pong_deadline = None;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    break Closing { code, reason, error: None };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(err)) => break Closing::failed(close_code::CONNECTION_ABSENT, err),
                None => break Closing::failed(close_code::CONNECTION_ABSENT, "stream ended"),
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Send(frame)) => {
                    if let Err(err) = writer.send(Message::Text(frame)).await {
                        break Closing::failed(close_code::CONNECTION_ABSENT, err);
                    }
                    ping.as_mut().reset(Instant::now() + keepalive.ping_interval);
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    break Closing {
                        code: close_code::NORMAL,
                        reason: "closed by client".into(),
                        error: None,
                    };
                }
            },
            _ = &mut ping => {
                debug!(%link, "socket: ping");
                if let Err(err) = writer.send(Message::Text(keepalive.ping_payload.clone())).await {
                    break Closing::failed(close_code::CONNECTION_ABSENT, err);
                }
                ping.as_mut().reset(Instant::now() + keepalive.ping_interval);
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + keepalive.pong_timeout);
                }
            }
            _ = wait_until(pong_deadline) => {
                warn!(%link, "socket: missing pong, closing");
                let _ = writer.send(Message::Close(None)).await;
                break Closing {
                    code: close_code::MISSING_PONG,
                    reason: "missing pong".into(),
                    error: None,
                };
            }
        }
    };

    let _ = state.send(LinkState::Disconnected);
    info!(%link, code = closing.code, reason = %closing.reason, "socket: closed");
    let _ = events.send(LinkEvent::Close {
        link,
        code: closing.code,
        reason: closing.reason,
        error: closing.error,
    });
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn build_request(url: &Url, headers: &[(String, String)]) -> Result<Request, TransportError> {
    let mut request = url.as_str().into_client_request()?;
    for (name, value) in headers {
        let invalid = || TransportError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        request.headers_mut().insert(header_name, header_value);
    }
    Ok(request)
}

fn is_secure_failure(err: &TransportError) -> bool {
    if matches!(err, TransportError::WebSocket(WsError::Tls(_))) {
        return true;
    }
    let text = err.to_string().to_ascii_lowercase();
    text.contains("certificate") || text.contains("tls")
}
