use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use shared::domain::{ContactInfo, PreferredServer};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tracing::{debug, info};

use crate::{
    config::SessionSettings,
    context::{ClientContext, ClientContextEvent, SessionContext, SessionContextEvent},
    error::EngineError,
    networking::{
        spawn_decoder, Backsignal, EndpointUrlBuilder, Networking, NetworkingContext,
        NetworkingEvent, NetworkingSubject, RestEvent, Slicer, SocketInbound, SubRest, SubSocket,
    },
    protocol_client::{self, ProtoBundle, ProtoEvent, SessionSubject},
    session::{MissingPushPermission, PushPermission, RequestContext, SessionManager, SessionSnapshot},
    store::KeyValueStore,
    transport::{
        HttpRestDriver, KeepAlive, LinkEvent, LiveConnection, RestDriver, SocketDriver,
        WsConnection,
    },
    types::{AppState, ReachabilityMode, Subsystems},
};

/// What the engine reports to the host besides the context broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Subject(SessionSubject),
    /// One slicer batch of same-tagged bundles.
    Transaction(Vec<ProtoBundle>),
    /// Traffic the session layer does not interpret.
    Unhandled(NetworkingSubject),
}

pub struct EngineDrivers {
    pub link: Box<dyn LiveConnection>,
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    pub rest: Arc<dyn RestDriver>,
    pub push: Arc<dyn PushPermission>,
}

impl EngineDrivers {
    /// WebSocket link plus a `reqwest` driver, without push integration.
    pub fn websocket(settings: &SessionSettings) -> Self {
        let (events, link_events) = mpsc::unbounded_channel();
        Self {
            link: Box::new(WsConnection::new(KeepAlive::from_settings(settings), events)),
            link_events,
            rest: Arc::new(HttpRestDriver::new()),
            push: Arc::new(MissingPushPermission),
        }
    }

    pub fn with_push(mut self, push: Arc<dyn PushPermission>) -> Self {
        self.push = push;
        self
    }
}

enum Command {
    Setup {
        channel_path: String,
        user_token: String,
    },
    EstablishConnection,
    RequestConfig,
    SetAppState(AppState),
    SetReachability(ReachabilityMode),
    SetPreferredServer(PreferredServer),
    RegisterDevice {
        device_id: String,
        push_token: String,
        reply: oneshot::Sender<Option<Backsignal>>,
    },
    SetContactInfo(ContactInfo),
    SendRpc {
        method: String,
        params: Map<String, Value>,
        kind: Option<String>,
        reply: oneshot::Sender<Option<Backsignal>>,
    },
    DeliverPush(Value),
    PauseListening,
    ResumeListening {
        flush: bool,
    },
    TurnInactive(Subsystems),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<EngineEvent>,
    session_events: broadcast::Sender<SessionContextEvent>,
    client_events: broadcast::Sender<ClientContextEvent>,
}

impl EngineHandle {
    fn submit(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.submit(command(reply))?;
        response.await.map_err(|_| EngineError::Stopped)
    }

    pub fn setup(
        &self,
        channel_path: impl Into<String>,
        user_token: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.submit(Command::Setup {
            channel_path: channel_path.into(),
            user_token: user_token.into(),
        })
    }

    pub fn establish_connection(&self) -> Result<(), EngineError> {
        self.submit(Command::EstablishConnection)
    }

    pub fn request_config(&self) -> Result<(), EngineError> {
        self.submit(Command::RequestConfig)
    }

    pub fn set_app_state(&self, state: AppState) -> Result<(), EngineError> {
        self.submit(Command::SetAppState(state))
    }

    pub fn set_reachability(&self, mode: ReachabilityMode) -> Result<(), EngineError> {
        self.submit(Command::SetReachability(mode))
    }

    pub fn set_preferred_server(&self, server: PreferredServer) -> Result<(), EngineError> {
        self.submit(Command::SetPreferredServer(server))
    }

    /// Resolves to `None` when the session cannot register yet.
    pub async fn register_device(
        &self,
        device_id: impl Into<String>,
        push_token: impl Into<String>,
    ) -> Result<Option<Backsignal>, EngineError> {
        let device_id = device_id.into();
        let push_token = push_token.into();
        self.request(|reply| Command::RegisterDevice {
            device_id,
            push_token,
            reply,
        })
        .await
    }

    pub fn set_contact_info(&self, info: ContactInfo) -> Result<(), EngineError> {
        self.submit(Command::SetContactInfo(info))
    }

    pub async fn send_rpc(
        &self,
        method: impl Into<String>,
        params: Map<String, Value>,
        kind: Option<String>,
    ) -> Result<Option<Backsignal>, EngineError> {
        let method = method.into();
        self.request(|reply| Command::SendRpc {
            method,
            params,
            kind,
            reply,
        })
        .await
    }

    /// Hands over a push notification the host received.
    pub fn deliver_push(&self, body: Value) -> Result<(), EngineError> {
        self.submit(Command::DeliverPush(body))
    }

    pub fn pause_listening(&self) -> Result<(), EngineError> {
        self.submit(Command::PauseListening)
    }

    pub fn resume_listening(&self, flush: bool) -> Result<(), EngineError> {
        self.submit(Command::ResumeListening { flush })
    }

    pub fn turn_inactive(&self, subsystems: Subsystems) -> Result<(), EngineError> {
        self.submit(Command::TurnInactive(subsystems))
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(Command::Snapshot).await
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.submit(Command::Shutdown)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionContextEvent> {
        self.session_events.subscribe()
    }

    pub fn subscribe_client(&self) -> broadcast::Receiver<ClientContextEvent> {
        self.client_events.subscribe()
    }
}

pub struct SessionEngine {
    manager: SessionManager,
    slicer: Slicer<ProtoBundle>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedReceiver<SocketInbound>,
    rest_events: mpsc::UnboundedReceiver<RestEvent>,
    events: broadcast::Sender<EngineEvent>,
}

impl SessionEngine {
    /// Restores the persisted session and starts the worker task.
    pub fn spawn(
        settings: SessionSettings,
        drivers: EngineDrivers,
        store: Box<dyn KeyValueStore>,
    ) -> EngineHandle {
        let session = SessionContext::new(settings.event_capacity);
        let client = ClientContext::new(settings.event_capacity);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (rest_tx, rest_events) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            commands: commands_tx,
            events: events.clone(),
            session_events: session.sender(),
            client_events: client.sender(),
        };

        let networking = Networking::new(
            NetworkingContext::new(&settings),
            SubSocket::new(SocketDriver::new(drivers.link)),
            SubRest::new(drivers.rest, settings.user_agent.clone(), rest_tx),
            Arc::new(EndpointUrlBuilder),
        );
        let mut manager = SessionManager::new(
            session,
            client,
            networking,
            store,
            drivers.push,
            settings.user_agent.clone(),
        );
        manager.restore();

        let engine = Self {
            manager,
            slicer: Slicer::new(settings.slicer_interval(), settings.slicer_prolonged_interval()),
            commands,
            inbound: spawn_decoder(drivers.link_events),
            rest_events,
            events,
        };
        tokio::spawn(engine.run());
        handle
    }

    async fn run(mut self) {
        info!("session: engine started");
        loop {
            let deadline = self.slicer.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(inbound) = self.inbound.recv() => {
                    if let Some(event) = self.manager.networking_mut().handle_socket(inbound) {
                        self.dispatch(event);
                    }
                }
                Some(response) = self.rest_events.recv() => {
                    if let Some(event) = self.manager.networking_mut().handle_rest(response) {
                        self.dispatch(event);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let batches = self.slicer.fire(Instant::now());
                    self.deliver(batches);
                }
            }
        }

        let batches = self.slicer.flush();
        self.deliver(batches);
        self.manager.networking_mut().disconnect();
        info!("session: engine stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Setup {
                channel_path,
                user_token,
            } => self.manager.setup(&channel_path, &user_token),
            Command::EstablishConnection => self.manager.establish_connection(),
            Command::RequestConfig => self.manager.request_config(),
            Command::SetAppState(state) => self.manager.set_app_state(state),
            Command::SetReachability(mode) => self.manager.set_reachability(mode),
            Command::SetPreferredServer(server) => self.manager.set_preferred_server(server),
            Command::RegisterDevice {
                device_id,
                push_token,
                reply,
            } => {
                let _ = reply.send(self.manager.register_device(&device_id, &push_token));
            }
            Command::SetContactInfo(info) => self.manager.set_contact_info(info),
            Command::SendRpc {
                method,
                params,
                kind,
                reply,
            } => {
                let _ = reply.send(self.manager.send_rpc(&method, params, kind));
            }
            Command::DeliverPush(body) => {
                let event = self.manager.networking().handle_push(
                    body,
                    self.manager.app_state(),
                    Utc::now(),
                );
                self.dispatch(event);
            }
            Command::PauseListening => self.manager.networking_mut().pause_listening(),
            Command::ResumeListening { flush } => {
                let held = self.manager.networking_mut().resume_listening(flush);
                for event in held {
                    self.dispatch(event);
                }
            }
            Command::TurnInactive(subsystems) => self.manager.turn_inactive(subsystems),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.manager.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, event: NetworkingEvent<RequestContext>) {
        match protocol_client::decode(&event.subject) {
            Some(ProtoEvent::Subject(subject)) => {
                self.manager.handle_subject(&subject, event.context.as_ref());
                let _ = self.events.send(EngineEvent::Subject(subject));
            }
            Some(ProtoEvent::Bundle(bundle)) => {
                let tag = bundle.tag.clone();
                self.slicer.take(&tag, bundle, Instant::now());
            }
            None => {
                debug!("session: subject passed through");
                let _ = self.events.send(EngineEvent::Unhandled(event.subject));
            }
        }
    }

    fn deliver(&mut self, batches: Vec<Vec<ProtoBundle>>) {
        for batch in batches {
            self.manager.handle_transaction(&batch);
            let _ = self.events.send(EngineEvent::Transaction(batch));
        }
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
