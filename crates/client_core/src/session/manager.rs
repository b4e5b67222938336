use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use shared::{
    domain::{
        AccountConfig, ContactInfo, EndpointConfig, Licensing, LocalChatId, PreferredServer,
        SiteId,
    },
    protocol::{CloseKind, ConnectionConfigBody, RestResponseStatus},
};
use tracing::{debug, info, warn};

use super::{
    endpoint::{construct_personal_namespace, extract_endpoint_info, EndpointInfo},
    PushPermission,
};
use crate::{
    context::{ClientContext, SessionContext, UserIdentity},
    networking::{Backsignal, Caching, Call, Networking, ResponseKind},
    protocol_client::{
        self, BundleSubject, LiveCredentials, MeSubject, ProtoBundle, SessionSubject,
    },
    store::{KeyValueStore, StoreExt, StoreKey},
    transport::ReconnectBehavior,
    types::{
        AppState, AuthorizationState, ConnectionAllowance, ConnectionState, ReachabilityMode,
        StartupMode, Subsystems,
    },
};

/// Travels with a correlated call and comes back with its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContext {
    Connection {
        channel_id: String,
        preferred_mode: StartupMode,
    },
    DeviceRegistration {
        device_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartUpBehavior {
    NewContext { personal_namespace: String },
    PreviousContext,
    HasAnotherActiveContext,
    AlreadyConnecting,
}

struct StartUpMeta {
    endpoint: EndpointInfo,
    personal_namespace: String,
    behavior: StartUpBehavior,
}

struct DeferredStartUp {
    channel_path: String,
    user_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub connection_allowance: ConnectionAllowance,
    pub authorization_state: AuthorizationState,
    pub reachability: ReachabilityMode,
    pub app_state: AppState,
    pub recent_startup_mode: StartupMode,
    pub number_of_resumes: u32,
    pub account_config: Option<AccountConfig>,
    pub endpoint_config: Option<EndpointConfig>,
    pub authorizing_path: Option<String>,
    pub local_chat_id: Option<LocalChatId>,
    pub client_id: Option<String>,
    pub client_number: Option<i64>,
    pub personal_namespace: Option<String>,
    pub licensing: Licensing,
    pub pending_requests: usize,
    pub caching: bool,
    pub deferred_start_up: bool,
    pub last_open_at: Option<DateTime<Utc>>,
}

/// Connection lifecycle policy. Lives on the worker task; every method runs
/// to completion without awaiting.
pub struct SessionManager {
    session: SessionContext,
    client: ClientContext,
    networking: Networking<RequestContext>,
    store: Box<dyn KeyValueStore>,
    push: Arc<dyn PushPermission>,
    user_agent: String,
    app_state: AppState,
    deferred: Option<DeferredStartUp>,
    preferred_startup_mode: StartupMode,
    last_open_at: Option<DateTime<Utc>>,
}

impl SessionManager {
    pub fn new(
        session: SessionContext,
        client: ClientContext,
        networking: Networking<RequestContext>,
        store: Box<dyn KeyValueStore>,
        push: Arc<dyn PushPermission>,
        user_agent: String,
    ) -> Self {
        Self {
            session,
            client,
            networking,
            store,
            push,
            user_agent,
            app_state: AppState::Active,
            deferred: None,
            preferred_startup_mode: StartupMode::Fresh,
            last_open_at: None,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn client(&self) -> &ClientContext {
        &self.client
    }

    pub fn networking(&self) -> &Networking<RequestContext> {
        &self.networking
    }

    pub fn networking_mut(&mut self) -> &mut Networking<RequestContext> {
        &mut self.networking
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Loads what a previous run left behind: the account, the endpoint and
    /// the resume path of the last personal namespace.
    pub fn restore(&mut self) {
        if let (Some(site_id), Some(channel_id)) = (
            self.store.read_i64(StoreKey::SiteId),
            self.store.read(StoreKey::ChannelId),
        ) {
            self.session.set_account_config(Some(AccountConfig {
                site_id: SiteId(site_id),
                channel_id,
            }));
        }
        if let Some(endpoint) = self.store.read_json::<EndpointConfig>(StoreKey::EndpointConfig) {
            self.session.set_endpoint_config(Some(endpoint));
        }
        self.networking.set_endpoint(self.store.read(StoreKey::Endpoint));

        let path = self
            .store
            .read(StoreKey::PreviousToken)
            .and_then(|namespace| self.store.get(&StoreKey::ConnectionUrlPath.scoped(&namespace)));
        self.session.set_authorizing_path(path);

        info!(
            account = ?self.session.account_config(),
            resumable = self.session.authorizing_path().is_some(),
            "session: restored"
        );
    }

    pub fn setup(&mut self, channel_path: &str, user_token: &str) {
        if !self.app_state.can_communicate() {
            info!(channel_path, "session: app cannot communicate, start-up deferred");
            self.deferred = Some(DeferredStartUp {
                channel_path: channel_path.to_owned(),
                user_token: user_token.to_owned(),
            });
            return;
        }
        self.start_up(channel_path, user_token, StartupMode::Resume);
    }

    fn start_up(&mut self, channel_path: &str, user_token: &str, preferred_mode: StartupMode) {
        let identity = UserIdentity::from_token(user_token);
        let Some(meta) = self.detect_start_up(channel_path, &identity) else {
            warn!(channel_path, "session: channel path has no channel id");
            return;
        };
        debug!(behavior = ?meta.behavior, namespace = %meta.personal_namespace, "session: start-up");

        match &meta.behavior {
            StartUpBehavior::AlreadyConnecting => {
                info!("session: connection already establishing");
                return;
            }
            StartUpBehavior::NewContext { personal_namespace } => {
                self.session.set_recent_startup_mode(StartupMode::Fresh);
                self.store.erase(StoreKey::SiteId);
                self.store
                    .write(StoreKey::PreviousToken, Some(personal_namespace.clone()));
                self.store.erase(StoreKey::ContactInfoWasShownAt);
                self.store.erase(StoreKey::ContactInfoWasEverSent);
                self.turn_inactive(Subsystems::ARTIFACTS);
            }
            StartUpBehavior::PreviousContext if self.session.number_of_resumes() == 0 => {
                self.session.set_recent_startup_mode(StartupMode::Fresh);
            }
            StartUpBehavior::PreviousContext => {
                let mode = match preferred_mode {
                    StartupMode::Reconnect => StartupMode::Reconnect,
                    _ => StartupMode::Resume,
                };
                self.session.set_recent_startup_mode(mode);
            }
            StartUpBehavior::HasAnotherActiveContext => {
                info!("session: another personal namespace is active, starting over");
                self.session
                    .set_connection_allowance(ConnectionAllowance::Disallowed);
                self.turn_inactive(Subsystems::CONNECTION | Subsystems::ARTIFACTS);
                self.start_up(channel_path, user_token, StartupMode::Fresh);
                return;
            }
        }

        match (&identity.payload, &identity.id) {
            (None, _) => info!("session: user token is not a JWT, using it as an opaque identity"),
            (Some(_), None) => warn!("session: user token JWT carries no 'id' field"),
            _ => {}
        }

        if let Some(domain) = meta.endpoint.domain {
            self.networking.set_preferred_domain(domain);
        }

        let site_id = SiteId(self.store.read_i64(StoreKey::SiteId).unwrap_or(0));
        self.session.set_user_identity(Some(identity));
        self.session.set_account_config(Some(AccountConfig {
            site_id,
            channel_id: meta.endpoint.channel_id,
        }));
        self.session
            .set_authorization_state(AuthorizationState::Unknown);
        self.client
            .set_personal_namespace(Some(meta.personal_namespace));
        self.persist_authorizing_path();

        if self.session.authorizing_path().is_some() {
            self.preferred_startup_mode = StartupMode::Resume;
        }

        self.perform_start_up();
    }

    fn detect_start_up(&self, channel_path: &str, identity: &UserIdentity) -> Option<StartUpMeta> {
        let endpoint = extract_endpoint_info(channel_path)?;
        let personal_namespace = construct_personal_namespace(&endpoint.channel_id, identity);

        let behavior = if self
            .client
            .personal_namespace()
            .is_some_and(|active| active != personal_namespace)
        {
            StartUpBehavior::HasAnotherActiveContext
        } else if self.networking.is_connecting() {
            StartUpBehavior::AlreadyConnecting
        } else if self.store.read(StoreKey::PreviousToken).as_deref() == Some(personal_namespace.as_str()) {
            StartUpBehavior::PreviousContext
        } else {
            StartUpBehavior::NewContext {
                personal_namespace: personal_namespace.clone(),
            }
        };

        Some(StartUpMeta {
            endpoint,
            personal_namespace,
            behavior,
        })
    }

    fn perform_start_up(&mut self) {
        self.push.request_permission();
        if self.session.raise(ConnectionState::Identifying) {
            self.request_config();
        } else {
            debug!(state = ?self.session.connection_state(), "session: already past identifying");
        }
    }

    pub fn request_config(&mut self) {
        let Some(channel_id) = self
            .session
            .account_config()
            .map(|account| account.channel_id.clone())
        else {
            warn!("session: cannot request config, missing channel id");
            return;
        };
        let call = protocol_client::config_request(&self.networking.primary_domain(), &channel_id);
        let context = RequestContext::Connection {
            channel_id,
            preferred_mode: self.preferred_startup_mode,
        };
        self.networking
            .send_with_context(call, context, Caching::Auto);
    }

    /// Host intent to be online: connects now when the config is known,
    /// otherwise as soon as it arrives.
    pub fn establish_connection(&mut self) {
        self.session
            .set_connection_allowance(ConnectionAllowance::Allowed);
        self.connect_if_possible();
    }

    fn connect_if_possible(&mut self) {
        if !self.app_state.can_communicate() {
            debug!(app_state = ?self.app_state, "session: app cannot communicate, not connecting");
            return;
        }
        let (Some(account), Some(endpoint)) = (
            self.session.account_config().cloned(),
            self.session.endpoint_config().cloned(),
        ) else {
            debug!("session: waiting for the connection config");
            return;
        };
        if !account.site_id.is_assigned() {
            debug!("session: waiting for the site id");
            return;
        }
        if self.session.connection_state() == ConnectionState::Connecting {
            info!("session: connection already starting");
            return;
        }
        if self.networking.is_connected() {
            info!("session: already connected");
            return;
        }
        if !self.session.networking_state().is_reachable() {
            info!("session: network unreachable, searching");
            self.session
                .set_connection_state(ConnectionState::Searching);
            return;
        }

        self.session
            .set_connection_state(ConnectionState::Connecting);
        let mode = self.preferred_startup_mode;
        let wants_resume = matches!(mode, StartupMode::Resume | StartupMode::Reconnect);
        if wants_resume && self.try_resume(&endpoint) {
            info!(?mode, "session: performing resume");
            return;
        }

        info!(?mode, "session: performing start");
        let credentials = LiveCredentials::Ids {
            site_id: account.site_id,
            channel_id: account.channel_id,
            token: self
                .session
                .user_identity()
                .map(|identity| identity.token.clone()),
        };
        if !self.connect_live(&endpoint, &credentials) {
            warn!(host = %endpoint.chatserver_host, "session: cannot build the live url");
            self.session
                .set_connection_state(ConnectionState::Disconnected);
        }
    }

    fn try_resume(&mut self, endpoint: &EndpointConfig) -> bool {
        let Some(path) = self.session.authorizing_path().map(str::to_owned) else {
            return false;
        };
        self.connect_live(endpoint, &LiveCredentials::Path(path))
    }

    fn connect_live(&mut self, endpoint: &EndpointConfig, credentials: &LiveCredentials) -> bool {
        let Some(url) = protocol_client::connect_url(
            &endpoint.chatserver_host,
            endpoint.chatserver_port,
            credentials,
        ) else {
            return false;
        };
        self.networking.start_caching();
        let headers = [("User-Agent".to_owned(), self.user_agent.clone())];
        self.networking.connect(&url, &headers);
        true
    }

    pub fn set_app_state(&mut self, state: AppState) {
        self.app_state = state;
        if !state.can_communicate() {
            return;
        }
        if let Some(deferred) = self.deferred.take() {
            info!("session: replaying deferred start-up");
            self.start_up(
                &deferred.channel_path,
                &deferred.user_token,
                StartupMode::Reconnect,
            );
        }
    }

    pub fn set_reachability(&mut self, mode: ReachabilityMode) {
        self.session.set_networking_state(mode);
        if !mode.is_reachable() {
            info!("network: none");
            return;
        }
        info!(?mode, "network: reachable");
        if self.app_state == AppState::Active && self.session.account_config().is_some() {
            self.request_config();
        }
    }

    pub fn set_preferred_server(&mut self, server: PreferredServer) {
        self.networking.set_preferred_domain(server.into());
    }

    pub fn register_device(&mut self, device_id: &str, push_token: &str) -> Option<Backsignal> {
        let Some(account) = self
            .session
            .account_config()
            .filter(|account| account.site_id.is_assigned())
            .cloned()
        else {
            warn!("push: cannot register a device before the account is known");
            return None;
        };
        let Some(client_id) = self.client.client_id().map(str::to_owned) else {
            warn!("push: cannot register a device before the client id is known");
            return None;
        };
        let call = protocol_client::device_registration(
            account.site_id,
            &account.channel_id,
            &client_id,
            device_id,
            push_token,
        );
        let context = RequestContext::DeviceRegistration {
            device_id: device_id.to_owned(),
        };
        self.networking
            .send_with_context(call, context, Caching::Auto)
    }

    pub fn set_contact_info(&mut self, info: ContactInfo) {
        let atoms = protocol_client::contact_info_atoms(self.client.client_id(), &info);
        let sent = atoms.len();
        for atom in atoms {
            self.networking.send(atom, Caching::Auto);
        }
        if sent > 0 {
            self.store
                .write(StoreKey::ContactInfoWasEverSent, Some(true.to_string()));
        }
        debug!(fields = sent, "session: contact info sent");
        self.client.set_contact_info(Some(info));
    }

    pub fn send_rpc(
        &mut self,
        method: &str,
        params: Map<String, Value>,
        kind: Option<String>,
    ) -> Option<Backsignal> {
        let call = Call::Rpc {
            kind: kind.map(ResponseKind::Custom),
            method: method.to_owned(),
            params,
        };
        self.networking.send(call, Caching::Auto)
    }

    pub fn turn_inactive(&mut self, subsystems: Subsystems) {
        if subsystems.contains(Subsystems::CONFIG) {
            self.deferred = None;
        }

        if subsystems.contains(Subsystems::CONNECTION) {
            self.networking.disconnect();
            self.networking.stop_caching(false);
            self.networking.cancel_active_requests();
            self.session
                .set_authorization_state(AuthorizationState::Unknown);
            self.session
                .set_connection_state(ConnectionState::Disconnected);
        }

        if subsystems.contains(Subsystems::ARTIFACTS) {
            if let Some(namespace) = self.client.personal_namespace().map(str::to_owned) {
                self.store.remove_scope(&namespace);
            }
            self.preferred_startup_mode = StartupMode::Fresh;
            self.networking.set_endpoint(None);
            self.session.reset();
            self.client.reset();
        }
    }

    pub fn handle_subject(&mut self, subject: &SessionSubject, context: Option<&RequestContext>) {
        match subject {
            SessionSubject::SocketOpen => self.handle_socket_open(),
            SessionSubject::SocketClose {
                kind,
                reconnect,
                error,
            } => self.handle_socket_close(kind, *reconnect, error.as_deref()),
            SessionSubject::ConnectionConfig { status, body } => {
                self.handle_connection_config(*status, body, context)
            }
            SessionSubject::PushRegistration { status } => {
                self.handle_push_registration(*status, context)
            }
        }
    }

    fn handle_socket_open(&mut self) {
        self.session.raise(ConnectionState::Connected);
        self.session.count_resume();
        self.last_open_at = Some(Utc::now());
        info!(resumes = self.session.number_of_resumes(), "session: socket open");
    }

    fn handle_socket_close(&mut self, kind: &CloseKind, reconnect: ReconnectBehavior, error: Option<&str>) {
        info!(?kind, ?reconnect, error = error.unwrap_or_default(), "session: socket closed");
        self.networking.stop_caching(false);
        self.session
            .set_connection_state(ConnectionState::Disconnected);

        match (kind, self.session.authorization_state()) {
            (CloseKind::Blacklist | CloseKind::Deleted, _)
            | (CloseKind::ConnectionBreak, AuthorizationState::Unknown) => {
                self.session
                    .set_authorization_state(AuthorizationState::Unavailable);
            }
            _ => {}
        }
    }

    fn handle_connection_config(
        &mut self,
        status: RestResponseStatus,
        body: &ConnectionConfigBody,
        context: Option<&RequestContext>,
    ) {
        if status != RestResponseStatus::Success {
            warn!(status = status.code(), "session: config request failed");
            return;
        }
        let Some(RequestContext::Connection {
            channel_id,
            preferred_mode,
        }) = context
        else {
            debug!("session: config response without a connection context ignored");
            return;
        };
        let (host, port) = match body.chatserver_address() {
            Ok(address) => address,
            Err(err) => {
                warn!(error = %err, "session: config names no chat server");
                return;
            }
        };
        info!(site_id = %body.site_id, chatserver = %body.chatserver_host, "session: received config");

        let account = AccountConfig {
            site_id: body.site_id,
            channel_id: channel_id.clone(),
        };
        let endpoint = EndpointConfig {
            chatserver_host: format!("wss://{host}"),
            chatserver_port: port,
            api_host: format!("https://{}", body.api_host),
            files_host: format!("https://{}", body.files_host),
        };

        self.store
            .write(StoreKey::Endpoint, Some(body.chatserver_host.clone()));
        self.store
            .write(StoreKey::SiteId, Some(body.site_id.to_string()));
        self.store
            .write(StoreKey::ChannelId, Some(channel_id.clone()));
        self.store.write_json(StoreKey::AccountConfig, Some(&account));
        self.store.write_json(StoreKey::EndpointConfig, Some(&endpoint));
        let rate = Some(&body.rate_settings).filter(|rate| !rate.is_null());
        self.store.write_json(StoreKey::RateConfig, rate);

        self.session.set_account_config(Some(account));
        self.session.set_endpoint_config(Some(endpoint));
        self.persist_authorizing_path();
        self.client.set_licensing(match body.license {
            Some(false) => Licensing::Unlicensed,
            _ => Licensing::Licensed,
        });
        self.networking
            .set_endpoint(Some(body.chatserver_host.clone()));
        self.preferred_startup_mode = *preferred_mode;

        if self.session.connection_allowance() == ConnectionAllowance::Allowed
            && self.session.connection_state() < ConnectionState::Connecting
        {
            self.connect_if_possible();
        }
    }

    fn handle_push_registration(&mut self, status: RestResponseStatus, context: Option<&RequestContext>) {
        let device_id = match context {
            Some(RequestContext::DeviceRegistration { device_id }) => device_id.as_str(),
            _ => "",
        };
        if status.hook_succeed() {
            info!(device_id, status = status.code(), "push: device registered");
        } else if status.should_repeat() {
            warn!(device_id, status = status.code(), "push: registration refused, worth repeating");
        } else {
            warn!(device_id, status = status.code(), "push: registration failed");
        }
    }

    /// Applies a batch of bundles delivered by the slicer. Only `me`
    /// bundles concern the session.
    pub fn handle_transaction(&mut self, batch: &[ProtoBundle]) {
        let me: Vec<&MeSubject> = batch
            .iter()
            .filter_map(|bundle| match &bundle.subject {
                BundleSubject::Me(subject) => Some(subject),
                BundleSubject::Atom { .. } => None,
            })
            .collect();
        if me.is_empty() {
            return;
        }

        self.session
            .set_authorization_state(AuthorizationState::Ready);
        for subject in me {
            match subject {
                MeSubject::Id(id) => {
                    self.client.set_client_id(Some(id.clone()));
                    self.store.write(StoreKey::ClientId, Some(id.clone()));
                }
                MeSubject::UrlPath(path) => {
                    self.session.set_authorizing_path(Some(path.clone()));
                    self.persist_authorizing_path();
                }
                MeSubject::History { last_message_id } => {
                    debug!(?last_message_id, "session: history marker");
                }
            }
        }

        if self.networking.is_caching() {
            let flushed = self.networking.stop_caching(true);
            info!(flushed, "session: identified, outgoing cache released");
        }
    }

    fn persist_authorizing_path(&mut self) {
        let Some(namespace) = self.client.personal_namespace() else {
            return;
        };
        let key = StoreKey::ConnectionUrlPath.scoped(namespace);
        let path = self.session.authorizing_path().map(str::to_owned);
        self.store.set(&key, path);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_state: self.session.connection_state(),
            connection_allowance: self.session.connection_allowance(),
            authorization_state: self.session.authorization_state(),
            reachability: self.session.networking_state(),
            app_state: self.app_state,
            recent_startup_mode: self.session.recent_startup_mode(),
            number_of_resumes: self.session.number_of_resumes(),
            account_config: self.session.account_config().cloned(),
            endpoint_config: self.session.endpoint_config().cloned(),
            authorizing_path: self.session.authorizing_path().map(str::to_owned),
            local_chat_id: self.session.local_chat_id(),
            client_id: self.client.client_id().map(str::to_owned),
            client_number: self.client.client_number(),
            personal_namespace: self.client.personal_namespace().map(str::to_owned),
            licensing: self.client.licensing(),
            pending_requests: self.networking.pending_requests(),
            caching: self.networking.is_caching(),
            deferred_start_up: self.deferred.is_some(),
            last_open_at: self.last_open_at,
        }
    }
}

#[cfg(test)]
#[path = "../tests/session_tests.rs"]
mod tests;
