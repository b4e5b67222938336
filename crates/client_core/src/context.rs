use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{Map, Value};
use shared::domain::{AccountConfig, ContactInfo, EndpointConfig, Licensing, LocalChatId};
use tokio::sync::broadcast;

use crate::types::{
    AuthorizationState, ConnectionAllowance, ConnectionState, ReachabilityMode, StartupMode,
};

pub fn crc32(text: &str) -> u32 {
    crc32fast::hash(text.as_bytes())
}

/// Identity derived from the host-provided user token. The token is usually
/// a JWT; its payload is read without verifying the signature.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub token: String,
    pub payload: Option<Map<String, Value>>,
    pub id: Option<String>,
}

impl UserIdentity {
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let payload = decode_jwt_payload(&token);
        let id = payload.as_ref().and_then(|body| match body.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        });
        Self { token, payload, id }
    }

    pub fn is_jwt(&self) -> bool {
        self.payload.is_some()
    }

    pub fn local_chat_id(&self) -> LocalChatId {
        LocalChatId(i64::from(crc32(&self.token)).max(1))
    }
}

/// Two identities match when their tokens match, or when both decode to the
/// same payload (a re-signed token for the same user).
impl PartialEq for UserIdentity {
    fn eq(&self, other: &Self) -> bool {
        if self.token == other.token {
            return true;
        }
        match (&self.payload, &other.payload) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

fn decode_jwt_payload(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(body) => Some(body),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionContextEvent {
    NetworkingStateChanged(ReachabilityMode),
    ConnectionAllowanceChanged(ConnectionAllowance),
    ConnectionStateChanged(ConnectionState),
    AuthorizationStateChanged(AuthorizationState),
    AccountConfigChanged(Option<AccountConfig>),
    EndpointConfigChanged(Option<EndpointConfig>),
    UserIdentityChanged(Option<String>),
    AuthorizingPathChanged(Option<String>),
    StartupModeChanged(StartupMode),
}

/// Session-wide state owned by the worker task. Setters broadcast only
/// actual changes.
#[derive(Debug)]
pub struct SessionContext {
    networking_state: ReachabilityMode,
    connection_allowance: ConnectionAllowance,
    connection_state: ConnectionState,
    authorization_state: AuthorizationState,
    account_config: Option<AccountConfig>,
    endpoint_config: Option<EndpointConfig>,
    user_identity: Option<UserIdentity>,
    local_chat_id: Option<LocalChatId>,
    authorizing_path: Option<String>,
    recent_startup_mode: StartupMode,
    number_of_resumes: u32,
    events: broadcast::Sender<SessionContextEvent>,
}

impl SessionContext {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            networking_state: ReachabilityMode::default(),
            connection_allowance: ConnectionAllowance::default(),
            connection_state: ConnectionState::default(),
            authorization_state: AuthorizationState::default(),
            account_config: None,
            endpoint_config: None,
            user_identity: None,
            local_chat_id: None,
            authorizing_path: None,
            recent_startup_mode: StartupMode::default(),
            number_of_resumes: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionContextEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<SessionContextEvent> {
        self.events.clone()
    }

    fn emit(&self, event: SessionContextEvent) {
        let _ = self.events.send(event);
    }

    pub fn networking_state(&self) -> ReachabilityMode {
        self.networking_state
    }

    pub fn set_networking_state(&mut self, mode: ReachabilityMode) {
        if self.networking_state != mode {
            self.networking_state = mode;
            self.emit(SessionContextEvent::NetworkingStateChanged(mode));
        }
    }

    pub fn connection_allowance(&self) -> ConnectionAllowance {
        self.connection_allowance
    }

    pub fn set_connection_allowance(&mut self, allowance: ConnectionAllowance) {
        if self.connection_allowance != allowance {
            self.connection_allowance = allowance;
            self.emit(SessionContextEvent::ConnectionAllowanceChanged(allowance));
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state != state {
            self.connection_state = state;
            self.emit(SessionContextEvent::ConnectionStateChanged(state));
        }
    }

    /// Moves the connection state forward to `target`. Returns false, and
    /// changes nothing, when the state is already at or past `target`.
    pub fn raise(&mut self, target: ConnectionState) -> bool {
        if self.connection_state >= target {
            return false;
        }
        self.set_connection_state(target);
        true
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        self.authorization_state
    }

    pub fn set_authorization_state(&mut self, state: AuthorizationState) {
        if self.authorization_state != state {
            self.authorization_state = state;
            self.emit(SessionContextEvent::AuthorizationStateChanged(state));
        }
    }

    pub fn account_config(&self) -> Option<&AccountConfig> {
        self.account_config.as_ref()
    }

    /// A resume path is only valid for the account it was issued under, so
    /// switching accounts drops it.
    pub fn set_account_config(&mut self, config: Option<AccountConfig>) {
        if self.account_config == config {
            return;
        }
        self.account_config = config.clone();
        self.emit(SessionContextEvent::AccountConfigChanged(config));
        self.set_authorizing_path(None);
    }

    pub fn endpoint_config(&self) -> Option<&EndpointConfig> {
        self.endpoint_config.as_ref()
    }

    pub fn set_endpoint_config(&mut self, config: Option<EndpointConfig>) {
        if self.endpoint_config != config {
            self.endpoint_config = config.clone();
            self.emit(SessionContextEvent::EndpointConfigChanged(config));
        }
    }

    pub fn user_identity(&self) -> Option<&UserIdentity> {
        self.user_identity.as_ref()
    }

    pub fn set_user_identity(&mut self, identity: Option<UserIdentity>) {
        if self.user_identity == identity {
            return;
        }
        self.local_chat_id = identity.as_ref().map(UserIdentity::local_chat_id);
        let token = identity.as_ref().map(|identity| identity.token.clone());
        self.user_identity = identity;
        self.emit(SessionContextEvent::UserIdentityChanged(token));
    }

    pub fn local_chat_id(&self) -> Option<LocalChatId> {
        self.local_chat_id
    }

    pub fn authorizing_path(&self) -> Option<&str> {
        self.authorizing_path.as_deref()
    }

    pub fn set_authorizing_path(&mut self, path: Option<String>) {
        if self.authorizing_path != path {
            self.authorizing_path = path.clone();
            self.emit(SessionContextEvent::AuthorizingPathChanged(path));
        }
    }

    pub fn recent_startup_mode(&self) -> StartupMode {
        self.recent_startup_mode
    }

    pub fn set_recent_startup_mode(&mut self, mode: StartupMode) {
        self.recent_startup_mode = mode;
        self.emit(SessionContextEvent::StartupModeChanged(mode));
    }

    pub fn number_of_resumes(&self) -> u32 {
        self.number_of_resumes
    }

    pub fn count_resume(&mut self) {
        self.number_of_resumes = self.number_of_resumes.saturating_add(1);
    }

    /// Forgets everything learned about the account and user. Reachability,
    /// allowance and connection state are owned by their own flows.
    pub fn reset(&mut self) {
        self.set_account_config(None);
        self.set_endpoint_config(None);
        self.set_user_identity(None);
        self.set_authorizing_path(None);
        self.set_authorization_state(AuthorizationState::Unknown);
        self.recent_startup_mode = StartupMode::Fresh;
        self.number_of_resumes = 0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientContextEvent {
    ClientIdChanged(Option<String>),
    PersonalNamespaceChanged(Option<String>),
    LicensingChanged(Licensing),
    ContactInfoChanged(Option<ContactInfo>),
}

#[derive(Debug)]
pub struct ClientContext {
    client_id: Option<String>,
    client_number: Option<i64>,
    client_hash: u32,
    personal_namespace: Option<String>,
    licensing: Licensing,
    contact_info: Option<ContactInfo>,
    events: broadcast::Sender<ClientContextEvent>,
}

impl ClientContext {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            client_id: None,
            client_number: None,
            client_hash: crc32(""),
            personal_namespace: None,
            licensing: Licensing::default(),
            contact_info: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientContextEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<ClientContextEvent> {
        self.events.clone()
    }

    fn emit(&self, event: ClientContextEvent) {
        let _ = self.events.send(event);
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn client_number(&self) -> Option<i64> {
        self.client_number
    }

    pub fn client_hash(&self) -> u32 {
        self.client_hash
    }

    pub fn set_client_id(&mut self, client_id: Option<String>) {
        if self.client_id == client_id {
            return;
        }
        self.client_number = client_id.as_deref().and_then(client_number);
        self.client_hash = crc32(client_id.as_deref().unwrap_or_default());
        self.client_id = client_id.clone();
        self.emit(ClientContextEvent::ClientIdChanged(client_id));
    }

    pub fn personal_namespace(&self) -> Option<&str> {
        self.personal_namespace.as_deref()
    }

    pub fn set_personal_namespace(&mut self, namespace: Option<String>) {
        if self.personal_namespace != namespace {
            self.personal_namespace = namespace.clone();
            self.emit(ClientContextEvent::PersonalNamespaceChanged(namespace));
        }
    }

    pub fn licensing(&self) -> Licensing {
        self.licensing
    }

    pub fn set_licensing(&mut self, licensing: Licensing) {
        if self.licensing != licensing {
            self.licensing = licensing;
            self.emit(ClientContextEvent::LicensingChanged(licensing));
        }
    }

    pub fn contact_info(&self) -> Option<&ContactInfo> {
        self.contact_info.as_ref()
    }

    pub fn set_contact_info(&mut self, info: Option<ContactInfo>) {
        if self.contact_info != info {
            self.contact_info = info.clone();
            self.emit(ClientContextEvent::ContactInfoChanged(info));
        }
    }

    pub fn reset(&mut self) {
        self.set_client_id(None);
        self.set_personal_namespace(None);
        self.set_licensing(Licensing::Unknown);
        self.set_contact_info(None);
    }
}

/// Leading integer of a `<number>.<suffix>` client id.
fn client_number(client_id: &str) -> Option<i64> {
    let parts: Vec<&str> = client_id.split('.').collect();
    match parts.as_slice() {
        [number, _] => number.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
