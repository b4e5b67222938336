use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{domain::SiteId, error::ProtocolError};

pub const ATOM_ME_ID: &str = "atom/me.id";
pub const ATOM_ME_URL_PATH: &str = "atom/me.url.path";
pub const ATOM_ME_HISTORY: &str = "atom/me.history";
pub const ATOM_USER_PREFIX: &str = "atom/user.";

/// Close codes as observed by the session layer. Codes below 1000 are
/// synthesized locally and never travel over the wire.
pub mod close_code {
    pub const NORMAL: u16 = 0;
    pub const MISSING_PONG: u16 = 1;
    pub const SESSION_END: u16 = 1000;
    pub const CONNECTION_ABSENT: u16 = 1006;
    pub const NOT_REACHABLE: u16 = 1009;
    pub const SECURE_FAILURE: u16 = 1200;
}

/// One decoded frame received over the live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Legacy { name: String, body: Value },
    Rpc { method: String, params: Value },
    Atom { kind: String, body: Value },
    AckCandidate { rpc_id: u64, status: RestResponseStatus, result: Value },
    Unknown(Value),
}

impl InboundFrame {
    /// Parses a text frame. Frames of one character or less are keep-alive
    /// echoes and never carry a payload.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        if raw.chars().count() <= 1 {
            return Err(ProtocolError::Keepalive);
        }
        let json: Value = serde_json::from_str(raw)?;
        Ok(Self::classify(json))
    }

    /// Classification order matters: `name` wins over `method`, which wins
    /// over `type`, and only then is `id` treated as an rpc acknowledgement.
    pub fn classify(json: Value) -> Self {
        if let Some(name) = string_field(&json, "name") {
            return Self::Legacy { name, body: json };
        }
        if let Some(method) = string_field(&json, "method") {
            let params = json.get("params").cloned().unwrap_or(Value::Null);
            return Self::Rpc { method, params };
        }
        if let Some(kind) = string_field(&json, "type") {
            return Self::Atom { kind, body: json };
        }
        if let Some(rpc_id) = json.get("id").and_then(parse_rpc_id) {
            let status = json
                .get("status")
                .and_then(Value::as_i64)
                .map(RestResponseStatus::from_code)
                .unwrap_or(RestResponseStatus::Success);
            let result = json.get("result").cloned().unwrap_or(Value::Null);
            return Self::AckCandidate {
                rpc_id,
                status,
                result,
            };
        }
        Self::Unknown(json)
    }
}

fn string_field(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn parse_rpc_id(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcEnvelope {
    pub id: String,
    pub method: String,
    pub params: Map<String, Value>,
}

impl RpcEnvelope {
    pub fn new(rpc_id: u64, method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: rpc_id.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AtomEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AtomEnvelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            context: None,
            id: None,
            data: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Legacy commands are the body object with the command `name` merged in.
pub fn legacy_command(name: &str, mut body: Map<String, Value>) -> Value {
    body.insert("name".to_owned(), Value::String(name.to_owned()));
    Value::Object(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestResponseStatus {
    Success,
    BadRequest,
    Unauthorized,
    NoAccess,
    NotFound,
    Conflict,
    TechnicalMaintenance,
    ServerError,
    Unknown(i64),
}

impl RestResponseStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => Self::Success,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::NoAccess,
            404 => Self::NotFound,
            409 => Self::Conflict,
            480 => Self::TechnicalMaintenance,
            500 => Self::ServerError,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Success => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NoAccess => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::TechnicalMaintenance => 480,
            Self::ServerError => 500,
            Self::Unknown(code) => code,
        }
    }

    pub fn should_repeat(self) -> bool {
        matches!(self, Self::NoAccess)
    }

    /// Statuses after which a request hook counts as delivered.
    pub fn hook_succeed(self) -> bool {
        matches!(
            self,
            Self::Success | Self::BadRequest | Self::NotFound | Self::Conflict
        )
    }
}

/// Body of `GET https://sdk.<domain>/config/<channel>`. Decoded leniently:
/// absent or mistyped fields fall back to empty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfigBody {
    pub site_id: SiteId,
    pub chatserver_host: String,
    pub api_host: String,
    pub files_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<bool>,
    #[serde(default)]
    pub rate_settings: Value,
}

impl ConnectionConfigBody {
    pub fn from_json(json: &Value) -> Self {
        let text = |key: &str| {
            json.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            site_id: SiteId(json.get("site_id").and_then(Value::as_i64).unwrap_or(0)),
            chatserver_host: text("chatserver_host"),
            api_host: text("api_host"),
            files_host: text("files_host"),
            license: json.get("license").and_then(Value::as_bool),
            rate_settings: json.get("rate_settings").cloned().unwrap_or(Value::Null),
        }
    }

    /// Splits `chatserver_host` into the host and an optional port.
    pub fn chatserver_address(&self) -> Result<(String, Option<u16>), ProtocolError> {
        let mut parts = self.chatserver_host.split(':');
        let host = parts
            .next()
            .filter(|host| !host.is_empty())
            .ok_or(ProtocolError::MissingField("chatserver_host"))?;
        let port = parts
            .last()
            .and_then(|port| port.parse::<u16>().ok())
            .filter(|port| *port > 0);
        Ok((host.to_owned(), port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    ConnectionBreak,
    Blacklist,
    Deleted,
    SessionEnd,
    MissingConnection,
    SecureConnectionFailure,
    Unknown(u16),
}

impl CloseKind {
    pub fn classify(code: u16, reason: &str, had_error: bool) -> Self {
        let reason = reason.to_lowercase();
        match code {
            close_code::NORMAL => Self::ConnectionBreak,
            close_code::SESSION_END if reason.contains("blacklist") => Self::Blacklist,
            close_code::SESSION_END if reason.contains("deleted") => Self::Deleted,
            close_code::SESSION_END if !had_error => Self::SessionEnd,
            close_code::MISSING_PONG | close_code::CONNECTION_ABSENT | close_code::NOT_REACHABLE => {
                Self::MissingConnection
            }
            close_code::SECURE_FAILURE => Self::SecureConnectionFailure,
            other => Self::Unknown(other),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
