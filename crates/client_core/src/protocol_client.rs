use serde_json::{json, Value};
use shared::{
    domain::{ContactInfo, SiteId},
    protocol::{
        AtomEnvelope, CloseKind, ConnectionConfigBody, RestResponseStatus, ATOM_ME_HISTORY,
        ATOM_ME_ID, ATOM_ME_URL_PATH, ATOM_USER_PREFIX,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    networking::{
        Call, NetworkingSubject, ResponseKind, RestOptions, RestTarget, SocketEvent, SocketPayload,
    },
    transport::ReconnectBehavior,
};

/// Slicer tag of every `atom/me.*` bundle.
pub const ME_TAG: &str = "session.me";

pub const PUSH_PLATFORM: &str = "ios";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCredentials {
    Ids {
        site_id: SiteId,
        channel_id: String,
        token: Option<String>,
    },
    /// Resume path issued by the server through `atom/me.url.path`.
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionSubject {
    SocketOpen,
    SocketClose {
        kind: CloseKind,
        reconnect: ReconnectBehavior,
        error: Option<String>,
    },
    ConnectionConfig {
        status: RestResponseStatus,
        body: ConnectionConfigBody,
    },
    PushRegistration {
        status: RestResponseStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeSubject {
    Id(String),
    UrlPath(String),
    History { last_message_id: Option<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BundleSubject {
    Me(MeSubject),
    Atom { kind: String, body: Value },
}

/// One inbound unit the slicer may batch with its same-tagged neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoBundle {
    pub tag: String,
    pub subject: BundleSubject,
}

impl ProtoBundle {
    fn me(subject: MeSubject) -> Self {
        Self {
            tag: ME_TAG.to_owned(),
            subject: BundleSubject::Me(subject),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtoEvent {
    Subject(SessionSubject),
    Bundle(ProtoBundle),
}

pub fn config_request(primary_domain: &str, channel_id: &str) -> Call {
    let url = format!("https://sdk.{primary_domain}/config/{channel_id}");
    debug!(%url, "session: request config");
    Call::Rest {
        kind: Some(ResponseKind::ConnectionConfig),
        target: RestTarget::Url(url),
        options: RestOptions::get(),
    }
}

/// Live connection address: `wss://host[:port]/atom/<site>:<channel>?token=`
/// for a fresh start, `wss://host[:port]/atom<path>` for a resume.
pub fn connect_url(host: &str, port: Option<u16>, credentials: &LiveCredentials) -> Option<Url> {
    let mut url = Url::parse(host).ok()?;
    url.set_port(port).ok()?;
    url.set_query(None);
    url.set_path("");
    let origin = url.as_str().trim_end_matches('/').to_owned();

    match credentials {
        LiveCredentials::Ids {
            site_id,
            channel_id,
            token,
        } => {
            let mut url = Url::parse(&format!("{origin}/atom/{site_id}:{channel_id}")).ok()?;
            if let Some(token) = token {
                url.query_pairs_mut().append_pair("token", token);
            }
            Some(url)
        }
        LiveCredentials::Path(path) if path.is_empty() => None,
        LiveCredentials::Path(path) => Url::parse(&format!("{origin}/atom{path}")).ok(),
    }
}

pub fn device_registration(
    site_id: SiteId,
    channel_id: &str,
    client_id: &str,
    device_id: &str,
    push_token: &str,
) -> Call {
    let body = json!({
        "device_id": device_id,
        "platform": PUSH_PLATFORM,
        "token": push_token,
    });
    Call::Rest {
        kind: Some(ResponseKind::PushRegistration),
        target: RestTarget::chat_server(format!("/client/{site_id}/{channel_id}/device")),
        options: RestOptions::post_json(body).with_header("x-jv-client-id", client_id),
    }
}

/// One `atom/user.<field>` per filled contact field.
pub fn contact_info_atoms(client_id: Option<&str>, info: &ContactInfo) -> Vec<Call> {
    info.fields()
        .into_iter()
        .map(|(field, value)| {
            let mut atom = AtomEnvelope::new(format!("{ATOM_USER_PREFIX}{field}")).with_data(value);
            if let Some(client_id) = client_id {
                atom = atom.with_id(client_id);
            }
            Call::Atom(atom)
        })
        .collect()
}

pub fn decode(subject: &NetworkingSubject) -> Option<ProtoEvent> {
    match subject {
        NetworkingSubject::Socket(SocketEvent::Open) => {
            Some(ProtoEvent::Subject(SessionSubject::SocketOpen))
        }
        NetworkingSubject::Socket(SocketEvent::Close {
            code,
            reason,
            error,
            reconnect,
        }) => Some(ProtoEvent::Subject(SessionSubject::SocketClose {
            kind: CloseKind::classify(*code, reason, error.is_some()),
            reconnect: *reconnect,
            error: error.clone(),
        })),
        NetworkingSubject::Socket(SocketEvent::Payload(SocketPayload::Atom { kind, body })) => {
            decode_atom(kind, body).map(ProtoEvent::Bundle)
        }
        NetworkingSubject::Rest(response) => match response.kind {
            ResponseKind::ConnectionConfig => Some(ProtoEvent::Subject(SessionSubject::ConnectionConfig {
                status: response.status,
                body: ConnectionConfigBody::from_json(&response.body),
            })),
            ResponseKind::PushRegistration => Some(ProtoEvent::Subject(SessionSubject::PushRegistration {
                status: response.status,
            })),
            ResponseKind::Custom(_) => None,
        },
        NetworkingSubject::Socket(SocketEvent::Payload(_)) | NetworkingSubject::Apns(_) => None,
    }
}

fn decode_atom(kind: &str, body: &Value) -> Option<ProtoBundle> {
    let data = body.get("data");
    let text = data.and_then(Value::as_str);
    match kind {
        ATOM_ME_ID => match text {
            Some(id) => Some(ProtoBundle::me(MeSubject::Id(id.to_owned()))),
            None => {
                debug!("session: empty me.id ignored");
                None
            }
        },
        ATOM_ME_URL_PATH => text.map(|path| ProtoBundle::me(MeSubject::UrlPath(path.to_owned()))),
        ATOM_ME_HISTORY => {
            let last_message_id = text
                .and_then(|raw| raw.trim().parse().ok())
                .or_else(|| data.and_then(Value::as_i64));
            Some(ProtoBundle::me(MeSubject::History { last_message_id }))
        }
        other => Some(ProtoBundle {
            tag: other.to_owned(),
            subject: BundleSubject::Atom {
                kind: other.to_owned(),
                body: body.clone(),
            },
        }),
    }
}

#[cfg(test)]
#[path = "tests/protocol_client_tests.rs"]
mod tests;
