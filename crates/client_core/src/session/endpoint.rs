use crate::{context::UserIdentity, networking::NetworkingDomain};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub domain: Option<NetworkingDomain>,
    pub channel_id: String,
}

/// Splits a host-provided channel path into an optional domain override and
/// the channel id.
///
/// `abc` targets channel `abc` on the default domain. Otherwise the first
/// segment names a custom host when it has a dot and a dev sandbox when it
/// does not, and the last segment is the channel: `sandbox/abc`,
/// `chat.example.com/abc`, and even `/abc` (sandbox `abc`). An empty channel
/// id yields nothing.
pub fn extract_endpoint_info(channel_path: &str) -> Option<EndpointInfo> {
    if !channel_path.contains('/') {
        if channel_path.is_empty() {
            return None;
        }
        return Some(EndpointInfo {
            domain: None,
            channel_id: channel_path.to_owned(),
        });
    }

    let parts: Vec<&str> = channel_path.split('/').filter(|part| !part.is_empty()).collect();
    let (hint, channel_id) = (parts.first()?, parts.last()?);
    let domain = if hint.contains('.') {
        NetworkingDomain::Custom((*hint).to_owned())
    } else {
        NetworkingDomain::Sandbox((*hint).to_owned())
    };
    Some(EndpointInfo {
        domain: Some(domain),
        channel_id: (*channel_id).to_owned(),
    })
}

/// Key telling whether a later start-up continues the same logical session.
pub fn construct_personal_namespace(channel_id: &str, identity: &UserIdentity) -> String {
    let user = match &identity.id {
        Some(id) => format!("jwt({id})"),
        None => format!("tmp({})", identity.token),
    };
    format!("channel({channel_id}):user{user}")
}

#[cfg(test)]
#[path = "../tests/endpoint_tests.rs"]
mod tests;
