use shared::domain::PreferredServer;
use tracing::warn;
use url::Url;

use crate::config::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneId {
    Com,
    Ru,
}

impl ZoneId {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "com" => Some(Self::Com),
            "ru" => Some(Self::Ru),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkingDomain {
    #[default]
    Auto,
    Zone(ZoneId),
    Sandbox(String),
    Custom(String),
}

impl From<PreferredServer> for NetworkingDomain {
    fn from(server: PreferredServer) -> Self {
        match server {
            PreferredServer::Auto => Self::Auto,
            PreferredServer::Europe | PreferredServer::Asia => Self::Zone(ZoneId::Com),
            PreferredServer::Russia => Self::Zone(ZoneId::Ru),
        }
    }
}

/// Knows which host family the session talks to.
#[derive(Debug, Clone)]
pub struct NetworkingContext {
    global_domain: String,
    russian_domain: String,
    default_zone: ZoneId,
    forced_host: Option<String>,
    dev_server_prefix: Option<String>,
    domain: NetworkingDomain,
}

impl NetworkingContext {
    pub fn new(settings: &SessionSettings) -> Self {
        let default_zone = ZoneId::parse(&settings.default_zone).unwrap_or_else(|| {
            warn!(zone = %settings.default_zone, "networking: unknown default zone, using com");
            ZoneId::Com
        });
        Self {
            global_domain: settings.global_domain.clone(),
            russian_domain: settings.russian_domain.clone(),
            default_zone,
            forced_host: settings.forced_host.clone(),
            dev_server_prefix: settings.dev_server_prefix.clone(),
            domain: NetworkingDomain::Auto,
        }
    }

    pub fn domain(&self) -> &NetworkingDomain {
        &self.domain
    }

    pub fn set_preferred_domain(&mut self, domain: NetworkingDomain) {
        self.domain = domain;
    }

    pub fn primary_domain(&self) -> String {
        if let Some(host) = &self.forced_host {
            return host.clone();
        }
        match &self.domain {
            NetworkingDomain::Auto => self.zone_domain(self.default_zone).to_owned(),
            NetworkingDomain::Zone(zone) => self.zone_domain(*zone).to_owned(),
            NetworkingDomain::Sandbox(prefix) => format!("{prefix}.dev.{}", self.global_domain),
            NetworkingDomain::Custom(host) => host.clone(),
        }
    }

    fn zone_domain(&self, zone: ZoneId) -> &str {
        match zone {
            ZoneId::Com => &self.global_domain,
            ZoneId::Ru => &self.russian_domain,
        }
    }

    /// `https://<module>.<primary domain>`, or the dev stand for `module`
    /// when a server prefix is configured.
    pub fn base_url(&self, module: &str) -> Option<Url> {
        let primary = self.primary_domain();
        let raw = match &self.dev_server_prefix {
            Some(prefix) => format!("https://{module}.{prefix}.dev.{primary}"),
            None => format!("https://{module}.{primary}"),
        };
        Url::parse(&raw)
            .map_err(|err| warn!(url = %raw, error = %err, "networking: invalid base url"))
            .ok()
    }
}

/// Scope a REST target is built in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlScope {
    /// The learned chat-server host as is.
    ChatServer,
    /// The learned host with its leading label replaced, e.g. `api`.
    Specific(String),
}

pub trait UrlBuilder: Send + Sync {
    fn build(
        &self,
        base: Option<&Url>,
        endpoint: Option<&str>,
        scope: &UrlScope,
        path: &str,
    ) -> Option<Url>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointUrlBuilder;

impl UrlBuilder for EndpointUrlBuilder {
    fn build(
        &self,
        base: Option<&Url>,
        endpoint: Option<&str>,
        scope: &UrlScope,
        path: &str,
    ) -> Option<Url> {
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        match scope {
            UrlScope::ChatServer => {
                let endpoint = endpoint.filter(|endpoint| !endpoint.is_empty())?;
                Url::parse(&format!("https://{endpoint}{path}")).ok()
            }
            UrlScope::Specific(label) => {
                let host = match endpoint.filter(|endpoint| !endpoint.is_empty()) {
                    Some(endpoint) => endpoint.split(':').next()?.to_owned(),
                    None => base?.host_str()?.to_owned(),
                };
                let (_, remainder) = host.split_once('.')?;
                if remainder.is_empty() {
                    return None;
                }
                Url::parse(&format!("https://{label}.{remainder}{path}")).ok()
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/networking_context_tests.rs"]
mod tests;
