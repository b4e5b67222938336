use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(SiteId);
id_newtype!(LocalChatId);

impl SiteId {
    /// A site is only usable for a live connection once the server has assigned it.
    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

/// Account coordinates of the widget channel the host app talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountConfig {
    pub site_id: SiteId,
    pub channel_id: String,
}

/// Where the chat server and companion services live for the current account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub chatserver_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatserver_port: Option<u16>,
    pub api_host: String,
    pub files_host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Licensing {
    #[default]
    Unknown,
    Licensed,
    Unlicensed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub brief: String,
}

impl ContactInfo {
    /// Non-empty trimmed fields keyed by their wire name, in a stable order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("desc", &self.brief),
        ]
        .into_iter()
        .map(|(key, value)| (key, value.trim().to_owned()))
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }
}

/// Server-side datacenter the host may pin the session to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredServer {
    #[default]
    Auto,
    Europe,
    Russia,
    Asia,
}
