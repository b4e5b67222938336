use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

use crate::error::SettingsError;

pub const DEFAULT_SETTINGS_FILE: &str = "session.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub ping_payload: String,
    pub slicer_interval_ms: u64,
    pub slicer_prolonged_interval_ms: u64,
    pub global_domain: String,
    pub russian_domain: String,
    pub default_zone: String,
    /// Replaces the primary domain for every request, useful against a local stand.
    pub forced_host: Option<String>,
    /// Routes service requests to `<module>.<prefix>.dev.<domain>`.
    pub dev_server_prefix: Option<String>,
    pub user_agent: String,
    pub event_capacity: usize,
    pub store_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 15_000,
            pong_timeout_ms: 10_000,
            ping_payload: " ".into(),
            slicer_interval_ms: 400,
            slicer_prolonged_interval_ms: 600,
            global_domain: "jivosite.com".into(),
            russian_domain: "jivo.ru".into(),
            default_zone: "com".into(),
            forced_host: None,
            dev_server_prefix: None,
            user_agent: format!("sdk-session/{}", env!("CARGO_PKG_VERSION")),
            event_capacity: 1024,
            store_path: None,
        }
    }
}

impl SessionSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn slicer_interval(&self) -> Duration {
        Duration::from_millis(self.slicer_interval_ms)
    }

    pub fn slicer_prolonged_interval(&self) -> Duration {
        Duration::from_millis(self.slicer_prolonged_interval_ms)
    }
}

/// Defaults, then `session.toml` from the working directory, then environment.
pub fn load_settings() -> Result<SessionSettings, SettingsError> {
    let path = Path::new(DEFAULT_SETTINGS_FILE);
    let file = path.exists().then_some(path);
    load_settings_from(file, |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SessionSettings, SettingsError> {
    let mut settings = match file {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<SessionSettings>(&raw)?
        }
        None => SessionSettings::default(),
    };
    apply_env_overrides(&mut settings, env)?;
    Ok(settings)
}

/// Each setting may be overridden by `APP__<NAME>` or `SESSION_<NAME>`;
/// the `APP__` form wins when both are set.
fn apply_env_overrides(
    settings: &mut SessionSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), SettingsError> {
    let lookup = |name: &str| {
        env(&format!("APP__{name}")).or_else(|| env(&format!("SESSION_{name}")))
    };

    override_parsed(&lookup, "PING_INTERVAL_MS", &mut settings.ping_interval_ms)?;
    override_parsed(&lookup, "PONG_TIMEOUT_MS", &mut settings.pong_timeout_ms)?;
    override_parsed(&lookup, "SLICER_INTERVAL_MS", &mut settings.slicer_interval_ms)?;
    override_parsed(
        &lookup,
        "SLICER_PROLONGED_INTERVAL_MS",
        &mut settings.slicer_prolonged_interval_ms,
    )?;
    override_parsed(&lookup, "EVENT_CAPACITY", &mut settings.event_capacity)?;

    if let Some(v) = lookup("GLOBAL_DOMAIN") {
        settings.global_domain = v;
    }
    if let Some(v) = lookup("RUSSIAN_DOMAIN") {
        settings.russian_domain = v;
    }
    if let Some(v) = lookup("DEFAULT_ZONE") {
        settings.default_zone = v;
    }
    if let Some(v) = lookup("FORCED_HOST") {
        settings.forced_host = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = lookup("DEV_SERVER_PREFIX") {
        settings.dev_server_prefix = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = lookup("USER_AGENT") {
        settings.user_agent = v;
    }
    if let Some(v) = lookup("STORE_PATH") {
        settings.store_path = Some(PathBuf::from(v));
    }

    Ok(())
}

fn override_parsed<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<(), SettingsError> {
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    *target = raw
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue {
            key: name.to_owned(),
            value: raw.clone(),
        })?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
