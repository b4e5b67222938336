use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::StoreError;

/// Keys persisted across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    ClientId,
    SiteId,
    ChannelId,
    Endpoint,
    ConnectionUrlPath,
    PreviousToken,
    AccountConfig,
    EndpointConfig,
    RateConfig,
    ContactInfoWasShownAt,
    ContactInfoWasEverSent,
}

impl StoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientId => "clientId",
            Self::SiteId => "siteID",
            Self::ChannelId => "channelId",
            Self::Endpoint => "endpoint",
            Self::ConnectionUrlPath => "connectionUrlPath",
            Self::PreviousToken => "previousToken",
            Self::AccountConfig => "accountConfig",
            Self::EndpointConfig => "endpointConfig",
            Self::RateConfig => "rateConfig",
            Self::ContactInfoWasShownAt => "contactInfoWasShownAt",
            Self::ContactInfoWasEverSent => "contactInfoWasEverSent",
        }
    }

    /// Key namespaced under a personal namespace.
    pub fn scoped(self, scope: &str) -> String {
        format!("{scope}::{}", self.as_str())
    }
}

/// Small string store standing in for the platform keychain.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: Option<String>);
    /// Drops every key namespaced under `scope`.
    fn remove_scope(&mut self, scope: &str);
}

pub trait StoreExt: KeyValueStore {
    fn read(&self, key: StoreKey) -> Option<String> {
        self.get(key.as_str())
    }

    fn write(&mut self, key: StoreKey, value: Option<String>) {
        self.set(key.as_str(), value);
    }

    fn erase(&mut self, key: StoreKey) {
        self.set(key.as_str(), None);
    }

    fn read_i64(&self, key: StoreKey) -> Option<i64> {
        self.read(key).and_then(|raw| raw.parse().ok())
    }

    fn read_json<T: DeserializeOwned>(&self, key: StoreKey) -> Option<T> {
        let raw = self.read(key)?;
        serde_json::from_str(&raw)
            .map_err(|err| warn!(key = key.as_str(), error = %err, "store: dropping unreadable value"))
            .ok()
    }

    fn write_json<T: Serialize>(&mut self, key: StoreKey, value: Option<&T>) {
        let encoded = value.and_then(|value| serde_json::to_string(value).ok());
        self.write(key, encoded);
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => self.entries.insert(key.to_owned(), value),
            None => self.entries.remove(key),
        };
    }

    fn remove_scope(&mut self, scope: &str) {
        let prefix = format!("{scope}::");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }
}

/// JSON file backed store, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            inner: MemoryStore { entries },
        })
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.inner.entries)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    fn persist_or_warn(&self) {
        if let Err(err) = self.persist() {
            warn!(path = %self.path.display(), error = %err, "store: failed to persist");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: Option<String>) {
        self.inner.set(key, value);
        self.persist_or_warn();
    }

    fn remove_scope(&mut self, scope: &str) {
        self.inner.remove_scope(scope);
        self.persist_or_warn();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
