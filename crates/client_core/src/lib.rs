pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod networking;
pub mod protocol_client;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{load_settings, load_settings_from, SessionSettings};
pub use context::{ClientContextEvent, SessionContextEvent, UserIdentity};
pub use engine::{EngineDrivers, EngineEvent, EngineHandle, SessionEngine};
pub use error::{EngineError, SettingsError, StoreError, TransportError};
pub use protocol_client::{BundleSubject, MeSubject, ProtoBundle, SessionSubject};
pub use session::{MissingPushPermission, PushPermission, SessionSnapshot};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{
    AppState, AuthorizationState, ConnectionAllowance, ConnectionState, ReachabilityMode,
    StartupMode, Subsystems,
};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
