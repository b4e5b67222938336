use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Lifecycle of the live connection. Ordering is meaningful: the session
/// only ever raises the state along this order until it drops back to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Searching,
    Identifying,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAllowance {
    Allowed,
    #[default]
    Disallowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    #[default]
    Unknown,
    Ready,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    #[default]
    Fresh,
    Resume,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityMode {
    None,
    Cell,
    #[default]
    Wifi,
}

impl ReachabilityMode {
    pub fn is_reachable(self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    Background { network_access: bool },
    Inactive,
}

impl Default for AppState {
    fn default() -> Self {
        Self::Active
    }
}

impl AppState {
    /// Whether the host lets the session talk to the network right now.
    pub fn can_communicate(self) -> bool {
        match self {
            Self::Active => true,
            Self::Background { network_access } => network_access,
            Self::Inactive => false,
        }
    }
}

/// Subsystems the session can turn inactive in one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subsystems(u8);

impl Subsystems {
    pub const CONFIG: Self = Self(0b001);
    pub const CONNECTION: Self = Self(0b010);
    pub const ARTIFACTS: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Subsystems {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
