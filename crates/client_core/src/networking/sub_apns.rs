use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::types::AppState;

/// Key the backend puts into every push meant for the SDK rather than the host app.
pub const SDK_PUSH_MARKER: &str = "jivosdk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget {
    App,
    Sdk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub target: PushTarget,
    pub message_type: String,
    /// `created_ts` of the push when present, the moment of delivery otherwise.
    pub created_at: DateTime<Utc>,
    pub app_state: AppState,
    pub body: Value,
}

pub type TargetDetector = Box<dyn Fn(&Value) -> PushTarget + Send + Sync>;

pub fn detect_target(body: &Value) -> PushTarget {
    if body.get(SDK_PUSH_MARKER).is_some() {
        PushTarget::Sdk
    } else {
        PushTarget::App
    }
}

/// Turns push notifications handed over by the host into payloads.
pub struct SubApns {
    detector: TargetDetector,
}

impl Default for SubApns {
    fn default() -> Self {
        Self::new(Box::new(detect_target))
    }
}

impl SubApns {
    pub fn new(detector: TargetDetector) -> Self {
        Self { detector }
    }

    pub fn accept(&self, body: Value, app_state: AppState, delivered_at: DateTime<Utc>) -> PushPayload {
        let target = (self.detector)(&body);
        let message_type = body
            .get("message_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let created_at = body
            .get("created_ts")
            .and_then(|ts| ts.as_i64().or_else(|| ts.as_str()?.trim().parse().ok()))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(delivered_at);
        debug!(?target, message_type = %message_type, ?app_state, "push: payload received");

        PushPayload {
            target,
            message_type,
            created_at,
            app_state,
            body,
        }
    }
}

#[cfg(test)]
#[path = "../tests/sub_apns_tests.rs"]
mod tests;
