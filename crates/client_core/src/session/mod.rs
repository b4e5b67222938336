use tracing::debug;

pub mod endpoint;
mod manager;

pub use endpoint::{construct_personal_namespace, extract_endpoint_info, EndpointInfo};
pub use manager::{RequestContext, SessionManager, SessionSnapshot, StartUpBehavior};

/// Asks the host platform for permission to show push notifications.
pub trait PushPermission: Send + Sync {
    fn request_permission(&self);
}

/// Used when the host has no push integration.
pub struct MissingPushPermission;

impl PushPermission for MissingPushPermission {
    fn request_permission(&self) {
        debug!("push: permission request skipped, no push integration");
    }
}
