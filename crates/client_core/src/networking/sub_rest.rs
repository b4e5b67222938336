use std::sync::Arc;

use serde_json::Value;
use shared::protocol::RestResponseStatus;
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::correlation::RequestId;
use crate::transport::{RestBody, RestDriver, RestMethod, RestRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct RestEvent {
    pub request_id: RequestId,
    pub url: Url,
    pub status: RestResponseStatus,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestOptions {
    pub method: RestMethod,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RestBody,
}

impl RestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json(body: Value) -> Self {
        Self {
            method: RestMethod::Post,
            body: RestBody::Json(body),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }
}

/// Thirteen lowercase alphanumerics, sent as `x-request-id`.
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(13).collect()
}

/// Runs REST requests off the worker and reports their results back to it.
pub struct SubRest {
    driver: Arc<dyn RestDriver>,
    user_agent: String,
    events: mpsc::UnboundedSender<RestEvent>,
    active: Vec<AbortHandle>,
}

impl SubRest {
    pub fn new(
        driver: Arc<dyn RestDriver>,
        user_agent: String,
        events: mpsc::UnboundedSender<RestEvent>,
    ) -> Self {
        Self {
            driver,
            user_agent,
            events,
            active: Vec::new(),
        }
    }

    pub fn request(&mut self, request_id: RequestId, url: Url, options: RestOptions) {
        let mut headers = vec![
            ("User-Agent".to_owned(), self.user_agent.clone()),
            ("x-request-id".to_owned(), generate_request_id()),
        ];
        headers.extend(options.headers);
        let request = RestRequest {
            url,
            method: options.method,
            headers,
            query: options.query,
            body: options.body,
        };

        debug!(%request_id, url = %request.url, method = ?request.method, "rest: request");
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = driver.execute(request).await;
            let _ = events.send(RestEvent {
                request_id,
                url: result.url,
                status: result.status,
                body: result.body,
            });
        });

        self.active.retain(|handle| !handle.is_finished());
        self.active.push(task.abort_handle());
    }

    pub fn in_flight(&self) -> usize {
        self.active.iter().filter(|handle| !handle.is_finished()).count()
    }

    pub fn cancel_active_requests(&mut self) -> usize {
        let cancelled = self.in_flight();
        for handle in self.active.drain(..) {
            handle.abort();
        }
        if cancelled > 0 {
            debug!(cancelled, "rest: cancelled active requests");
        }
        cancelled
    }
}
