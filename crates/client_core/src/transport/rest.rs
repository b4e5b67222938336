use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use shared::protocol::RestResponseStatus;
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl RestMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RestBody {
    #[default]
    Omit,
    Form(Map<String, Value>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub url: Url,
    pub method: RestMethod,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResult {
    pub url: Url,
    pub status: RestResponseStatus,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RestResult {
    /// Transport failures surface as an unknown status with an empty body.
    pub fn failed(url: Url) -> Self {
        Self {
            url,
            status: RestResponseStatus::Unknown(0),
            headers: HashMap::new(),
            body: Value::Null,
        }
    }
}

#[async_trait]
pub trait RestDriver: Send + Sync {
    async fn execute(&self, request: RestRequest) -> RestResult;
}

pub struct HttpRestDriver {
    http: Client,
}

impl HttpRestDriver {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn perform(&self, request: &RestRequest) -> Result<RestResult, TransportError> {
        let mut builder = self
            .http
            .request(request.method.as_reqwest(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RestBody::Omit => builder,
            RestBody::Form(fields) => {
                let pairs: Vec<(String, String)> = fields
                    .iter()
                    .map(|(key, value)| (key.clone(), form_value(value)))
                    .collect();
                builder.form(&pairs)
            }
            RestBody::Json(json) => builder.json(json),
        };

        let response = builder.send().await?;
        let status = RestResponseStatus::from_code(i64::from(response.status().as_u16()));
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let url = Url::parse(response.url().as_str()).unwrap_or_else(|_| request.url.clone());
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok(RestResult {
            url,
            status,
            headers,
            body,
        })
    }
}

impl Default for HttpRestDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RestDriver for HttpRestDriver {
    async fn execute(&self, request: RestRequest) -> RestResult {
        match self.perform(&request).await {
            Ok(result) => {
                debug!(url = %request.url, status = result.status.code(), "rest: response");
                result
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "rest: request failed");
                RestResult::failed(request.url)
            }
        }
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
