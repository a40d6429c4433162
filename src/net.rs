//! Network and identity collaborators.
//!
//! The runtime never talks to the network directly. It is handed a [`Fetch`]
//! implementation (the raw network primitive) and wraps it in the gated,
//! paced [`Fetcher`](crate::Fetcher) before any task sees it. [`CookieJar`]
//! gives read-only access to the browser's cookies and is only consulted during
//! checkin.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, TaskError};

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl FetchRequest {
    /// A plain `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A `POST` with a form/JSON body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A response as seen by tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// True if the request was redirected on the way.
    pub redirected: bool,
    pub body: String,
}

impl FetchResponse {
    /// A `200 OK` for `url` with `body`.
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            url: url.into(),
            redirected: false,
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`TaskError::Upstream`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self, TaskError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TaskError::Upstream {
                status: self.status,
                url: self.url,
            })
        }
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_str(&self.body)
            .map_err(|e| TaskError::malformed(format!("{}: {e}", self.url)))
    }
}

/// The underlying network primitive.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// A browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Read-only access to the browser's cookie jar.
#[async_trait]
pub trait CookieJar: Send + Sync + 'static {
    /// Returns the cookies visible for `domain`.
    async fn cookies(&self, domain: &str) -> Result<Vec<Cookie>, FetchError>;
}
