//! Cache-validating GETs against CA Observer pages.
//!
//! The report views answer with JSON or HTML depending on the `Accept` header
//! and honour `If-Modified-Since`, so the fetcher remembers the validators of
//! every (URL, representation) pair it has seen and turns a 304 into
//! [`FetchOutcome::NotModified`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::trace;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accept {
    Json,
    Html,
}

impl Accept {
    pub fn as_str(self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Html => "text/html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub accept: Accept,
    /// Send remembered validators. A caller that has nothing on screen for
    /// this request must ask unconditionally, or a 304 leaves it empty.
    pub conditional: bool,
}

impl FetchRequest {
    pub fn json(url: Url) -> Self {
        Self {
            url,
            accept: Accept::Json,
            conditional: true,
        }
    }

    pub fn html(url: Url) -> Self {
        Self {
            url,
            accept: Accept::Html,
            conditional: true,
        }
    }

    pub fn conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Modified(String),
    NotModified,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

pub type FetchResult = Result<FetchOutcome, FetchError>;

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> FetchResult;
}

#[derive(Debug, Default, Clone)]
struct Validators {
    last_modified: Option<HeaderValue>,
    etag: Option<HeaderValue>,
}

impl Validators {
    fn from_headers(headers: &header::HeaderMap) -> Option<Self> {
        let validators = Self {
            last_modified: headers.get(header::LAST_MODIFIED).cloned(),
            etag: headers.get(header::ETAG).cloned(),
        };
        (validators.last_modified.is_some() || validators.etag.is_some()).then_some(validators)
    }
}

/// [`Fetcher`] over `reqwest` with per-URL conditional GET state.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    http: Client,
    validators: Mutex<HashMap<(Accept, String), Validators>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            validators: Mutex::new(HashMap::new()),
        }
    }

    /// Drops every remembered validator; the next fetch of each URL is unconditional.
    pub fn forget(&self) {
        self.validators.lock().clear();
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchResult {
        let key = (request.accept, request.url.to_string());
        let cached = if request.conditional {
            self.validators.lock().get(&key).cloned()
        } else {
            None
        };

        let mut builder = self
            .http
            .get(request.url)
            .header(header::ACCEPT, request.accept.as_str());
        if let Some(validators) = &cached {
            if let Some(value) = &validators.last_modified {
                builder = builder.header(header::IF_MODIFIED_SINCE, value.clone());
            }
            if let Some(value) = &validators.etag {
                builder = builder.header(header::IF_NONE_MATCH, value.clone());
            }
        }

        let res = builder.send().await?;
        let status = res.status();
        trace!(
            target: "careport::fetch",
            url = %key.1,
            accept = request.accept.as_str(),
            status = status.as_u16(),
            conditional = cached.is_some(),
            "fetch completed"
        );

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::UnexpectedStatus { status, body });
        }

        if let Some(validators) = Validators::from_headers(res.headers()) {
            self.validators.lock().insert(key, validators);
        }
        Ok(FetchOutcome::Modified(res.text().await?))
    }
}
