use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use crossbeam::channel::Sender;
use http::{
    header::{HeaderMap, CONTENT_TYPE},
    Method, StatusCode,
};
use reqwest::cookie::{CookieStore as _, Jar};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{error::Error, logger};

use super::{endpoint::QueryPairs, ClusterContext};

pub const YAML_CONTENT_TYPE: &str = "application/x-yaml";

fn remove_slash(path: &str) -> &str {
    if let Some(path) = path.strip_prefix('/') {
        path
    } else {
        path
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Yaml(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub path: String,
    pub query: QueryPairs,
    pub body: Option<RequestBody>,
}

impl FetchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn json_body(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn yaml_body(mut self, document: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Yaml(document.into()));
        self
    }

    pub fn has_query(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response. Callers decode the body and check `is_ok` themselves.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }

    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_ok() {
            return Ok(self);
        }

        if self.status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }

        Err(Error::Http {
            status: self.status.as_u16(),
            message: error_message(self.status, &self.body),
        })
    }
}

/// Error bodies are either `{"message": ...}` / `{"error": ...}` JSON or plain text.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
        for key in ["message", "error"] {
            if let Some(serde_json::Value::String(message)) = map.get(key) {
                return message.to_string();
            }
        }
    }

    let text = String::from_utf8_lossy(body).trim().to_string();

    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedOut,
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse>;

    fn cluster(&self) -> ClusterContext;
}

pub async fn fetch_json<F, T>(fetch: &F, request: FetchRequest) -> Result<T>
where
    F: Fetch + ?Sized,
    T: DeserializeOwned,
{
    let response = fetch.send(request).await?.error_for_status()?;

    Ok(response.json()?)
}

pub async fn fetch_text<F>(fetch: &F, request: FetchRequest) -> Result<String>
where
    F: Fetch + ?Sized,
{
    let response = fetch.send(request).await?.error_for_status()?;

    Ok(response.text())
}

#[derive(Debug, Default)]
pub struct AuthenticatedFetchBuilder {
    base_url: String,
    session_cookie: Option<String>,
    timeout: Option<Duration>,
    cluster: ClusterContext,
    tx_session: Option<Sender<SessionEvent>>,
}

impl AuthenticatedFetchBuilder {
    pub fn session_cookie(mut self, cookie: Option<String>) -> Self {
        self.session_cookie = cookie.filter(|c| !c.is_empty());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cluster(mut self, cluster: ClusterContext) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn session_events(mut self, tx: Sender<SessionEvent>) -> Self {
        self.tx_session = Some(tx);
        self
    }

    pub fn build(self) -> Result<AuthenticatedFetch> {
        let mut base_url = Url::parse(&self.base_url).map_err(Error::from)?;

        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let jar = Arc::new(Jar::default());

        if let Some(cookie) = &self.session_cookie {
            jar.add_cookie_str(cookie, &base_url);
        }

        let mut client = reqwest::Client::builder().cookie_provider(jar.clone());

        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }

        Ok(AuthenticatedFetch {
            client: client.build().map_err(Error::from)?,
            base_url,
            jar,
            cluster: Arc::new(RwLock::new(self.cluster)),
            logged_out: Arc::new(AtomicBool::new(false)),
            tx_session: self.tx_session,
        })
    }
}

/// Cookie authenticated HTTP access to the dashboard backend.
///
/// A `401` raises [`SessionEvent::LoggedOut`] once and is returned to the
/// caller as is. Nothing is retried.
#[derive(Clone)]
pub struct AuthenticatedFetch {
    client: reqwest::Client,
    base_url: Url,
    jar: Arc<Jar>,
    cluster: Arc<RwLock<ClusterContext>>,
    logged_out: Arc<AtomicBool>,
    tx_session: Option<Sender<SessionEvent>>,
}

impl std::fmt::Debug for AuthenticatedFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AuthenticatedFetch {{ base_url: {}, cluster: {:?}, logged_out: {} }}",
            self.base_url,
            self.cluster(),
            self.is_logged_out()
        )
    }
}

impl AuthenticatedFetch {
    pub fn builder(base_url: impl Into<String>) -> AuthenticatedFetchBuilder {
        AuthenticatedFetchBuilder {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(remove_slash(path)).map_err(Error::from)?)
    }

    /// `Cookie` header value for transports that bypass reqwest (websocket).
    pub fn cookie_header(&self) -> Option<String> {
        self.jar
            .cookies(&self.base_url)
            .and_then(|value| value.to_str().ok().map(ToString::to_string))
    }

    pub fn switch_cluster(&self, cluster_id: Option<String>) {
        self.cluster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .switch(cluster_id);
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Re-arms the logged out event after a new login.
    pub fn reset_session(&self, cookie: Option<&str>) {
        if let Some(cookie) = cookie {
            self.jar.add_cookie_str(cookie, &self.base_url);
        }

        self.logged_out.store(false, Ordering::SeqCst);
    }

    /// Query with the cluster pair appended unless the caller set one.
    pub fn query_with_cluster(&self, request: &FetchRequest) -> QueryPairs {
        let mut query = request.query.clone();

        if !request.has_query("cluster") {
            if let Some(pair) = self.cluster().query_pair() {
                query.push(pair);
            }
        }

        query
    }

    fn on_status(&self, status: StatusCode) {
        if status != StatusCode::UNAUTHORIZED {
            return;
        }

        if self.logged_out.swap(true, Ordering::SeqCst) {
            return;
        }

        logger!(warn, "received 401, session invalidated");

        if let Some(tx) = &self.tx_session {
            if tx.send(SessionEvent::LoggedOut).is_err() {
                logger!(debug, "session event receiver is gone");
            }
        }
    }
}

#[async_trait]
impl Fetch for AuthenticatedFetch {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse> {
        let url = self.url(&request.path)?;
        let query = self.query_with_cluster(&request);

        logger!(debug, "HTTP request {} {} {:?}", request.method, url, query);

        let mut builder = self.client.request(request.method, url).query(&query);

        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Yaml(document)) => {
                builder.header(CONTENT_TYPE, YAML_CONTENT_TYPE).body(document)
            }
            None => builder,
        };

        let response = builder.send().await.map_err(Error::from)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::from)?;

        logger!(debug, "HTTP response {} ({} bytes)", status, body.len());

        self.on_status(status);

        Ok(FetchResponse::new(status, body).with_headers(headers))
    }

    fn cluster(&self) -> ClusterContext {
        self.cluster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
