//! Transport Gateway: the single configured HTTP client for live mode.
//!
//! Every request resolves its path against the base address, carries the
//! default headers, and attaches `Authorization: Bearer <token>` when the
//! session holds one. Non-2xx responses are classified into [`ApiError`]
//! kinds; a 401 additionally clears the session token.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::session::SessionState;

const USER_AGENT: &str = concat!("assessor/", env!("CARGO_PKG_VERSION"));
const MAX_DETAIL_LEN: usize = 500;

#[derive(Clone)]
pub struct TransportGateway {
    base_url: String,
    http: reqwest::Client,
    session: SessionState,
}

impl TransportGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration, session: SessionState) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(self.request(Method::GET, path).await).await?;
        Ok(resp.json::<T>().await?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(self.request(Method::POST, path).await.json(body)).await?;
        Ok(resp.json::<T>().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path).await).await?;
        Ok(())
    }

    /// Raw body download, e.g. report exports.
    pub async fn get_bytes(&self, path: &str, query: &[(&str, &str)]) -> Result<Bytes> {
        let resp = self.send(self.request(Method::GET, path).await.query(query)).await?;
        Ok(resp.bytes().await?)
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.http.request(method, self.url(path));
        match self.session.token().await {
            Some(token) => rb.bearer_auth(token),
            // No token is not an error; the server decides.
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Response> {
        let resp = rb.send().await.map_err(|e| {
            warn!(error = %e, "gateway: request failed");
            ApiError::from(e)
        })?;

        let status = resp.status();
        debug!(status = %status, url = %resp.url(), "gateway: response");
        if status.is_success() {
            return Ok(resp);
        }
        Err(self.classify(resp).await)
    }

    async fn classify(&self, resp: Response) -> ApiError {
        let status = resp.status();
        let url = resp.url().to_string();

        match status {
            StatusCode::UNAUTHORIZED => {
                self.session.clear().await;
                warn!(url = %url, "gateway: session expired, token cleared");
                ApiError::AuthExpired
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                warn!(url = %url, "gateway: service unavailable");
                ApiError::ServiceUnavailable
            }
            StatusCode::NOT_FOUND => ApiError::NotFound(read_detail(resp).await.unwrap_or_default()),
            _ => {
                let detail = read_detail(resp).await;
                warn!(url = %url, status = status.as_u16(), detail = ?detail, "gateway: request rejected");
                ApiError::Http {
                    status: status.as_u16(),
                    detail,
                }
            }
        }
    }
}

/// Server-provided failure detail: JSON `detail`/`error`/`message`, else the text body.
async fn read_detail(resp: Response) -> Option<String> {
    let body = resp.text().await.ok()?;
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let detail = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => ["detail", "error", "message"].iter().find_map(|k| match json.get(*k)? {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })?,
        Err(_) => body.to_string(),
    };

    if detail.is_empty() {
        return None;
    }
    Some(detail.chars().take(MAX_DETAIL_LEN).collect())
}
