//! HTTP transport for metadata requests.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::MetadataError;

/// Default timeout for metadata requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default metadata service base URL (link-local address).
pub const DEFAULT_BASE_URL: &str = "http://169.254.169.254";

/// Session token endpoint path.
const TOKEN_PATH: &str = "/latest/api/token";

/// Token TTL header name.
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Token lifetime requested from the service, in seconds.
const TOKEN_TTL_SECONDS: &str = "21600";

/// Token header name for requests.
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// HTTP wrapper for metadata service requests.
///
/// Requests go out unauthenticated until the service rejects one, at which
/// point a session token is fetched and reused for the rest of the run.
#[derive(Debug)]
pub struct Transport {
    inner: Client,
    base_url: String,
    max_size: Option<usize>,
    token_access: bool,
    token: OnceCell<String>,
}

impl Transport {
    /// Create a new transport with the specified timeout and base URL.
    pub fn new(timeout: Duration, base_url: &str) -> Result<Self, MetadataError> {
        let inner = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_size: None,
            token_access: false,
            token: OnceCell::new(),
        })
    }

    /// Cap the size of every response body.
    pub fn set_max_size(&mut self, max_size: Option<usize>) {
        self.max_size = max_size;
    }

    /// Use session-token access from the first request on.
    pub fn set_token_access(&mut self, enabled: bool) {
        self.token_access = enabled;
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` relative to the base URL and return the body as text.
    pub async fn get(&self, path: &str) -> Result<String, MetadataError> {
        let url = self.url(path);
        let token = if self.token_access {
            Some(self.session_token().await?)
        } else {
            self.token.get().map(String::as_str)
        };

        let mut response = self.send_get(&url, token).await?;

        if token.is_none()
            && matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            )
        {
            warn!(%url, status = %response.status(), "request rejected, retrying with session token");
            let token = self.session_token().await?;
            response = self.send_get(&url, Some(token)).await?;
        }

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "metadata request failed");
            return Err(MetadataError::Http(status.as_u16()));
        }

        read_text(response, self.max_size).await
    }

    async fn send_get(&self, url: &str, token: Option<&str>) -> Result<Response, MetadataError> {
        debug!(%url, token = token.is_some(), "GET");
        let mut request = self.inner.get(url);
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token);
        }
        request.send().await.map_err(|e| self.transport_error(e))
    }

    /// The session token, requested from the service at most once per run.
    async fn session_token(&self) -> Result<&str, MetadataError> {
        self.token
            .get_or_try_init(|| self.request_token())
            .await
            .map(String::as_str)
    }

    async fn request_token(&self) -> Result<String, MetadataError> {
        let url = self.url(TOKEN_PATH);
        debug!(%url, "PUT");
        let response = self
            .inner
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(MetadataError::Token);
        }
        response.text().await.map_err(|_| MetadataError::Token)
    }

    fn transport_error(&self, error: reqwest::Error) -> MetadataError {
        if error.is_connect() || error.is_timeout() {
            MetadataError::Unavailable(self.base_url.clone())
        } else {
            MetadataError::Request(error)
        }
    }
}

/// Read a response body as UTF-8 text, enforcing `limit` when set.
///
/// A declared `Content-Length` over the limit is rejected before any body is
/// read; otherwise the running total is checked per chunk.
pub async fn read_text(mut response: Response, limit: Option<usize>) -> Result<String, MetadataError> {
    let body = match limit {
        None => response.bytes().await?.to_vec(),
        Some(limit) => {
            let declared = response.content_length().map(|len| len as usize);
            if let Some(len) = declared.filter(|&len| len > limit) {
                return Err(MetadataError::TooLarge(len, limit));
            }

            let mut body = Vec::with_capacity(declared.unwrap_or_default());
            while let Some(chunk) = response.chunk().await? {
                let total = body.len() + chunk.len();
                if total > limit {
                    return Err(MetadataError::TooLarge(total, limit));
                }
                body.extend_from_slice(&chunk);
            }
            body
        }
    };
    String::from_utf8(body).map_err(|_| MetadataError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(5));
    }

    #[test]
    fn test_default_base_url() {
        assert_eq!(DEFAULT_BASE_URL, "http://169.254.169.254");
    }

    #[test]
    fn test_transport_strips_trailing_slash() {
        let transport = Transport::new(DEFAULT_TIMEOUT, "http://localhost:8080/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_url_joins_path() {
        let transport = Transport::new(DEFAULT_TIMEOUT, "http://localhost:8080").unwrap();
        assert_eq!(
            transport.url("latest/meta-data/"),
            "http://localhost:8080/latest/meta-data/"
        );
        assert_eq!(
            transport.url(TOKEN_PATH),
            "http://localhost:8080/latest/api/token"
        );
    }

    #[test]
    fn test_no_token_before_first_rejection() {
        let transport = Transport::new(DEFAULT_TIMEOUT, DEFAULT_BASE_URL).unwrap();
        assert!(transport.token.get().is_none());
    }
}
