//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with middleware-driven
//! exponential backoff retries and standardized JSON response handling. The
//! results feed is fetched through it.

use reqwest::{header::HeaderMap, Method};
use url::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use crate::error::{Result, TallyError};

const USER_AGENT: &str = concat!("lib_tally/", env!("CARGO_PKG_VERSION"));

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with the status code and headers of the
/// HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`; relative paths are joined onto a
/// base URL and transient failures are retried with exponential backoff.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` retrying transient failures up to
    /// `max_retries` times.
    ///
    /// # Errors
    /// `SourceUnavailable` if `base_url` is not an absolute URL or the
    /// underlying client cannot be built.
    pub fn new(base_url: &str, max_retries: u32) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TallyError::SourceUnavailable(format!("invalid base url {base_url:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TallyError::SourceUnavailable(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, base_url })
    }

    /// The URL every path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request without a body and decodes a JSON response.
    ///
    /// A non-2xx status is not an error at this level: it comes back as an
    /// `ApiResponse` with `success == false` and the body text attached.
    ///
    /// # Errors
    /// `SourceUnavailable` if URL joining, the network exchange or JSON
    /// decoding of a successful response fails.
    pub async fn request<T>(&self, method: Method, path: &str, headers: Option<HeaderMap>) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let full_url = self
            .base_url
            .join(path)
            .map_err(|e| TallyError::SourceUnavailable(format!("cannot join {path:?}: {e}")))?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        let response = req.send().await.map_err(|e| TallyError::SourceUnavailable(e.to_string()))?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response
                .json::<T>()
                .await
                .map_err(|e| TallyError::SourceUnavailable(format!("undecodable body: {e}")))?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// GETs `path` and returns the decoded body, treating any non-2xx status
    /// as a failure.
    ///
    /// # Errors
    /// `SourceUnavailable` on any transport, status or decoding failure.
    pub async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.request::<T>(Method::GET, path, None).await?;
        match response.data {
            Some(data) if response.success => Ok(data),
            _ => Err(TallyError::SourceUnavailable(format!(
                "HTTP {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_base_url() {
        assert!(matches!(ApiClient::new("not/a/url", 0), Err(TallyError::SourceUnavailable(_))));
    }

    #[test]
    fn keeps_absolute_base_url() {
        let client = ApiClient::new("https://example.com/feed/br.json", 2).unwrap();
        assert_eq!(client.base_url().as_str(), "https://example.com/feed/br.json");
        assert_eq!(client.base_url().join("").unwrap().as_str(), "https://example.com/feed/br.json");
    }
}
