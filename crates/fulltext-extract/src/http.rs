use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, IF_MODIFIED_SINCE};
use tracing::debug;

use crate::error::{ExtractError, Result};

// ─── HttpFetcher ──────────────────────────────────────────────────────────────

/// Fetches full text served as plain text over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// GET `url`. With `if_modified_since` the request is conditional; any
    /// status other than 200, including 304, is an error for the record.
    pub async fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let mut request = self.client.get(url).header(ACCEPT, "text/plain");
        if let Some(since) = if_modified_since {
            request = request.header(
                IF_MODIFIED_SINCE,
                since.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            );
        }

        let response = request.send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ExtractError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        debug!(url, bytes = body.len(), "fetched full text");
        Ok(body)
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::Timeout {
                what: format!("GET {url}"),
                secs: self.timeout.as_secs(),
            }
        } else {
            ExtractError::Http(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_fetch_plain_text() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/fulltext/2020ApJ...1..1A")
            .match_header("accept", "text/plain")
            .match_header("user-agent", "ADSClient")
            .match_header("if-modified-since", Matcher::Missing)
            .with_status(200)
            .with_body("Remote   full text.")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("ADSClient", Duration::from_secs(5)).unwrap();
        let url = format!("{}/fulltext/2020ApJ...1..1A", server.url());
        let body = fetcher.fetch(&url, None).await.unwrap();
        assert_eq!(body, "Remote   full text.");
    }

    #[tokio::test]
    async fn test_conditional_header() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/paper")
            .match_header("if-modified-since", "Tue, 05 Mar 2024 10:20:30 GMT")
            .with_status(200)
            .with_body("fresh")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("ADSClient", Duration::from_secs(5)).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap();
        let body = fetcher
            .fetch(&format!("{}/paper", server.url()), Some(since))
            .await
            .unwrap();
        assert_eq!(body, "fresh");
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("ADSClient", Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/gone", server.url()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Connections queue in the backlog and are never answered.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fetcher = HttpFetcher::new("ADSClient", Duration::from_millis(200)).unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/slow"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
        drop(listener);
    }
}
