//! Client for a structured PDF conversion service that answers with TEI XML.

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tracing::{debug, error};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StructuredPdfClient {
    client: reqwest::Client,
    url: String,
}

impl StructuredPdfClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// TEI for `pdf`, or an empty string when the service cannot provide it.
    /// Failures are logged, never returned.
    pub async fn convert(&self, pdf: &Path) -> String {
        let bytes = match tokio::fs::read(pdf).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(pdf = %pdf.display(), error = %e, "cannot read PDF for structured conversion");
                return String::new();
            }
        };
        let file_name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.pdf".to_string());
        let form = Form::new().part("input", Part::bytes(bytes).file_name(file_name));

        debug!(service = %self.url, pdf = %pdf.display(), "contacting structured PDF service");
        let response = match self.client.post(&self.url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                error!(service = %self.url, "structured PDF service timed out");
                return String::new();
            }
            Err(e) => {
                error!(service = %self.url, error = %e, "structured PDF request failed");
                return String::new();
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(service = %self.url, error = %e, "cannot read structured PDF response");
                return String::new();
            }
        };
        if status != StatusCode::OK {
            error!(service = %self.url, status = status.as_u16(), body = %body, "structured PDF service error");
            return String::new();
        }
        debug!(bytes = body.len(), "structured PDF service answered");
        body
    }
}
