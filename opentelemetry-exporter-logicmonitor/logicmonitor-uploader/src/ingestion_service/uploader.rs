use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Appended to the endpoint path: `{endpoint}/rest/log/ingest`.
pub(crate) const LOG_INGEST_PATH_SEGMENTS: [&str; 3] = ["rest", "log", "ingest"];
pub(crate) const API_VERSION_HEADER: &str = "X-Version";
pub(crate) const API_VERSION: &str = "3";

/// Error types for a single delivery to the log ingestion API
#[derive(Debug, Error)]
pub enum LogIngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed response with status {status}: {source}")]
    MalformedResponse {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    #[error("Upload failed with status {status}: {message}")]
    UploadFailed { status: u16, message: String },
    #[error("Endpoint {0} cannot be used as a base URL")]
    InvalidEndpoint(String),
}

pub(crate) type Result<T> = std::result::Result<T, LogIngestError>;

/// Response from the ingestion API, successful or not
#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Posts encoded log batches to `{endpoint}/rest/log/ingest`
#[derive(Debug, Clone)]
pub(crate) struct LogIngestUploader {
    ingest_url: Url,
    http_client: Client,
}

impl LogIngestUploader {
    /// Builds the HTTP client once; `headers` are sent with every request.
    pub(crate) fn new(
        endpoint: &Url,
        headers: header::HeaderMap,
        timeout: Duration,
    ) -> Result<Self> {
        let mut ingest_url = endpoint.clone();
        ingest_url
            .path_segments_mut()
            .map_err(|()| LogIngestError::InvalidEndpoint(endpoint.to_string()))?
            .pop_if_empty()
            .extend(LOG_INGEST_PATH_SEGMENTS);

        let http_client = Client::builder()
            .http1_only()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            ingest_url,
            http_client,
        })
    }

    pub(crate) fn ingest_url(&self) -> &str {
        self.ingest_url.as_str()
    }

    /// Sends one payload. Exactly one request is made; there is no retry.
    ///
    /// The body is decoded before the status is looked at, so an unreadable
    /// body is reported as [`LogIngestError::MalformedResponse`] whatever the
    /// status was.
    pub(crate) async fn upload(&self, payload: String) -> Result<IngestResponse> {
        let response = self
            .http_client
            .post(self.ingest_url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(API_VERSION_HEADER, API_VERSION)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        let ingest_response: IngestResponse =
            serde_json::from_slice(&body).map_err(|source| LogIngestError::MalformedResponse {
                status: status.as_u16(),
                source,
            })?;

        if status == StatusCode::OK || status == StatusCode::ACCEPTED {
            Ok(ingest_response)
        } else {
            Err(LogIngestError::UploadFailed {
                status: status.as_u16(),
                message: ingest_response.message,
            })
        }
    }
}
