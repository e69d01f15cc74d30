//! High-level LogicMonitorClient for user code. Wraps payload_encoder and ingestion_service.

use crate::ingestion_service::uploader::{IngestResponse, LogIngestError};
use crate::payload_encoder::attributes::AttributePrecedence;
use crate::payload_encoder::json_encoder::{EncodedBatch, LogPayloadEncoder};
use crate::LogIngestUploader;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};
use url::Url;

/// Value of `_lm.logsource_type` unless configured otherwise.
pub const DEFAULT_LOG_SOURCE_TYPE: &str = "logfile";
/// Per-request timeout unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("LogicMonitorUploader/", env!("CARGO_PKG_VERSION"));

/// Configuration for LogicMonitorClient (user-facing)
#[derive(Clone, Debug)]
pub struct LogicMonitorClientConfig {
    /// Portal URL, e.g. `https://company.logicmonitor.com`. Must be an absolute
    /// http(s) URL with a host.
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub api_token: Option<String>,
    /// Static headers added to every request.
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    /// Value injected as `_lm.logsource_type` into every record. `None` disables it.
    pub log_source_type: Option<String>,
    pub attribute_precedence: AttributePrecedence,
    /// Maximum number of deliveries in flight. If None, deliveries are not limited.
    /// Values above `Semaphore::MAX_PERMITS` are clamped to it, zero is raised to one.
    pub max_concurrent_uploads: Option<usize>,
    /// User agent prefix for the application. Will be formatted as
    /// "<prefix> (LogicMonitorUploader/<version>)".
    pub user_agent_prefix: Option<&'static str>,
}

impl LogicMonitorClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            log_source_type: Some(DEFAULT_LOG_SOURCE_TYPE.to_string()),
            attribute_precedence: AttributePrecedence::default(),
            max_concurrent_uploads: None,
            user_agent_prefix: None,
        }
    }
}

/// Reasons a [`LogicMonitorClient`] cannot be constructed
#[derive(Debug, Error)]
pub enum LogicMonitorClientError {
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("LogicMonitorClient must be created inside a Tokio runtime: {0}")]
    NoRuntime(String),
    #[error("Uploader init failed: {0}")]
    Uploader(#[from] LogIngestError),
}

/// Main user-facing client for LogicMonitor log ingestion.
#[derive(Clone, Debug)]
pub struct LogicMonitorClient {
    uploader: Arc<LogIngestUploader>,
    encoder: LogPayloadEncoder,
    runtime: Handle,
    upload_permits: Option<Arc<Semaphore>>,
}

impl LogicMonitorClient {
    /// Validate the configuration and build the HTTP client.
    ///
    /// Deliveries are spawned on the Tokio runtime that is current when this is
    /// called, so later calls to [`push_logs`](Self::push_logs) may come from
    /// any thread.
    pub fn new(cfg: LogicMonitorClientConfig) -> Result<Self, LogicMonitorClientError> {
        let endpoint = validate_endpoint(&cfg.endpoint)?;
        let runtime =
            Handle::try_current().map_err(|e| LogicMonitorClientError::NoRuntime(e.to_string()))?;
        let headers = build_headers(&cfg)?;

        let uploader = LogIngestUploader::new(&endpoint, headers, cfg.timeout)?;
        debug!(
            ingest_url = uploader.ingest_url(),
            timeout_ms = cfg.timeout.as_millis() as u64,
            "LogicMonitor client initialized"
        );

        Ok(Self {
            uploader: Arc::new(uploader),
            encoder: LogPayloadEncoder::new(cfg.log_source_type, cfg.attribute_precedence),
            runtime,
            upload_permits: cfg.max_concurrent_uploads.map(|limit| {
                Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS)))
            }),
        })
    }

    /// Encode OTLP logs (as ResourceLogs) into an ingestion payload.
    pub fn encode_logs(&self, logs: &[ResourceLogs]) -> EncodedBatch {
        self.encoder.encode_log_batch(logs)
    }

    /// Encode `logs` and hand the payload to a detached delivery task.
    ///
    /// Returns as soon as the payload is built. The outcome of the delivery is
    /// only visible in the logs; failed batches are dropped.
    pub fn push_logs(&self, logs: &[ResourceLogs]) {
        let batch = self.encode_logs(logs);
        let uploader = Arc::clone(&self.uploader);
        let permits = self.upload_permits.clone();

        self.runtime.spawn(async move {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        error!(error = %e, records = batch.records, "log batch dropped");
                        return;
                    }
                },
                None => None,
            };
            // The result only matters to the log line written by deliver().
            let _ = deliver(&uploader, batch).await;
        });
    }
}

/// Send one batch and log how it went.
pub(crate) async fn deliver(
    uploader: &LogIngestUploader,
    batch: EncodedBatch,
) -> Result<IngestResponse, LogIngestError> {
    let records = batch.records;
    let result = uploader.upload(batch.payload).await;
    match &result {
        Ok(response) => {
            debug!(records, response_message = %response.message, "log batch accepted");
        }
        Err(LogIngestError::UploadFailed { status, message }) => {
            error!(records, status, "error while sending logs: {message}");
        }
        Err(LogIngestError::MalformedResponse { status, source }) => {
            error!(records, status, error = %source, "error unmarshalling ingestion response");
        }
        Err(e) => {
            error!(records, error = %e, "error in http request of logs exporter");
        }
    }
    result
}

fn validate_endpoint(endpoint: &str) -> Result<Url, LogicMonitorClientError> {
    let invalid = |reason: &str| LogicMonitorClientError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("URL must have a host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("URL must not have a query or fragment"));
    }
    Ok(url)
}

fn build_headers(cfg: &LogicMonitorClientConfig) -> Result<HeaderMap, LogicMonitorClientError> {
    let invalid = |name: &str, reason: String| LogicMonitorClientError::InvalidHeader {
        name: name.to_string(),
        reason,
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json"),
    );

    let user_agent = match cfg.user_agent_prefix {
        Some(prefix) => format!("{} ({USER_AGENT})", prefix.trim()),
        None => USER_AGENT.to_string(),
    };
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(&user_agent)
            .map_err(|e| invalid(header::USER_AGENT.as_str(), e.to_string()))?,
    );

    if let Some(token) = &cfg.api_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| invalid(header::AUTHORIZATION.as_str(), e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }

    for (name, value) in &cfg.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueValue;
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
    use opentelemetry_proto::tonic::logs::v1::{LogRecord, ScopeLogs};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn resource_logs(hostname: &str, bodies: &[&str]) -> ResourceLogs {
        let string_value = |s: &str| AnyValue {
            value: Some(AnyValueValue::StringValue(s.to_string())),
        };
        ResourceLogs {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "hostname".to_string(),
                    value: Some(string_value(hostname)),
                }],
                ..Default::default()
            }),
            scope_logs: vec![ScopeLogs {
                log_records: bodies
                    .iter()
                    .map(|body| LogRecord {
                        body: Some(string_value(body)),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn wait_for_requests(server: &MockServer, expected: usize) -> Vec<Request> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.len() >= expected || Instant::now() > deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn accepting_server() -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/log/ingest"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"message": "accepted"})),
            )
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[test]
    fn test_config_defaults() {
        let config = LogicMonitorClientConfig::new("https://company.logicmonitor.com");

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.log_source_type.as_deref(), Some("logfile"));
        assert_eq!(config.attribute_precedence, AttributePrecedence::Record);
        assert!(config.api_token.is_none());
        assert!(config.headers.is_empty());
        assert!(config.max_concurrent_uploads.is_none());
    }

    #[tokio::test]
    async fn test_invalid_endpoints_are_rejected() {
        for endpoint in [
            "",
            "not a url",
            "company.logicmonitor.com",
            "mailto:ops@example.com",
            "ftp://company.logicmonitor.com",
            "https://company.logicmonitor.com/?tenant=a",
            "https://company.logicmonitor.com/#logs",
        ] {
            let result = LogicMonitorClient::new(LogicMonitorClientConfig::new(endpoint));
            assert!(
                matches!(result, Err(LogicMonitorClientError::InvalidEndpoint { .. })),
                "endpoint {endpoint:?} should be rejected, got {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_valid_endpoint_is_accepted() {
        let client =
            LogicMonitorClient::new(LogicMonitorClientConfig::new("https://company.logicmonitor.com"));

        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected() {
        let mut config = LogicMonitorClientConfig::new("https://company.logicmonitor.com");
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());

        let result = LogicMonitorClient::new(config);

        assert!(matches!(
            result,
            Err(LogicMonitorClientError::InvalidHeader { ref name, .. }) if name == "bad header"
        ));
    }

    #[test]
    fn test_requires_tokio_runtime() {
        let result =
            LogicMonitorClient::new(LogicMonitorClientConfig::new("https://company.logicmonitor.com"));

        assert!(matches!(result, Err(LogicMonitorClientError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_push_logs_sends_configured_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/log/ingest"))
            .and(header("authorization", "Bearer secret-token"))
            .and(header("x-tenant", "acme"))
            .and(header("x-version", "3"))
            .and(header("accept", "application/json"))
            .and(header("user-agent", format!("MyApp/1.0 ({USER_AGENT})").as_str()))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"message": "accepted"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = LogicMonitorClientConfig::new(mock_server.uri());
        config.api_token = Some("secret-token".to_string());
        config
            .headers
            .insert("x-tenant".to_string(), "acme".to_string());
        config.user_agent_prefix = Some("MyApp/1.0");
        let client = LogicMonitorClient::new(config).unwrap();

        client.push_logs(&[resource_logs("host-01", &["hello"])]);

        let requests = wait_for_requests(&mock_server, 1).await;
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_push_logs_returns_before_delivery_completes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/log/ingest"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"message": "accepted"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;
        let client = LogicMonitorClient::new(LogicMonitorClientConfig::new(mock_server.uri())).unwrap();

        let start = Instant::now();
        client.push_logs(&[resource_logs("host-01", &["hello"])]);

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(wait_for_requests(&mock_server, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_push_logs_payload_content() {
        let mock_server = accepting_server().await;
        let client = LogicMonitorClient::new(LogicMonitorClientConfig::new(mock_server.uri())).unwrap();

        client.push_logs(&[resource_logs("host-01", &["first", "second"])]);

        let requests = wait_for_requests(&mock_server, 1).await;
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body,
            serde_json::json!([
                {
                    "msg": "first",
                    "_lm.resourceId": {"system.hostname": "host-01"},
                    "_lm.logsource_type": "logfile",
                    "hostname": "host-01",
                },
                {
                    "msg": "second",
                    "_lm.resourceId": {"system.hostname": "host-01"},
                    "_lm.logsource_type": "logfile",
                    "hostname": "host-01",
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_push_logs_empty_batch_still_delivers_array() {
        let mock_server = accepting_server().await;
        let client = LogicMonitorClient::new(LogicMonitorClientConfig::new(mock_server.uri())).unwrap();

        client.push_logs(&[]);

        let requests = wait_for_requests(&mock_server, 1).await;
        assert_eq!(requests[0].body, b"[\n]\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pushes_keep_their_identity() {
        let mock_server = accepting_server().await;
        let client = LogicMonitorClient::new(LogicMonitorClientConfig::new(mock_server.uri())).unwrap();

        let pushes: Vec<_> = ["host-a", "host-b", "host-c", "host-d"]
            .into_iter()
            .map(|host| {
                let client = client.clone();
                tokio::spawn(async move {
                    for _ in 0..5 {
                        client.push_logs(&[resource_logs(host, &["one", "two", "three"])]);
                    }
                })
            })
            .collect();
        for push in pushes {
            push.await.unwrap();
        }

        let requests = wait_for_requests(&mock_server, 20).await;
        assert_eq!(requests.len(), 20);
        for request in requests {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let records = body.as_array().unwrap();
            assert_eq!(records.len(), 3);
            let host = records[0]["hostname"].clone();
            for record in records {
                assert_eq!(record["_lm.resourceId"]["system.hostname"], host);
            }
        }
    }

    #[tokio::test]
    async fn test_upload_limit_still_delivers_everything() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/log/ingest"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"message": "accepted"}))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&mock_server)
            .await;
        let mut config = LogicMonitorClientConfig::new(mock_server.uri());
        config.max_concurrent_uploads = Some(1);
        let client = LogicMonitorClient::new(config).unwrap();

        for i in 0..3 {
            client.push_logs(&[resource_logs("host-01", &[format!("batch {i}").as_str()])]);
        }

        assert_eq!(wait_for_requests(&mock_server, 3).await.len(), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_upload_limits_are_clamped() {
        let mock_server = accepting_server().await;

        for limit in [usize::MAX, Semaphore::MAX_PERMITS + 1, 0] {
            let mut config = LogicMonitorClientConfig::new(mock_server.uri());
            config.max_concurrent_uploads = Some(limit);
            let client = LogicMonitorClient::new(config)
                .unwrap_or_else(|e| panic!("limit {limit} should be accepted, got {e}"));
            client.push_logs(&[resource_logs("host-01", &["hello"])]);
        }

        assert_eq!(wait_for_requests(&mock_server, 3).await.len(), 3);
    }

    #[tokio::test]
    async fn test_endpoint_path_prefix_is_kept() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/santaba/rest/log/ingest"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(serde_json::json!({"message": "accepted"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        let client = LogicMonitorClient::new(LogicMonitorClientConfig::new(format!(
            "{}/santaba/",
            mock_server.uri()
        )))
        .unwrap();

        client.push_logs(&[resource_logs("host-01", &["hello"])]);

        assert_eq!(wait_for_requests(&mock_server, 1).await.len(), 1);
    }
}
