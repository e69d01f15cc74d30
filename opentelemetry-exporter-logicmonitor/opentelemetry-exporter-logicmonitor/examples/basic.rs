//! run with `$ cargo run --example basic`
//!
//! # LogicMonitor Uploader Internal Logs
//!
//! By default, this example enables DEBUG level logs for logicmonitor_uploader, showing
//! payload encoding and the outcome of every delivery.
//!
//! ## Disable logicmonitor_uploader logs
//! ```bash
//! RUST_LOG=logicmonitor_uploader=off cargo run --example basic
//! ```

use logicmonitor_uploader::{LogicMonitorClient, LogicMonitorClientConfig};
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer;
use opentelemetry_exporter_logicmonitor::LogicMonitorExporter;
use opentelemetry_sdk::{logs::SdkLoggerProvider, Resource};
use std::env;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/*
export LOGICMONITOR_ENDPOINT="https://company.logicmonitor.com"
export LOGICMONITOR_API_TOKEN="token"
export LOGICMONITOR_HOSTNAME="web-01"
*/

#[tokio::main]
async fn main() {
    let endpoint =
        env::var("LOGICMONITOR_ENDPOINT").expect("LOGICMONITOR_ENDPOINT is required");
    let hostname =
        env::var("LOGICMONITOR_HOSTNAME").unwrap_or_else(|_| "default-host".to_string());

    let mut config = LogicMonitorClientConfig::new(endpoint);
    config.api_token = env::var("LOGICMONITOR_API_TOKEN").ok();
    config.user_agent_prefix = Some("LogicMonitorBasicExample/0.1");

    let client = LogicMonitorClient::new(config).expect("Failed to create LogicMonitorClient");
    let exporter = LogicMonitorExporter::new(client);

    let provider = SdkLoggerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name("logicmonitor-basic-example")
                .with_attribute(KeyValue::new("hostname", hostname))
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();

    // Logs from the exporter pipeline itself must not be fed back into it.
    let filter_otel = EnvFilter::new("info")
        .add_directive("hyper=off".parse().unwrap())
        .add_directive("opentelemetry=off".parse().unwrap())
        .add_directive("reqwest=off".parse().unwrap())
        .add_directive("logicmonitor_uploader=off".parse().unwrap());
    let otel_layer = layer::OpenTelemetryTracingBridge::new(&provider).with_filter(filter_otel);

    // Print the exporter's own logs to stdout.
    let filter_fmt = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info").add_directive("logicmonitor_uploader=debug".parse().unwrap())
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer)
        .init();

    info!(name: "Log", target: "my-system", event_id = 20, user_name = "user1", user_email = "user1@opentelemetry.io", message = "Registration successful");
    warn!(name: "Log", target: "my-system", event_id = 23, component = "checkout", message = "Payment took longer than expected");
    error!(name: "Log", target: "my-system", event_id = 31, order_id = "A-1001", message = "Order failed: \"card declined\"");

    // Force the batch processor to export, then give the detached delivery time to finish.
    let _ = provider.force_flush();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let _ = provider.shutdown();
}
