use core::fmt;
use logicmonitor_uploader::LogicMonitorClient;
use opentelemetry::otel_debug;
use opentelemetry_proto::transform::common::tonic::ResourceAttributesWithSchema;
use opentelemetry_proto::transform::logs::tonic::group_logs_by_resource_and_scope;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::LogBatch;

/// An OpenTelemetry exporter that sends logs to the LogicMonitor log ingestion API.
///
/// Export never waits for the HTTP request: the batch is encoded, handed to a
/// background task, and `Ok(())` is returned. Delivery failures are only logged.
pub struct LogicMonitorExporter {
    resource: ResourceAttributesWithSchema,
    client: LogicMonitorClient,
}

impl LogicMonitorExporter {
    /// Create a new LogicMonitorExporter
    pub fn new(client: LogicMonitorClient) -> Self {
        otel_debug!(name: "LogicMonitorExporter.Created");
        Self {
            resource: ResourceAttributesWithSchema::default(),
            client,
        }
    }
}

impl fmt::Debug for LogicMonitorExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogicMonitor exporter")
    }
}

impl opentelemetry_sdk::logs::LogExporter for LogicMonitorExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let otlp = group_logs_by_resource_and_scope(batch, &self.resource);
        otel_debug!(
            name: "LogicMonitorExporter.Export",
            resource_groups = otlp.len() as i64
        );

        self.client.push_logs(&otlp);
        Ok(())
    }

    fn set_resource(&mut self, resource: &opentelemetry_sdk::Resource) {
        self.resource = resource.into();
    }
}
