use crate::payload_encoder::attributes::{
    merge_resource_attributes, optional_value_to_string, record_attributes, AttributePrecedence,
    Attributes, ExportContext,
};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error};

const FIELD_MSG: &str = "msg";
const FIELD_RESOURCE_ID: &str = "_lm.resourceId";
const FIELD_LOG_SOURCE_TYPE: &str = "_lm.logsource_type";

const PAYLOAD_OPEN: &str = "[\n";
const PAYLOAD_CLOSE: &str = "]\n";
const RECORD_SEPARATOR: &str = ",\n";

/// One log record in the shape expected by the log ingestion API.
#[derive(Serialize)]
struct EncodedRecord<'a> {
    msg: &'a str,
    #[serde(rename = "_lm.resourceId")]
    resource_id: BTreeMap<&'a str, &'a str>,
    #[serde(flatten)]
    metadata: &'a Attributes,
}

/// A JSON array document ready to be posted to the ingestion endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBatch {
    pub payload: String,
    /// Number of records present in `payload`.
    pub records: usize,
}

/// Flattens OTLP resource logs into the ingestion JSON format.
///
/// The encoder holds configuration only. All per-batch state, including the
/// resource identity, is created inside [`LogPayloadEncoder::encode_log_batch`],
/// so one encoder can be shared between threads.
#[derive(Clone, Debug)]
pub struct LogPayloadEncoder {
    log_source_type: Option<String>,
    precedence: AttributePrecedence,
}

impl LogPayloadEncoder {
    pub fn new(log_source_type: Option<String>, precedence: AttributePrecedence) -> Self {
        LogPayloadEncoder {
            log_source_type,
            precedence,
        }
    }

    /// Encode every record under `logs`, resource by resource, scope by scope,
    /// preserving input order.
    pub fn encode_log_batch(&self, logs: &[ResourceLogs]) -> EncodedBatch {
        let mut context = ExportContext::new();
        let mut fragments = Vec::new();

        for resource_logs in logs {
            let resource_attributes = resource_logs
                .resource
                .as_ref()
                .map(|resource| resource.attributes.as_slice())
                .unwrap_or_default();

            for log_record in resource_logs
                .scope_logs
                .iter()
                .flat_map(|scope_logs| scope_logs.log_records.iter())
            {
                let mut attributes = record_attributes(&log_record.attributes);
                merge_resource_attributes(&mut attributes, resource_attributes, self.precedence);
                context.observe(&attributes);

                let body = optional_value_to_string(log_record.body.as_ref());
                match self.encode_record(&body, attributes, &context) {
                    Ok(fragment) => fragments.push(fragment),
                    Err(e) => {
                        error!(error = %e, "failed to encode log record, skipping it");
                    }
                }
            }
        }

        let records = fragments.len();
        let joined = fragments.join(RECORD_SEPARATOR);
        let mut payload =
            String::with_capacity(PAYLOAD_OPEN.len() + joined.len() + PAYLOAD_CLOSE.len());
        payload.push_str(PAYLOAD_OPEN);
        payload.push_str(&joined);
        payload.push_str(PAYLOAD_CLOSE);

        debug!(records, bytes = payload.len(), "encoded log batch");
        EncodedBatch { payload, records }
    }

    fn encode_record(
        &self,
        body: &str,
        mut metadata: Attributes,
        context: &ExportContext,
    ) -> Result<String, serde_json::Error> {
        for reserved in [FIELD_MSG, FIELD_RESOURCE_ID] {
            if metadata.remove(reserved).is_some() {
                debug!(key = reserved, "dropping attribute that collides with a reserved field");
            }
        }
        if let Some(log_source_type) = &self.log_source_type {
            metadata
                .entry(FIELD_LOG_SOURCE_TYPE.to_string())
                .or_insert_with(|| log_source_type.clone());
        }

        serde_json::to_string(&EncodedRecord {
            msg: body,
            resource_id: context.resource_id(),
            metadata: &metadata,
        })
    }
}
