mod ingestion_service;
mod payload_encoder;

pub mod client;

pub(crate) use ingestion_service::uploader::LogIngestUploader;

pub use client::{LogicMonitorClient, LogicMonitorClientConfig, LogicMonitorClientError};
pub use ingestion_service::uploader::{IngestResponse, LogIngestError};
pub use payload_encoder::attributes::AttributePrecedence;
pub use payload_encoder::json_encoder::{EncodedBatch, LogPayloadEncoder};
