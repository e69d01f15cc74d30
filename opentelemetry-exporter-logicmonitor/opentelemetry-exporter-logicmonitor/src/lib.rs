//! The OpenTelemetry LogicMonitor exporter will enable applications to use OpenTelemetry API
//! to capture log records, and send them to the LogicMonitor log ingestion API.

#![warn(missing_debug_implementations, missing_docs)]

mod logs;

pub use logs::*;
