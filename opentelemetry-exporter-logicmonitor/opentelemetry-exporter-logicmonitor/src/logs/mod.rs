mod exporter;

pub use exporter::LogicMonitorExporter;
