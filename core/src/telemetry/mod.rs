pub mod ingest;
pub mod log;
pub mod metrics;
pub mod publisher;
pub mod report;

pub use ingest::{
    ChannelSubscriber, IngestConfig, IngestHandle, ReportSink, ReportSubscriber, StdoutSink,
    TelemetryError, TelemetryIngestor, TelemetryResult, ZmqSubscriber, DEFAULT_ENDPOINT,
};
pub use self::log::LogManager;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use publisher::{ChannelPublisher, ReportPublisher, ZmqPublisher};
pub use report::{DecodedReport, ReportError, ReportSummary, REPORT_LEN};
