use std::str::FromStr;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

use crate::error::SketchError;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub enable_telemetry: bool,
    pub enable_file_logging: bool,
    pub log_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(SketchError::InvalidParameter(format!(
                "Unknown log format: {}. Use pretty, compact or json",
                s
            ))),
        }
    }
}

pub fn parse_level(level: &str) -> Result<Level, SketchError> {
    Level::from_str(level)
        .map_err(|_| SketchError::InvalidParameter(format!("Unknown log level: {}", level)))
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: Level::INFO,
            format: LogFormat::Pretty,
            enable_telemetry: true,
            enable_file_logging: false,
            log_directory: Some("logs".to_string()),
        }
    }
}

impl LogConfig {
    /// Applies `LOG_FORMAT` from the environment, if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring LOG_FORMAT: {}", e),
            }
        }
        self
    }
}

/// Initialize the logging system.
///
/// The returned guard flushes the file writer when dropped and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let fmt_layer = match config.format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.enable_file_logging {
        let log_dir = config.log_directory.clone().unwrap_or_else(|| "logs".to_string());
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = rolling::daily(&log_dir, "sketchgan.log");
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(FmtSpan::CLOSE);

        subscriber.with(file_layer).try_init()?;
        Ok(Some(guard))
    } else {
        subscriber.try_init()?;
        Ok(None)
    }
}

/// Installs the Prometheus recorder and describes the server's metrics.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("sketchgan_requests_total", "Total number of processing requests");
    describe_counter!("sketchgan_errors_total", "Total number of failed requests");
    describe_counter!("sketchgan_generator_passes_total", "Total number of generator forward passes");
    describe_histogram!("sketchgan_request_duration_seconds", "End-to-end request duration");
    describe_histogram!("sketchgan_inference_duration_seconds", "Generator loop duration");
    describe_gauge!("sketchgan_active_requests", "Requests currently being processed");

    Ok(handle)
}

/// Operation logger for tracking individual operations
pub struct OperationLogger {
    operation_id: String,
    start_time: Instant,
    metadata: IndexMap<String, String>,
}

impl OperationLogger {
    pub fn new(operation_id: impl Into<String>) -> Self {
        let operation_id = operation_id.into();
        tracing::debug!(operation_id = %operation_id, "Operation started");

        OperationLogger {
            operation_id,
            start_time: Instant::now(),
            metadata: IndexMap::new(),
        }
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl ToString) {
        self.metadata.insert(key.into(), value.to_string());
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn log_progress(&self, message: impl AsRef<str>) {
        tracing::debug!(
            operation_id = %self.operation_id,
            elapsed_ms = self.elapsed().as_millis() as u64,
            message = %message.as_ref(),
            "Operation progress"
        );
    }

    pub fn log_error(self, error: &dyn std::error::Error) {
        let elapsed = self.elapsed();
        tracing::error!(
            operation_id = %self.operation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            metadata = ?self.metadata,
            error = %error,
            "Operation failed"
        );

        metrics::counter!("sketchgan_errors_total", 1);
    }

    pub fn complete(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::info!(
            operation_id = %self.operation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            metadata = ?self.metadata,
            "Operation completed"
        );

        metrics::histogram!("sketchgan_request_duration_seconds", elapsed.as_secs_f64());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_logger() {
        let mut logger = OperationLogger::new("test_op");
        logger.add_metadata("model", "wgan01");
        logger.add_metadata("iterations", 3);
        logger.log_progress("decoded");
        assert!(logger.complete() >= Duration::ZERO);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert!(parse_level("loud").is_err());
    }
}
