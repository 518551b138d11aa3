use crate::config_file::ServerConfigFile;
use crate::error::{Result, SketchError};
use crate::logging::{init_logging, init_metrics, parse_level, LogConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// Process-wide handles that must outlive the server.
pub struct AppHandles {
    pub metrics: Option<PrometheusHandle>,
    _log_guard: Option<WorkerGuard>,
}

/// Initialize logging and panic reporting for one-shot CLI commands
pub fn initialize_cli(log_level: Option<&str>) -> Result<AppHandles> {
    let mut log_config = LogConfig::default().with_env_overrides();
    log_config.enable_telemetry = false;
    if let Some(level) = log_level {
        log_config.level = parse_level(level)?;
    }

    let guard = init_logging(&log_config)
        .map_err(|e| SketchError::Config(format!("Failed to initialize logging: {}", e)))?;
    setup_panic_handler();

    Ok(AppHandles {
        metrics: None,
        _log_guard: guard,
    })
}

/// Initialize logging, metrics and panic reporting for the server
pub fn initialize_server(config: &ServerConfigFile) -> Result<AppHandles> {
    let log_config = config.to_log_config()?.with_env_overrides();

    let guard = init_logging(&log_config)
        .map_err(|e| SketchError::Config(format!("Failed to initialize logging: {}", e)))?;
    info!("Logging system initialized");

    let metrics = if log_config.enable_telemetry {
        match init_metrics() {
            Ok(handle) => {
                info!("Metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    setup_panic_handler();

    Ok(AppHandles {
        metrics,
        _log_guard: guard,
    })
}

/// Set up custom panic handler with logging
fn setup_panic_handler() {
    let default_panic = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        error!(
            location = %location,
            message = %message,
            "Application panicked"
        );

        metrics::counter!("sketchgan_panics_total", 1);

        default_panic(panic_info);
    }));
}
