use std::sync::Arc;

use clap::ArgMatches;
use tracing::info;

use crate::config_file::ServerConfigFile;
use crate::error::{Result, SketchError};
use crate::init;
use crate::pipeline::SketchPipeline;
use crate::registry::ModelRegistry;
use crate::validation;
use crate::web_server::WebServer;

/// Start the web API server
pub fn serve(matches: &ArgMatches, log_level: Option<&str>) -> Result<()> {
    let mut config = load_config(matches.value_of("CONFIG_FILE"))?;
    config.apply_env_overrides()?;

    // Parse configuration from command line
    if let Some(host) = matches.value_of("HOST") {
        config.server.host = host.to_string();
    }

    if let Some(port) = matches.value_of("PORT") {
        config.server.port = validation::validate_port(port)?;
    }

    if let Some(max_size) = matches.value_of("MAX_SIZE") {
        config.server.max_body_size = parse_size(max_size)?;
    }

    if matches.is_present("NO_CORS") {
        config.server.cors_enabled = false;
    }

    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }

    config.validate()?;
    let handles = init::initialize_server(&config)?;

    // Display configuration
    info!("Server configuration:");
    info!("  Host: {}", config.server.host);
    info!("  Port: {}", config.server.port);
    info!("  Max body size: {} MB", config.server.max_body_size / (1024 * 1024));
    info!("  Concurrent requests: {}", config.server.max_concurrent_requests);
    info!("  CORS: {}", if config.server.cors_enabled { "enabled" } else { "disabled" });
    info!("  Postprocess: {}", config.pipeline.postprocess);

    let registry = ModelRegistry::load(&config.models, &config.base_dir())?;
    let pipeline = SketchPipeline::new(
        Arc::new(registry),
        Arc::from(config.build_postprocess()?),
        config.pipeline.max_iterations,
    );

    let server = WebServer::new(config.to_server_config(), pipeline, handles.metrics.clone());
    info!("Press Ctrl+C to stop");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| SketchError::Server(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(server.run())
}

/// Reads `path`, or falls back to the built-in defaults.
pub fn load_config(path: Option<&str>) -> Result<ServerConfigFile> {
    match path {
        Some(path) => ServerConfigFile::from_file(path),
        None => Ok(ServerConfigFile::generate_default()),
    }
}

/// Parse size string (e.g., "10MB", "1GB")
pub fn parse_size(size_str: &str) -> Result<usize> {
    let size_str = size_str.trim().to_uppercase();
    let invalid = || SketchError::InvalidParameter(format!("Invalid size: {}", size_str));

    let (digits, multiplier) = if let Some(gb) = size_str.strip_suffix("GB") {
        (gb, 1024 * 1024 * 1024)
    } else if let Some(mb) = size_str.strip_suffix("MB") {
        (mb, 1024 * 1024)
    } else if let Some(kb) = size_str.strip_suffix("KB") {
        (kb, 1024)
    } else {
        (size_str.as_str(), 1)
    };

    let value = digits.trim().parse::<usize>().map_err(|_| invalid())?;
    let size = value.checked_mul(multiplier).ok_or_else(invalid)?;
    if size == 0 {
        return Err(invalid());
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("0MB").is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.models.len(), 4);
    }
}
