use crate::constants::{pipeline, server};
use crate::error::{Result, SketchError};
use crate::logging::{parse_level, LogConfig, LogFormat};
use crate::postprocess::{Postprocess, PostprocessKind};
use crate::registry::{ModelRegistry, ModelSpec};
use crate::web_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Server configuration that can be loaded from a TOML or JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigFile {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSection,

    /// Iteration loop settings
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Logging and telemetry
    #[serde(default)]
    pub logging: LoggingSection,

    /// Served models, in the order `/models` lists them
    #[serde(default = "ModelRegistry::default_specs")]
    pub models: Vec<ModelSpec>,

    /// Directory relative weight paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Bind address (default: "0.0.0.0")
    pub host: String,

    /// Port (default: 5000)
    pub port: u16,

    /// Largest accepted request body in bytes (default: 50 MiB)
    pub max_body_size: usize,

    /// Requests allowed to run inference at the same time (default: 4)
    pub max_concurrent_requests: usize,

    /// Send permissive CORS headers (default: true)
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Postprocess between iterations: identity, clamp, threshold or median (default: threshold)
    pub postprocess: PostprocessKind,

    /// Threshold level relative to the model's value range (default: 0.5)
    pub threshold: f32,

    /// Largest accepted postprocess_value (default: 50)
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (default: "info")
    pub level: String,

    /// pretty, compact or json (default: "pretty")
    pub format: String,

    /// Also write daily-rolling JSON logs (default: false)
    pub file_logging: bool,

    /// Directory for log files (default: "logs")
    pub log_directory: String,

    /// Record Prometheus metrics and serve /metrics (default: true)
    pub telemetry: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            max_body_size: server::DEFAULT_MAX_BODY_SIZE,
            max_concurrent_requests: server::DEFAULT_MAX_CONCURRENT_REQUESTS,
            cors_enabled: true,
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            postprocess: PostprocessKind::default(),
            threshold: pipeline::DEFAULT_THRESHOLD,
            max_iterations: pipeline::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_logging: false,
            log_directory: "logs".to_string(),
            telemetry: true,
        }
    }
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self::generate_default()
    }
}

impl ServerConfigFile {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&contents)?;
        config.base_dir = parent_dir(path.as_ref());
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_json::from_str(&contents)?;
        config.base_dir = parent_dir(path.as_ref());
        Ok(config)
    }

    /// Load by extension: `.json` is JSON, anything else TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SketchError::FileNotFound(path.to_path_buf()));
        }
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path)?,
            _ => Self::from_toml_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SketchError::Serialization(format!("Failed to serialize to TOML: {}", e)))?;

        fs::write(path, contents).map_err(SketchError::Io)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SketchError::Serialization(format!("Failed to serialize to JSON: {}", e)))?;

        fs::write(path, contents).map_err(SketchError::Io)
    }

    /// Overrides the listener from `SKETCHGAN_HOST` and `SKETCHGAN_PORT`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("SKETCHGAN_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SKETCHGAN_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| SketchError::Config(format!("SKETCHGAN_PORT is not a valid port: {}", port)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SketchError::Config("server.host must not be empty".into()));
        }
        if self.server.max_body_size == 0 {
            return Err(SketchError::Config("server.max_body_size must be positive".into()));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(SketchError::Config("server.max_concurrent_requests must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.threshold) {
            return Err(SketchError::Config(format!(
                "pipeline.threshold must be within [0, 1], got {}",
                self.pipeline.threshold
            )));
        }
        if self.models.is_empty() {
            return Err(SketchError::Config("At least one [[models]] entry is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if model.key.trim().is_empty() {
                return Err(SketchError::Config("Model keys must not be empty".into()));
            }
            if !seen.insert(model.key.as_str()) {
                return Err(SketchError::Config(format!("Duplicate model key '{}'", model.key)));
            }
        }
        parse_level(&self.logging.level).map_err(|e| SketchError::Config(e.to_string()))?;
        self.logging
            .format
            .parse::<LogFormat>()
            .map_err(|e| SketchError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            max_body_size: self.server.max_body_size,
            max_concurrent_requests: self.server.max_concurrent_requests,
            cors_enabled: self.server.cors_enabled,
        }
    }

    pub fn to_log_config(&self) -> Result<LogConfig> {
        Ok(LogConfig {
            level: parse_level(&self.logging.level)?,
            format: self.logging.format.parse()?,
            enable_telemetry: self.logging.telemetry,
            enable_file_logging: self.logging.file_logging,
            log_directory: Some(self.logging.log_directory.clone()),
        })
    }

    pub fn build_postprocess(&self) -> Result<Box<dyn Postprocess>> {
        self.pipeline.postprocess.build(self.pipeline.threshold)
    }

    /// Generate a default configuration file
    pub fn generate_default() -> Self {
        Self {
            server: ServerSection::default(),
            pipeline: PipelineSection::default(),
            logging: LoggingSection::default(),
            models: ModelRegistry::default_specs(),
            base_dir: None,
        }
    }

    /// Create an example configuration file with comments
    pub fn create_example_toml() -> String {
        r#"# SketchGAN Server Configuration File

[server]
# Address and port to listen on
host = "0.0.0.0"
port = 5000

# Largest accepted image upload in bytes (50 MiB)
max_body_size = 52428800

# Requests that may run inference at the same time
max_concurrent_requests = 4

# Send Access-Control-Allow-Origin: * on every response
cors_enabled = true

[pipeline]
# Applied between generator passes when postprocess_value > 0
# identity | clamp | threshold | median
postprocess = "threshold"

# Threshold level relative to the model's value range
threshold = 0.5

# Requests asking for more iterations than this are rejected
max_iterations = 50

[logging]
# trace | debug | info | warn | error
level = "info"

# pretty | compact | json
format = "pretty"

# Write daily-rolling JSON logs to log_directory
file_logging = false
log_directory = "logs"

# Record Prometheus metrics and serve them at /metrics
telemetry = true

# Models served, in the order /models lists them.
# weights defaults to trained_models/<key>/generator.rsr, relative to this file.
# range is "unit" for [0, 1] models and "symmetric" for [-1, 1] models.
[[models]]
key = "sketchgan01"
range = "unit"
input_size = 256

[[models]]
key = "sketchgan_11"
range = "symmetric"
input_size = 256

[[models]]
key = "wgan01"
range = "unit"
input_size = 256

[[models]]
key = "wgan_11"
range = "symmetric"
input_size = 256
"#
        .to_string()
    }
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
