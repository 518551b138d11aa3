use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SketchError {
	#[error("IO error: {0}")]
	Io(#[from] io::Error),
	#[error("Image processing error: {0}")]
	Image(#[from] image::ImageError),
	#[error("Parse error: {0}")]
	Parse(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("File not found: {}", .0.display())]
	FileNotFound(PathBuf),
	#[error("Model key '{0}' not found.")]
	ModelNotFound(String),
	#[error("Weights error: {0}")]
	Weights(String),
	#[error("Shape error: {0}")]
	Shape(String),
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Server error: {0}")]
	Server(String),
}

impl From<ParseIntError> for SketchError {
	fn from(err: ParseIntError) -> Self {
		SketchError::Parse(format!("Failed to parse integer: {}", err))
	}
}

impl From<ndarray::ShapeError> for SketchError {
	fn from(err: ndarray::ShapeError) -> Self {
		SketchError::Shape(err.to_string())
	}
}

impl From<toml::de::Error> for SketchError {
	fn from(err: toml::de::Error) -> Self {
		SketchError::Parse(format!("Failed to parse TOML config: {}", err))
	}
}

impl From<serde_json::Error> for SketchError {
	fn from(err: serde_json::Error) -> Self {
		SketchError::Parse(format!("Failed to parse JSON: {}", err))
	}
}

pub type Result<T> = std::result::Result<T, SketchError>;
