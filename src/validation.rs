use crate::error::{Result, SketchError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Validates that a path names an existing regular file
pub fn validate_input_file(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);

    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SketchError::FileNotFound(path.to_path_buf()),
        _ => SketchError::Io(e),
    })?;

    if !metadata.is_file() {
        return Err(SketchError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Validates that the output path is writable
pub fn validate_output_path(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    
    // A bare file name has an empty parent, which is the working directory
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            return Err(SketchError::InvalidInput(format!(
                "Parent directory {} does not exist",
                parent.display()
            )));
        }
        
        if !parent.is_dir() {
            return Err(SketchError::InvalidInput(format!(
                "{} is not a directory",
                parent.display()
            )));
        }
    }
    
    // If file exists, check if it's writable
    if path.exists() && !path.is_file() {
        return Err(SketchError::InvalidInput(format!(
            "{} exists but is not a file",
            path.display()
        )));
    }
    
    Ok(path.to_path_buf())
}

/// Validates that an image file has a supported extension
pub fn validate_image_extension(path: &Path) -> Result<()> {
    let valid_extensions = ["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];
    
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    
    match extension {
        Some(ext) if valid_extensions.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(SketchError::InvalidInput(format!(
            "Unsupported image format: .{}. Supported formats: {}",
            ext,
            valid_extensions.join(", ")
        ))),
        None => Err(SketchError::InvalidInput(
            "File has no extension. Please specify an image file with a valid extension".to_string()
        )),
    }
}

/// Validates a positive integer parameter
pub fn validate_positive_int(value: &str, param_name: &str) -> Result<usize> {
    let parsed = value
        .parse::<usize>()
        .map_err(|_| SketchError::Parse(format!("{} must be a positive integer", param_name)))?;
    
    if parsed == 0 {
        return Err(SketchError::InvalidParameter(format!(
            "{} must be greater than 0",
            param_name
        )));
    }
    
    Ok(parsed)
}

/// Validates an iteration count against the configured cap
pub fn validate_iterations(value: &str, max: u32) -> Result<i64> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| SketchError::Parse(format!("iterations must be an integer, got '{}'", value)))?;

    if parsed > max as i64 {
        return Err(SketchError::InvalidParameter(format!(
            "iterations {} is out of range. Must be at most {}",
            parsed, max
        )));
    }

    Ok(parsed)
}

/// Validates a TCP port; 0 asks the OS for an ephemeral port
pub fn validate_port(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .map_err(|_| SketchError::InvalidParameter(format!("Port must be between 0 and 65535, got '{}'", value)))
}

/// Validates U-Net depth
pub fn validate_depth(depth: usize) -> Result<()> {
    match depth {
        2..=16 => Ok(()),
        _ => Err(SketchError::InvalidParameter(format!(
            "Depth {} is out of range. Must be between 2 and 16",
            depth
        ))),
    }
}
