use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SketchError};
use crate::utils::error_helpers::IoErrorMapper;

pub fn read_file_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_io_err()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_io_err()?;
    Ok(data)
}

/// Writes `data`, creating missing parent directories.
pub fn write_file_bytes<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_io_err()?;
    }
    let mut file = File::create(path).map_io_err()?;
    file.write_all(data).map_io_err()?;
    Ok(())
}

pub struct PathValidator;

impl PathValidator {
    pub fn validate_input_output(
        app_m: &clap::ArgMatches,
        input_key: &str,
        output_key: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let input_path = app_m
            .value_of(input_key)
            .ok_or_else(|| SketchError::InvalidParameter(format!("No {} given", input_key)))?;
        let output_path = app_m
            .value_of(output_key)
            .ok_or_else(|| SketchError::InvalidParameter(format!("No {} given", output_key)))?;

        let input_path_buf = crate::validation::validate_input_file(input_path)?;
        crate::validation::validate_image_extension(&input_path_buf)?;
        let output_path_buf = crate::validation::validate_output_path(output_path)?;

        Ok((input_path_buf, output_path_buf))
    }
}
