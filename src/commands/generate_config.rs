use crate::config_file::ServerConfigFile;
use crate::error::{Result, SketchError};
use clap::ArgMatches;
use std::fs;
use std::path::Path;
use tracing::info;

pub fn generate_config(app_m: &ArgMatches) -> Result<()> {
    let format = app_m.value_of("FORMAT").unwrap_or("toml");
    let default_path = if format == "json" { "sketchgan.json" } else { "sketchgan.toml" };
    let output_path = app_m.value_of("OUTPUT_FILE").unwrap_or(default_path);
    let example = app_m.is_present("EXAMPLE");

    // Check if file exists and warn
    if Path::new(output_path).exists() && !app_m.is_present("FORCE") {
        return Err(SketchError::InvalidInput(format!(
            "File {} already exists. Use --force to overwrite",
            output_path
        )));
    }

    if example {
        // Generate example configuration with comments (TOML only)
        if format != "toml" {
            return Err(SketchError::InvalidParameter(
                "Example configuration with comments is only available in TOML format".to_string(),
            ));
        }

        fs::write(output_path, ServerConfigFile::create_example_toml())?;
        info!("Generated example configuration file with comments: {}", output_path);
    } else {
        let config = ServerConfigFile::generate_default();

        match format {
            "toml" => config.to_toml_file(output_path)?,
            "json" => config.to_json_file(output_path)?,
            _ => {
                return Err(SketchError::InvalidParameter(format!(
                    "Unknown format: {}. Use 'toml' or 'json'",
                    format
                )));
            }
        }
        info!("Generated {} configuration file: {}", format.to_uppercase(), output_path);
    }

    info!("You can now edit the configuration file and use it with:");
    info!("  sketchgan serve --config {}", output_path);

    Ok(())
}
