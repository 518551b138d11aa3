use std::sync::Arc;

use clap::ArgMatches;
use tracing::info;

use crate::constants::file;
use crate::error::{Result, SketchError};
use crate::pipeline::SketchPipeline;
use crate::registry::ModelRegistry;
use crate::utils::file_io::{read_file_bytes, write_file_bytes, PathValidator};
use crate::validation;

use super::serve::load_config;
use super::warn_on_extension;

pub fn process(app_m: &ArgMatches) -> Result<()> {
	let (input_path, output_path) = PathValidator::validate_input_output(app_m, "INPUT_FILE", "OUTPUT_FILE")?;
	warn_on_extension(&output_path, file::PNG_EXTENSION);
	let key = app_m
		.value_of("MODEL")
		.ok_or_else(|| SketchError::InvalidParameter("No model given".to_string()))?;

	let config = load_config(app_m.value_of("CONFIG_FILE"))?;
	let iterations = match app_m.value_of("ITERATIONS") {
		Some(value) => validation::validate_iterations(value, config.pipeline.max_iterations)?,
		None => 0,
	};

	// Only the requested model is loaded
	let spec = config
		.models
		.iter()
		.find(|spec| spec.key == key)
		.ok_or_else(|| SketchError::ModelNotFound(key.to_string()))?;
	let registry = ModelRegistry::load(std::slice::from_ref(spec), &config.base_dir())?;
	let pipeline = SketchPipeline::new(
		Arc::new(registry),
		Arc::from(config.build_postprocess()?),
		config.pipeline.max_iterations,
	);

	let input = read_file_bytes(&input_path)?;
	let result = pipeline.process(Some(key), iterations, &input)?;
	write_file_bytes(&output_path, &result.png)?;

	info!(
		"Wrote {}x{} result from {} ({} pass(es), {:.2?}) to {}",
		result.width,
		result.height,
		result.model_key,
		result.iterations,
		result.elapsed,
		output_path.display()
	);
	Ok(())
}
