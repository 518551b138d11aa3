use clap::ArgMatches;
use tracing::info;

use crate::error::{Result, SketchError};
use crate::generator::{save_description, GeneratorDescription};
use crate::utils::error_helpers::ParseErrorMapper;
use crate::validation;

use super::{architecture_from_args, warn_unless_rsr};

pub fn init_weights(app_m: &ArgMatches) -> Result<()> {
	let output_path = app_m
		.value_of("OUTPUT_FILE")
		.ok_or_else(|| SketchError::InvalidParameter("No output file given".to_string()))?;
	let output_path = validation::validate_output_path(output_path)?;
	warn_unless_rsr(&output_path);

	let config = architecture_from_args(app_m)?;
	let seed = match app_m.value_of("SEED") {
		Some(seed) => seed.parse::<u64>().map_parse_err("seed")?,
		None => 0,
	};

	let desc = GeneratorDescription::random(config, seed)?;
	let count = desc.parameter_count();
	save_description(desc, &output_path, app_m.is_present("QUANTISE"))?;

	info!("Wrote random generator ({} parameters, seed {}) to {}", count, seed, output_path.display());
	Ok(())
}
