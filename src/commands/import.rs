use clap::ArgMatches;
use tracing::info;

use crate::error::{Result, SketchError};
use crate::generator::{save_description, GeneratorDescription};
use crate::utils::file_io::read_file_bytes;
use crate::validation;

use super::{architecture_from_args, warn_unless_rsr};

/// Converts a pickled state dict into a `.rsr` file.
pub fn import(app_m: &ArgMatches) -> Result<()> {
	let input_path = app_m
		.value_of("STATE_DICT")
		.ok_or_else(|| SketchError::InvalidParameter("No state dict given".to_string()))?;
	let output_path = app_m
		.value_of("OUTPUT_FILE")
		.ok_or_else(|| SketchError::InvalidParameter("No output file given".to_string()))?;

	let input_path = validation::validate_input_file(input_path)?;
	let output_path = validation::validate_output_path(output_path)?;
	warn_unless_rsr(&output_path);
	let config = architecture_from_args(app_m)?;

	info!("Importing {} as {} U-Net of depth {}", input_path.display(), config.value_range(), config.depth);
	let data = read_file_bytes(&input_path)?;
	let desc = GeneratorDescription::from_pickle_state_dict(&data, config)?;
	let count = desc.parameter_count();

	save_description(desc, &output_path, app_m.is_present("QUANTISE"))?;
	info!("Saved {} parameters to {}", count, output_path.display());
	Ok(())
}
