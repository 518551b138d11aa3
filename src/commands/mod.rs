pub mod generate_config;
pub mod import;
pub mod init_weights;
pub mod inspect;
pub mod process;
pub mod serve;

pub use self::generate_config::generate_config;
pub use self::import::import;
pub use self::init_weights::init_weights;
pub use self::inspect::inspect;
pub use self::process::process;
pub use self::serve::serve;

use std::path::Path;

use clap::ArgMatches;
use tracing::warn;

use crate::config::GeneratorConfig;
use crate::constants::file;
use crate::error::Result;
use crate::transform::ValueRange;
use crate::validation;

/// Builds the generator architecture from `--range`, `--depth` and `--width`.
fn architecture_from_args(app_m: &ArgMatches) -> Result<GeneratorConfig> {
	let mut builder = GeneratorConfig::builder();
	if let Some(range) = app_m.value_of("RANGE") {
		builder = builder.range(range.parse::<ValueRange>()?);
	}
	if let Some(depth) = app_m.value_of("DEPTH") {
		let depth = validation::validate_positive_int(depth, "depth")?;
		validation::validate_depth(depth)?;
		builder = builder.depth(depth);
	}
	if let Some(width) = app_m.value_of("WIDTH") {
		builder = builder.base_width(validation::validate_positive_int(width, "width")?);
	}
	let config = builder.build();
	config.validate()?;
	Ok(config)
}

/// Warns when `path` does not carry the extension its contents will have.
fn warn_on_extension(path: &Path, expected: &str) {
	let matches = path
		.extension()
		.and_then(|e| e.to_str())
		.map_or(false, |e| e.eq_ignore_ascii_case(expected));
	if !matches {
		warn!("{} does not end in .{}; it will be written as {} anyway", path.display(), expected, expected);
	}
}

/// Weights files are written as `.rsr`.
fn warn_unless_rsr(path: &Path) {
	warn_on_extension(path, file::RSR_EXTENSION);
}
