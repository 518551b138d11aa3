use std::path::Path;

use clap::ArgMatches;

use crate::error::{Result, SketchError};
use crate::generator::load_description;

pub fn inspect(app_m: &ArgMatches) -> Result<()> {
	let path = app_m
		.value_of("WEIGHTS")
		.ok_or_else(|| SketchError::InvalidParameter("No weights file given".to_string()))?;
	let desc = load_description(Path::new(path))?;
	let config = &desc.config;

	println!("{}", path);
	println!("  Architecture:   U-Net, depth {}, base width {}", config.depth, config.base_width);
	println!("  Channels:       {} in, {} out", config.in_channels, config.out_channels);
	println!("  Activation:     {:?} ({} range)", config.activation, config.value_range());
	println!(
		"  Dropout:        {} ({} at inference)",
		config.dropout,
		if config.dropout_at_inference { "active" } else { "inactive" }
	);
	println!("  Input multiple: {}", config.min_input_size());
	println!("  Tensors:        {}", desc.parameters.len());
	println!("  Parameters:     {}", desc.parameter_count());
	Ok(())
}
