use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

pub fn build_cli() -> ArgMatches<'static> {
	build_app().get_matches()
}

pub fn build_app() -> App<'static, 'static> {
	App::new("sketchgan")
		.version(env!("CARGO_PKG_VERSION"))
		.author("ktheindifferent")
		.about("Completes grayscale sketches with pix2pix-style generators over HTTP")
		.settings(&[AppSettings::SubcommandRequiredElseHelp, AppSettings::VersionlessSubcommands])
		.arg(
			Arg::with_name("LOG_LEVEL")
				.long("log-level")
				.value_name("LEVEL")
				.global(true)
				.possible_values(&["trace", "debug", "info", "warn", "error"])
				.help("Log verbosity. Overrides the config file. Default: info"),
		)
		.subcommand(build_serve_subcommand())
		.subcommand(build_process_subcommand())
		.subcommand(build_import_subcommand())
		.subcommand(build_init_weights_subcommand())
		.subcommand(build_inspect_subcommand())
		.subcommand(build_generate_config_subcommand())
}

fn build_serve_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("serve")
		.about("Load the configured models and serve them over HTTP")
		.arg(build_config_arg())
		.arg(
			Arg::with_name("HOST")
				.long("host")
				.value_name("HOST")
				.help("Address to bind. Default: 0.0.0.0")
				.empty_values(false),
		)
		.arg(
			Arg::with_name("PORT")
				.short("p")
				.long("port")
				.value_name("PORT")
				.help("Port to listen on. Default: 5000")
				.empty_values(false),
		)
		.arg(
			Arg::with_name("MAX_SIZE")
				.long("max-size")
				.value_name("SIZE")
				.help("Largest accepted upload, e.g. 10MB or 512KB. Default: 50MB")
				.empty_values(false),
		)
		.arg(
			Arg::with_name("NO_CORS")
				.long("no-cors")
				.help("Do not send CORS headers")
				.takes_value(false),
		)
}

fn build_process_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("process")
		.about("Run one image through a model offline and write the PNG result")
		.arg(
			Arg::with_name("INPUT_FILE")
				.help("Sketch image to process")
				.required(true)
				.index(1),
		)
		.arg(
			Arg::with_name("OUTPUT_FILE")
				.help("Where to write the PNG result")
				.required(true)
				.index(2),
		)
		.arg(
			Arg::with_name("MODEL")
				.short("m")
				.long("model")
				.value_name("KEY")
				.required(true)
				.help("Model key from the configuration, e.g. sketchgan01")
				.empty_values(false),
		)
		.arg(
			Arg::with_name("ITERATIONS")
				.short("n")
				.long("iterations")
				.value_name("N")
				.help("Generator passes with postprocessing in between; 0 or less runs the generator once. Default: 0")
				.allow_hyphen_values(true)
				.empty_values(false),
		)
		.arg(build_config_arg())
}

fn build_import_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("import")
		.about("Convert a pickled PyTorch state dict into a .rsr weights file")
		.arg(
			Arg::with_name("STATE_DICT")
				.help("Pickle of {name: nested list} produced from the generator's state_dict()")
				.required(true)
				.index(1),
		)
		.arg(
			Arg::with_name("OUTPUT_FILE")
				.help("The .rsr file to (over)write")
				.required(true)
				.index(2),
		)
		.args(&build_architecture_args())
		.arg(build_quantise_arg())
}

fn build_init_weights_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("init-weights")
		.about("Write a randomly initialised generator, for smoke tests and demos")
		.arg(
			Arg::with_name("OUTPUT_FILE")
				.help("The .rsr file to (over)write")
				.required(true)
				.index(1),
		)
		.args(&build_architecture_args())
		.arg(
			Arg::with_name("SEED")
				.long("seed")
				.value_name("SEED")
				.help("Random seed. Default: 0")
				.empty_values(false),
		)
		.arg(build_quantise_arg())
}

fn build_inspect_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("inspect")
		.about("Print the architecture and parameter count of a weights file")
		.arg(
			Arg::with_name("WEIGHTS")
				.help("The .rsr file to inspect")
				.required(true)
				.index(1),
		)
}

fn build_generate_config_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("generate-config")
		.about("Write a server configuration file with default values")
		.arg(
			Arg::with_name("OUTPUT_FILE")
				.help("Where to write the configuration. Default: sketchgan.toml")
				.index(1),
		)
		.arg(
			Arg::with_name("FORMAT")
				.short("f")
				.long("format")
				.value_name("FORMAT")
				.possible_values(&["toml", "json"])
				.help("Output format. Default: toml"),
		)
		.arg(
			Arg::with_name("EXAMPLE")
				.long("example")
				.help("Write the commented example (TOML only)")
				.takes_value(false),
		)
		.arg(
			Arg::with_name("FORCE")
				.long("force")
				.help("Overwrite an existing file")
				.takes_value(false),
		)
}

fn build_config_arg() -> Arg<'static, 'static> {
	Arg::with_name("CONFIG_FILE")
		.short("c")
		.long("config")
		.value_name("FILE")
		.help("Server configuration file (.toml or .json)")
		.empty_values(false)
}

fn build_architecture_args() -> Vec<Arg<'static, 'static>> {
	vec![
		Arg::with_name("RANGE")
			.short("r")
			.long("range")
			.value_name("RANGE")
			.possible_values(&["unit", "symmetric", "01", "_11"])
			.help("Value range the generator works in. Default: unit"),
		Arg::with_name("DEPTH")
			.short("d")
			.long("depth")
			.value_name("DEPTH")
			.help("Number of U-Net levels. Default: 8")
			.empty_values(false),
		Arg::with_name("WIDTH")
			.short("w")
			.long("width")
			.value_name("WIDTH")
			.help("Channels of the outermost level. Default: 64")
			.empty_values(false),
	]
}

fn build_quantise_arg() -> Arg<'static, 'static> {
	Arg::with_name("QUANTISE")
		.short("q")
		.long("quantise")
		.help("Quantise the weights by zeroing the smallest 12 bits of each f32. Reduces parameter file size")
		.takes_value(false)
}

/// Log level given on the command line, if any.
pub fn log_level<'a>(matches: &'a ArgMatches) -> Option<&'a str> {
	matches.value_of("LOG_LEVEL")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_serve_overrides() {
		let m = build_app()
			.get_matches_from_safe(vec!["sketchgan", "serve", "--port", "8080", "--no-cors", "--log-level", "debug"])
			.unwrap();
		let (name, sub) = m.subcommand();
		assert_eq!(name, "serve");
		let sub = sub.unwrap();
		assert_eq!(sub.value_of("PORT"), Some("8080"));
		assert!(sub.is_present("NO_CORS"));
		assert_eq!(log_level(sub), Some("debug"));
	}

	#[test]
	fn process_requires_model() {
		let result = build_app().get_matches_from_safe(vec!["sketchgan", "process", "in.png", "out.png"]);
		assert!(result.is_err());
	}

	#[test]
	fn negative_iterations_are_values() {
		let m = build_app()
			.get_matches_from_safe(vec!["sketchgan", "process", "in.png", "out.png", "-m", "unit01", "-n", "-2"])
			.unwrap();
		let sub = m.subcommand_matches("process").unwrap();
		assert_eq!(sub.value_of("ITERATIONS"), Some("-2"));
		assert_eq!(sub.value_of("MODEL"), Some("unit01"));
	}

	#[test]
	fn rejects_unknown_range() {
		let result =
			build_app().get_matches_from_safe(vec!["sketchgan", "init-weights", "out.rsr", "--range", "wide"]);
		assert!(result.is_err());
	}
}
