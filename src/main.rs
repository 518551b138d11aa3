use clap::ArgMatches;
use sketchgan::{cli, commands, init, Result, SketchError};
use tracing::error;

fn main() {
	let app_m = cli::build_cli();

	let result = match app_m.subcommand() {
		("serve", Some(sub_m)) => commands::serve(sub_m, cli::log_level(sub_m).or_else(|| cli::log_level(&app_m))),
		(name, Some(sub_m)) => run_command(name, sub_m, cli::log_level(sub_m).or_else(|| cli::log_level(&app_m))),
		_ => Err(SketchError::InvalidParameter("No command given".to_string())),
	};

	if let Err(err) = result {
		if tracing::dispatcher::has_been_set() {
			error!("Error: {}", err);
		} else {
			eprintln!("Error: {}", err);
		}
		std::process::exit(1);
	}
}

fn run_command(name: &str, sub_m: &ArgMatches, log_level: Option<&str>) -> Result<()> {
	let _handles = init::initialize_cli(log_level)?;

	match name {
		"process" => commands::process(sub_m),
		"import" => commands::import(sub_m),
		"init-weights" => commands::init_weights(sub_m),
		"inspect" => commands::inspect(sub_m),
		"generate-config" => commands::generate_config(sub_m),
		other => Err(SketchError::InvalidParameter(format!("Unknown command: {}", other))),
	}
}
