mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{ErrorLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<ErrorLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Build the zoom pyramid of a dataset
	Build(tools::build::Subcommand),

	#[clap(alias = "server")]
	/// Serve the semantic map via http
	Serve(tools::serve::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Build(arguments) => tools::build::run(arguments),
		Commands::Serve(arguments) => tools::serve::run(arguments),
	}
}

#[cfg(test)]
mod tests {
	use crate::{run, Cli};
	use anyhow::Result;
	use clap::Parser;

	pub fn run_command(arg_vec: Vec<&str>) -> Result<String> {
		let cli = Cli::try_parse_from(arg_vec)?;
		let msg = format!("{:?}", cli);
		run(cli)?;
		Ok(msg)
	}

	#[test]
	fn help() {
		let err = run_command(vec!["semap"]).unwrap_err().to_string();
		assert!(err.contains("Usage: semap"), "{err}");
	}

	#[test]
	fn version() {
		let err = run_command(vec!["semap", "-V"]).unwrap_err().to_string();
		assert!(err.starts_with("semap "), "{err}");
	}

	#[test]
	fn build_subcommand() {
		let err = run_command(vec!["semap", "build"]).unwrap_err().to_string();
		assert!(err.contains("Build the zoom pyramid"), "{err}");
	}

	#[test]
	fn serve_needs_a_database() {
		let err = run_command(vec!["semap", "serve"]).unwrap_err().to_string();
		assert!(err.contains("no database configured"), "{err}");
	}
}
