use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Keeps one browser session logged in and healthy against a flaky web target")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to ./warden.json, then the user config dir)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start the engine, the watchdog scheduler and the control surface
	Run {
		/// Override the control surface bind address
		#[arg(long, value_name = "ADDR")]
		bind: Option<String>,
	},

	/// Classify a screenshot against the configured screen signatures
	Classify {
		/// PNG or JPEG screenshot
		image: PathBuf,
	},

	/// Load and validate the configuration, then print the effective values
	CheckConfig,
}
