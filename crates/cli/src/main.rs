use clap::Parser;
use tracing::error;
use warden_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		error!(target = "warden", error = %format!("{err:#}"), "command failed");
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}
