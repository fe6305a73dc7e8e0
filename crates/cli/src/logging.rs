use tracing_subscriber::EnvFilter;

/// Installs the global subscriber; `RUST_LOG` overrides the verbosity flag.
pub fn init_logging(verbosity: u8) {
	let default = match verbosity {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.with_writer(std::io::stderr)
		.try_init();
}
