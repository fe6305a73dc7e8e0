mod check_config;
mod classify;
mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use warden::EngineConfig;

use crate::cli::{Cli, Commands};

const CONFIG_FILE: &str = "warden.json";

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = load_config(cli.config.as_deref())?;
	match cli.command {
		Commands::Run { bind } => run::run(config, bind).await,
		Commands::Classify { image } => classify::classify(&config, &image),
		Commands::CheckConfig => check_config::check_config(&config),
	}
}

/// An explicit path must exist; otherwise the working directory and then the
/// user config directory are searched, falling back to defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
	let path = match explicit {
		Some(path) => Some(path.to_path_buf()),
		None => discover_config(),
	};
	match path {
		Some(path) => {
			let config = EngineConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
			info!(target = "warden", path = %path.display(), "configuration loaded");
			Ok(config)
		}
		None => {
			info!(target = "warden", "no configuration file found; using defaults");
			let mut config = EngineConfig::default();
			config.validate()?;
			Ok(config)
		}
	}
}

fn discover_config() -> Option<PathBuf> {
	let local = PathBuf::from(CONFIG_FILE);
	if local.is_file() {
		return Some(local);
	}
	dirs::config_dir()
		.map(|dir| dir.join("warden").join(CONFIG_FILE))
		.filter(|path| path.is_file())
}
