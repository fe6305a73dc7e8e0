use anyhow::Result;
use warden::EngineConfig;

const REDACTED: &str = "********";

/// Prints the effective configuration with the password masked.
pub fn check_config(config: &EngineConfig) -> Result<()> {
	let mut shown = config.clone();
	if !shown.login.credentials.password.is_empty() {
		shown.login.credentials.password = REDACTED.into();
	}
	println!("{}", serde_json::to_string_pretty(&shown)?);
	Ok(())
}
