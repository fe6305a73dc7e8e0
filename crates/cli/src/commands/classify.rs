use std::path::Path;

use anyhow::{Context, Result, bail};
use warden::EngineConfig;
use warden::screen::{ScreenClassifier, TemplateClassifier};

/// Scores every signature, then prints the first match in priority order.
pub fn classify(config: &EngineConfig, image: &Path) -> Result<()> {
	if config.screens.signatures.is_empty() {
		bail!("no screen signatures configured");
	}
	let classifier = TemplateClassifier::load(&config.screens.signatures)?;
	let snapshot = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;

	for score in classifier.score_all(&snapshot) {
		let shown = score.score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "-".into());
		println!("{}\t{shown}\t(threshold {:.2})", score.name, score.threshold);
	}
	match classifier.classify(&snapshot) {
		Some(found) => println!("match: {} ({:.3})", found.name, found.score),
		None => println!("match: NONE"),
	}
	Ok(())
}
