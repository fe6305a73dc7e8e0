//! Visual screen classification.
//!
//! The target never reports failures as errors; it renders a different
//! screen. A [`ScreenClassifier`] maps a captured snapshot to the first
//! matching named signature, and [`ScreenPolicy`] maps that name to a
//! recovery action.

mod ncc;
mod policy;

use std::sync::Arc;

use image::GrayImage;
use tracing::{debug, warn};

pub use ncc::{Location, Pyramid, TemplatePyramid, best_match};
pub use policy::{ScreenAction, ScreenPolicy};

use crate::config::SignatureConfig;
use crate::error::{EngineError, Result};

/// A signature that matched a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenMatch {
	pub name: String,
	pub score: f32,
}

/// Swappable snapshot-to-signature strategy.
pub trait ScreenClassifier: Send + Sync {
	/// First signature, in priority order, whose score reaches its threshold.
	///
	/// Empty or undecodable input yields `None`.
	fn classify(&self, snapshot: &[u8]) -> Option<ScreenMatch>;
}

/// Runs `classifier` off the async workers.
pub async fn classify_blocking(classifier: Arc<dyn ScreenClassifier>, snapshot: Vec<u8>) -> Option<ScreenMatch> {
	match tokio::task::spawn_blocking(move || classifier.classify(&snapshot)).await {
		Ok(found) => found,
		Err(err) => {
			warn!(target = "warden.screen", error = %err, "classifier task failed");
			None
		}
	}
}

/// A named reference screen with its own acceptance threshold.
pub struct ScreenSignature {
	pub name: String,
	pub threshold: f32,
	template: TemplatePyramid,
}

impl std::fmt::Debug for ScreenSignature {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScreenSignature")
			.field("name", &self.name)
			.field("threshold", &self.threshold)
			.field("size", &(self.template.width(), self.template.height()))
			.finish()
	}
}

impl ScreenSignature {
	pub fn new(name: impl Into<String>, reference: &GrayImage, threshold: f32) -> Self {
		Self {
			name: name.into(),
			threshold,
			template: TemplatePyramid::new(reference),
		}
	}

	pub fn load(config: &SignatureConfig) -> Result<Self> {
		let bytes = std::fs::read(&config.path).map_err(|source| EngineError::Read {
			path: config.path.clone(),
			source,
		})?;
		let reference = image::load_from_memory(&bytes)?.to_luma8();
		Ok(Self::new(config.name.clone(), &reference, config.threshold))
	}
}

/// Per-signature result of [`TemplateClassifier::score_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureScore {
	pub name: String,
	pub threshold: f32,
	/// `None` when the reference is larger than the snapshot.
	pub score: Option<f32>,
}

/// Normalized cross-correlation against reference crops.
#[derive(Debug, Default)]
pub struct TemplateClassifier {
	signatures: Vec<ScreenSignature>,
}

impl TemplateClassifier {
	pub fn new(signatures: Vec<ScreenSignature>) -> Self {
		Self { signatures }
	}

	pub fn load(configs: &[SignatureConfig]) -> Result<Self> {
		let signatures = configs.iter().map(ScreenSignature::load).collect::<Result<Vec<_>>>()?;
		debug!(target = "warden.screen", count = signatures.len(), "screen signatures loaded");
		Ok(Self::new(signatures))
	}

	pub fn signatures(&self) -> impl Iterator<Item = &ScreenSignature> {
		self.signatures.iter()
	}

	fn decode(snapshot: &[u8]) -> Option<GrayImage> {
		if snapshot.is_empty() {
			return None;
		}
		match image::load_from_memory(snapshot) {
			Ok(decoded) => Some(decoded.to_luma8()),
			Err(err) => {
				debug!(target = "warden.screen", error = %err, "snapshot not decodable");
				None
			}
		}
	}

	fn pyramid(&self, snapshot: &GrayImage) -> Pyramid {
		let levels = self.signatures.iter().map(|s| s.template.levels()).max().unwrap_or(1);
		Pyramid::new(snapshot, levels)
	}

	/// Exact best score of every signature, ignoring thresholds.
	pub fn score_all(&self, snapshot: &[u8]) -> Vec<SignatureScore> {
		let Some(gray) = Self::decode(snapshot) else {
			return Vec::new();
		};
		let pyramid = self.pyramid(&gray);
		self.signatures
			.iter()
			.map(|signature| SignatureScore {
				name: signature.name.clone(),
				threshold: signature.threshold,
				score: best_match(&pyramid, &signature.template, 1.0).map(|l| l.score as f32),
			})
			.collect()
	}
}

impl ScreenClassifier for TemplateClassifier {
	fn classify(&self, snapshot: &[u8]) -> Option<ScreenMatch> {
		if self.signatures.is_empty() {
			return None;
		}
		let gray = Self::decode(snapshot)?;
		let pyramid = self.pyramid(&gray);

		for signature in &self.signatures {
			let Some(found) = best_match(&pyramid, &signature.template, f64::from(signature.threshold)) else {
				continue;
			};
			let score = found.score as f32;
			debug!(target = "warden.screen", screen = %signature.name, score, threshold = signature.threshold, "scored");
			if score >= signature.threshold {
				return Some(ScreenMatch {
					name: signature.name.clone(),
					score,
				});
			}
		}
		None
	}
}
