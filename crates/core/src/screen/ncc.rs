//! Normalized cross-correlation template matching.
//!
//! Scores are the zero-mean normalized correlation coefficient in [-1, 1]
//! (1 is a pixel-exact match up to brightness and contrast). Window sums come
//! from integral images; the cross term is computed against a mean-centred
//! template, which makes centring the image window unnecessary.
//!
//! Large inputs are searched coarse-to-fine: an exhaustive scan at the
//! coarsest pyramid level keeps the best few candidates, and each finer level
//! only re-scores a small neighbourhood around them. Detail that averages
//! away when downscaled (1 px rules, dithering) can hide the true match from
//! that search, so a result below the caller's acceptance score is confirmed
//! by an exhaustive full-resolution scan.

use image::GrayImage;

/// Templates are not shrunk below this many pixels on either side.
const MIN_TEMPLATE_SIDE: usize = 8;
const MAX_LEVELS: usize = 4;
const CANDIDATES: usize = 8;
const REFINE_RADIUS: isize = 2;
/// Sum of squared deviations below this counts as a flat region.
const FLAT_EPSILON: f64 = 1e-6;
/// A pyramid level must keep at least this share of the finer level's
/// contrast (standard deviation) to be used for the coarse search.
const MIN_DETAIL_RETAINED: f64 = 0.35;

#[derive(Debug, Clone, PartialEq)]
struct Plane {
	width: usize,
	height: usize,
	pixels: Vec<f32>,
}

impl Plane {
	fn from_gray(image: &GrayImage) -> Self {
		Self {
			width: image.width() as usize,
			height: image.height() as usize,
			pixels: image.as_raw().iter().map(|&p| f32::from(p)).collect(),
		}
	}

	/// 2x2 box-filtered half-resolution copy.
	fn downsample(&self) -> Self {
		let width = self.width / 2;
		let height = self.height / 2;
		let mut pixels = Vec::with_capacity(width * height);
		for y in 0..height {
			let top = &self.pixels[(2 * y) * self.width..];
			let bottom = &self.pixels[(2 * y + 1) * self.width..];
			for x in 0..width {
				let sum = top[2 * x] + top[2 * x + 1] + bottom[2 * x] + bottom[2 * x + 1];
				pixels.push(sum / 4.0);
			}
		}
		Self { width, height, pixels }
	}
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
	stride: usize,
	sum: Vec<f64>,
	squares: Vec<f64>,
}

impl Integral {
	fn new(plane: &Plane) -> Self {
		let stride = plane.width + 1;
		let mut sum = vec![0.0; stride * (plane.height + 1)];
		let mut squares = vec![0.0; stride * (plane.height + 1)];
		for y in 0..plane.height {
			let mut row_sum = 0.0;
			let mut row_squares = 0.0;
			for x in 0..plane.width {
				let value = f64::from(plane.pixels[y * plane.width + x]);
				row_sum += value;
				row_squares += value * value;
				let at = (y + 1) * stride + x + 1;
				sum[at] = sum[at - stride] + row_sum;
				squares[at] = squares[at - stride] + row_squares;
			}
		}
		Self { stride, sum, squares }
	}

	fn window(&self, x: usize, y: usize, width: usize, height: usize) -> (f64, f64) {
		let a = y * self.stride + x;
		let b = a + width;
		let c = (y + height) * self.stride + x;
		let d = c + width;
		(
			self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
			self.squares[d] - self.squares[b] - self.squares[c] + self.squares[a],
		)
	}
}

/// A snapshot prepared for matching at several resolutions.
pub struct Pyramid {
	levels: Vec<(Plane, Integral)>,
}

impl Pyramid {
	pub fn new(image: &GrayImage, levels: usize) -> Self {
		let mut plane = Plane::from_gray(image);
		let mut out = Vec::with_capacity(levels.max(1));
		for level in 0..levels.max(1) {
			if level > 0 {
				plane = plane.downsample();
			}
			let integral = Integral::new(&plane);
			out.push((plane.clone(), integral));
		}
		Self { levels: out }
	}
}

struct Template {
	width: usize,
	height: usize,
	centred: Vec<f64>,
	norm: f64,
	/// Sum of `centred` over rows `r..height`, indexed by `r`.
	rest_sum: Vec<f64>,
	/// Sum of squared `centred` over rows `r..height`, indexed by `r`.
	rest_energy: Vec<f64>,
}

impl Template {
	fn new(plane: &Plane) -> Self {
		let count = plane.pixels.len().max(1) as f64;
		let mean = plane.pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / count;
		let centred: Vec<f64> = plane.pixels.iter().map(|&p| f64::from(p) - mean).collect();
		let norm = centred.iter().map(|v| v * v).sum::<f64>().sqrt();

		let mut rest_sum = vec![0.0; plane.height + 1];
		let mut rest_energy = vec![0.0; plane.height + 1];
		for row in (0..plane.height).rev() {
			let weights = &centred[row * plane.width..(row + 1) * plane.width];
			rest_sum[row] = rest_sum[row + 1] + weights.iter().sum::<f64>();
			rest_energy[row] = rest_energy[row + 1] + weights.iter().map(|w| w * w).sum::<f64>();
		}
		Self {
			width: plane.width,
			height: plane.height,
			centred,
			norm,
			rest_sum,
			rest_energy,
		}
	}

	fn is_flat(&self) -> bool {
		self.norm * self.norm < FLAT_EPSILON
	}

	fn std_dev(&self) -> f64 {
		self.norm / ((self.width * self.height).max(1) as f64).sqrt()
	}
}

/// A reference image prepared for coarse-to-fine matching.
pub struct TemplatePyramid {
	levels: Vec<Template>,
}

impl TemplatePyramid {
	pub fn new(image: &GrayImage) -> Self {
		let mut plane = Plane::from_gray(image);
		let mut levels = vec![Template::new(&plane)];
		while levels.len() < MAX_LEVELS && plane.width / 2 >= MIN_TEMPLATE_SIDE && plane.height / 2 >= MIN_TEMPLATE_SIDE {
			plane = plane.downsample();
			let coarser = Template::new(&plane);
			let finer = levels.last().map_or(0.0, Template::std_dev);
			if coarser.is_flat() || coarser.std_dev() < finer * MIN_DETAIL_RETAINED {
				break;
			}
			levels.push(coarser);
		}
		Self { levels }
	}

	pub fn levels(&self) -> usize {
		self.levels.len()
	}

	pub fn width(&self) -> usize {
		self.levels[0].width
	}

	pub fn height(&self) -> usize {
		self.levels[0].height
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
	pub x: usize,
	pub y: usize,
	pub score: f64,
}

fn score_at(plane: &Plane, integral: &Integral, template: &Template, x: usize, y: usize) -> f64 {
	score_above(plane, integral, template, x, y, f64::NEG_INFINITY).unwrap_or(0.0)
}

/// Score at `(x, y)`, or `None` once the remaining rows provably cannot lift
/// it above `floor`.
///
/// The bound splits the unread rows' cross term as
/// `Σ(p - m)·w + m·Σw` with `m` their window mean, and caps the first part
/// by Cauchy-Schwarz using the integral images.
fn score_above(plane: &Plane, integral: &Integral, template: &Template, x: usize, y: usize, floor: f64) -> Option<f64> {
	if template.is_flat() {
		return Some(0.0);
	}
	let count = (template.width * template.height) as f64;
	let (sum, squares) = integral.window(x, y, template.width, template.height);
	let variance = squares - sum * sum / count;
	if variance < FLAT_EPSILON {
		return Some(0.0);
	}
	let denominator = template.norm * variance.sqrt();
	let prune = floor.is_finite();

	let mut cross = 0.0;
	for row in 0..template.height {
		let start = (y + row) * plane.width + x;
		let pixels = &plane.pixels[start..start + template.width];
		let weights = &template.centred[row * template.width..(row + 1) * template.width];
		cross += pixels.iter().zip(weights).map(|(&p, &w)| f64::from(p) * w).sum::<f64>();

		let rest = template.height - row - 1;
		if prune && rest > 0 {
			let rest_count = (rest * template.width) as f64;
			let (rest_sum, rest_squares) = integral.window(x, y + row + 1, template.width, rest);
			let mean = rest_sum / rest_count;
			let energy = (rest_squares - rest_sum * mean).max(0.0);
			let bound = cross + (energy * template.rest_energy[row + 1]).sqrt() + mean * template.rest_sum[row + 1];
			if bound / denominator <= floor {
				return None;
			}
		}
	}
	Some((cross / denominator).clamp(-1.0, 1.0))
}

/// Best location over every full-resolution offset.
fn exhaustive(plane: &Plane, integral: &Integral, template: &Template) -> Option<Location> {
	let mut best: Option<Location> = None;
	for y in 0..=plane.height - template.height {
		for x in 0..=plane.width - template.width {
			let floor = best.map_or(f64::NEG_INFINITY, |b| b.score);
			if let Some(score) = score_above(plane, integral, template, x, y, floor) {
				if best.is_none_or(|b| score > b.score) {
					best = Some(Location { x, y, score });
				}
			}
		}
	}
	best
}

fn keep_best(best: &mut Vec<Location>, candidate: Location) {
	if best.len() == CANDIDATES && best.last().is_some_and(|worst| worst.score >= candidate.score) {
		return;
	}
	let at = best.partition_point(|l| l.score >= candidate.score);
	best.insert(at, candidate);
	best.truncate(CANDIDATES);
}

/// Best-scoring location of `template` inside `image`.
///
/// A coarse-to-fine candidate scoring at least `accept` is returned as is;
/// otherwise the answer comes from an exhaustive full-resolution scan, so a
/// result below `accept` is the true maximum. Returns `None` when the
/// template does not fit inside the image.
pub fn best_match(image: &Pyramid, template: &TemplatePyramid, accept: f64) -> Option<Location> {
	let (full, _) = image.levels.first()?;
	if template.width() == 0 || template.height() == 0 {
		return None;
	}
	if template.width() > full.width || template.height() > full.height {
		return None;
	}

	let top = template
		.levels
		.len()
		.min(image.levels.len())
		.saturating_sub(1);
	if top == 0 {
		return exhaustive(full, &image.levels[0].1, &template.levels[0]);
	}

	let (plane, integral) = &image.levels[top];
	let coarse = &template.levels[top];
	let mut candidates = Vec::with_capacity(CANDIDATES);
	for y in 0..=plane.height.saturating_sub(coarse.height) {
		for x in 0..=plane.width.saturating_sub(coarse.width) {
			if x + coarse.width > plane.width || y + coarse.height > plane.height {
				continue;
			}
			let score = score_at(plane, integral, coarse, x, y);
			keep_best(&mut candidates, Location { x, y, score });
		}
	}

	for level in (0..top).rev() {
		let (plane, integral) = &image.levels[level];
		let fine = &template.levels[level];
		let max_x = (plane.width - fine.width) as isize;
		let max_y = (plane.height - fine.height) as isize;
		let mut refined = Vec::with_capacity(CANDIDATES);
		for candidate in &candidates {
			let cx = (candidate.x * 2) as isize;
			let cy = (candidate.y * 2) as isize;
			let mut best: Option<Location> = None;
			for dy in -REFINE_RADIUS..=REFINE_RADIUS {
				for dx in -REFINE_RADIUS..=REFINE_RADIUS {
					let x = (cx + dx).clamp(0, max_x) as usize;
					let y = (cy + dy).clamp(0, max_y) as usize;
					let score = score_at(plane, integral, fine, x, y);
					if best.is_none_or(|b| score > b.score) {
						best = Some(Location { x, y, score });
					}
				}
			}
			if let Some(best) = best {
				keep_best(&mut refined, best);
			}
		}
		candidates = refined;
	}

	match candidates.into_iter().next() {
		Some(found) if found.score >= accept => Some(found),
		_ => exhaustive(full, &image.levels[0].1, &template.levels[0]),
	}
}
