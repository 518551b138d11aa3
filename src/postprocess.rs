//! Transforms applied to generator output between iterative passes.

use std::fmt;
use std::str::FromStr;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::constants::pipeline;
use crate::error::{Result, SketchError};
use crate::transform::ValueRange;

pub trait Postprocess: Send + Sync {
	/// Transforms a `[C, H, W]` tensor expressed in `range`.
	fn apply(&self, image: Array3<f32>, range: ValueRange) -> Array3<f32>;

	fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostprocessKind {
	Identity,
	Clamp,
	Threshold,
	Median,
}

impl PostprocessKind {
	/// Builds the strategy. `threshold` is only read by `Threshold`.
	pub fn build(self, threshold: f32) -> Result<Box<dyn Postprocess>> {
		Ok(match self {
			PostprocessKind::Identity => Box::new(Identity),
			PostprocessKind::Clamp => Box::new(Clamp),
			PostprocessKind::Threshold => Box::new(Threshold::new(threshold)?),
			PostprocessKind::Median => Box::new(Median3),
		})
	}
}

impl Default for PostprocessKind {
	fn default() -> Self {
		PostprocessKind::Threshold
	}
}

impl FromStr for PostprocessKind {
	type Err = SketchError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_lowercase().as_str() {
			"identity" | "none" => Ok(PostprocessKind::Identity),
			"clamp" => Ok(PostprocessKind::Clamp),
			"threshold" => Ok(PostprocessKind::Threshold),
			"median" => Ok(PostprocessKind::Median),
			_ => Err(SketchError::InvalidParameter(format!(
				"Unknown postprocess: {}. Use identity, clamp, threshold or median",
				s
			))),
		}
	}
}

impl fmt::Display for PostprocessKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			PostprocessKind::Identity => "identity",
			PostprocessKind::Clamp => "clamp",
			PostprocessKind::Threshold => "threshold",
			PostprocessKind::Median => "median",
		};
		write!(f, "{}", name)
	}
}

pub struct Identity;

impl Postprocess for Identity {
	fn apply(&self, image: Array3<f32>, _range: ValueRange) -> Array3<f32> {
		image
	}

	fn name(&self) -> &str {
		"identity"
	}
}

pub struct Clamp;

impl Postprocess for Clamp {
	fn apply(&self, image: Array3<f32>, range: ValueRange) -> Array3<f32> {
		let (lo, hi) = range.bounds();
		image.mapv_into(|v| v.max(lo).min(hi))
	}

	fn name(&self) -> &str {
		"clamp"
	}
}

/// Snaps every value to the lower or upper bound of the range, turning soft
/// output back into hard strokes.
pub struct Threshold {
	level: f32,
}

impl Threshold {
	/// `level` is relative to the range: 0.5 is the midpoint in both ranges.
	pub fn new(level: f32) -> Result<Self> {
		if !(0.0..=1.0).contains(&level) {
			return Err(SketchError::InvalidParameter(format!(
				"threshold must be within [0, 1], got {}",
				level
			)));
		}
		Ok(Self { level })
	}
}

impl Default for Threshold {
	fn default() -> Self {
		Self {
			level: pipeline::DEFAULT_THRESHOLD,
		}
	}
}

impl Postprocess for Threshold {
	fn apply(&self, image: Array3<f32>, range: ValueRange) -> Array3<f32> {
		let (lo, hi) = range.bounds();
		let cut = range.lerp(self.level);
		image.mapv_into(|v| if v >= cut { hi } else { lo })
	}

	fn name(&self) -> &str {
		"threshold"
	}
}

/// 3x3 median filter per channel with replicated edges.
pub struct Median3;

impl Postprocess for Median3 {
	fn apply(&self, image: Array3<f32>, _range: ValueRange) -> Array3<f32> {
		let (channels, height, width) = image.dim();
		if height == 0 || width == 0 {
			return image;
		}
		Array3::from_shape_fn((channels, height, width), |(c, y, x)| {
			let mut window = [0f32; 9];
			let mut i = 0;
			for dy in [-1isize, 0, 1].iter() {
				for dx in [-1isize, 0, 1].iter() {
					let yy = (y as isize + dy).max(0).min(height as isize - 1) as usize;
					let xx = (x as isize + dx).max(0).min(width as isize - 1) as usize;
					window[i] = image[[c, yy, xx]];
					i += 1;
				}
			}
			window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
			window[4]
		})
	}

	fn name(&self) -> &str {
		"median"
	}
}
