//! Input transforms and the value-range bookkeeping around them.
//!
//! A model either works on images in [0, 1] (`Unit`) or on images normalised to
//! [-1, 1] with mean 0.5 and std 0.5 (`Symmetric`). The transform maps a decoded
//! grayscale image into the model's space, and `denormalize` maps generator output
//! back to [0, 1] before it is quantised to bytes.

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SketchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueRange {
	/// [0, 1]
	Unit,
	/// [-1, 1]
	Symmetric,
}

impl ValueRange {
	pub fn bounds(self) -> (f32, f32) {
		match self {
			ValueRange::Unit => (0.0, 1.0),
			ValueRange::Symmetric => (-1.0, 1.0),
		}
	}

	/// Value at relative position `t` (0 = lower bound, 1 = upper bound).
	pub fn lerp(self, t: f32) -> f32 {
		let (lo, hi) = self.bounds();
		lo + (hi - lo) * t
	}
}

impl FromStr for ValueRange {
	type Err = SketchError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_lowercase().as_str() {
			"unit" | "01" | "0_1" => Ok(ValueRange::Unit),
			"symmetric" | "_11" | "-11" | "-1_1" => Ok(ValueRange::Symmetric),
			_ => Err(SketchError::InvalidParameter(format!(
				"Unknown value range: {}. Use 'unit' or 'symmetric'",
				s
			))),
		}
	}
}

impl fmt::Display for ValueRange {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ValueRange::Unit => write!(f, "unit"),
			ValueRange::Symmetric => write!(f, "symmetric"),
		}
	}
}

/// Resize + to-tensor (+ normalise) applied to every request image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputTransform {
	pub width: u32,
	pub height: u32,
	pub range: ValueRange,
}

impl InputTransform {
	pub fn new(width: u32, height: u32, range: ValueRange) -> Self {
		Self { width, height, range }
	}

	pub fn square(size: u32, range: ValueRange) -> Self {
		Self::new(size, size, range)
	}

	/// Returns a `[1, height, width]` tensor in the model's value range.
	pub fn apply(&self, image: &GrayImage) -> Array3<f32> {
		let resized = if image.dimensions() == (self.width, self.height) {
			image.clone()
		} else {
			imageops::resize(image, self.width, self.height, FilterType::Triangle)
		};

		let range = self.range;
		Array3::from_shape_fn((1, self.height as usize, self.width as usize), |(_, y, x)| {
			let value = resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
			normalize_value(value, range)
		})
	}
}

fn normalize_value(value: f32, range: ValueRange) -> f32 {
	match range {
		ValueRange::Unit => value,
		ValueRange::Symmetric => (value - 0.5) / 0.5,
	}
}

/// Maps a tensor from `range` back to [0, 1].
pub fn denormalize(tensor: Array3<f32>, range: ValueRange) -> Array3<f32> {
	match range {
		ValueRange::Unit => tensor,
		ValueRange::Symmetric => tensor.mapv_into(|v| (v + 1.0) / 2.0),
	}
}

/// Converts a single-channel `[1, H, W]` tensor in [0, 1] to an 8-bit image.
///
/// Values are clamped to [0, 1], scaled by 255 and truncated.
pub fn to_gray_image(tensor: &Array3<f32>) -> Result<GrayImage> {
	let (channels, height, width) = tensor.dim();
	if channels != 1 {
		return Err(SketchError::Shape(format!(
			"Expected a single-channel image tensor, got {} channels",
			channels
		)));
	}

	Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
		let value = tensor[[0, y as usize, x as usize]];
		let value = if value.is_nan() { 0.0 } else { value.max(0.0).min(1.0) };
		Luma([(value * 255.0) as u8])
	}))
}
