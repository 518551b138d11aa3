use serde::{Deserialize, Serialize};

use crate::constants::network;
use crate::error::{Result, SketchError};
use crate::transform::ValueRange;

/// Final activation of the generator, which also fixes the value range it works in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputActivation {
	/// Plain `tanh`, output in [-1, 1].
	Tanh,
	/// `(tanh(x) + 1) / 2`, output in [0, 1].
	MappedTanh,
}

impl OutputActivation {
	pub fn value_range(self) -> ValueRange {
		match self {
			OutputActivation::Tanh => ValueRange::Symmetric,
			OutputActivation::MappedTanh => ValueRange::Unit,
		}
	}

	pub fn for_range(range: ValueRange) -> Self {
		match range {
			ValueRange::Symmetric => OutputActivation::Tanh,
			ValueRange::Unit => OutputActivation::MappedTanh,
		}
	}
}

/// Architecture of a U-Net generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
	pub in_channels: usize,
	pub out_channels: usize,
	/// Number of downsampling levels; the input side must be divisible by `2^depth`.
	pub depth: usize,
	pub base_width: usize,
	pub activation: OutputActivation,
	pub dropout: f32,
	pub dropout_at_inference: bool,
}

impl Default for GeneratorConfig {
	fn default() -> Self {
		Self {
			in_channels: network::DEFAULT_CHANNELS,
			out_channels: network::DEFAULT_CHANNELS,
			depth: network::DEFAULT_DEPTH,
			base_width: network::DEFAULT_BASE_WIDTH,
			activation: OutputActivation::MappedTanh,
			dropout: network::DEFAULT_DROPOUT,
			dropout_at_inference: true,
		}
	}
}

impl GeneratorConfig {
	pub fn builder() -> GeneratorConfigBuilder {
		GeneratorConfigBuilder::default()
	}

	pub fn validate(&self) -> Result<()> {
		if self.in_channels == 0 {
			return Err(SketchError::InvalidParameter(
				"Input channels must be greater than 0".into(),
			));
		}
		if self.out_channels == 0 {
			return Err(SketchError::InvalidParameter(
				"Output channels must be greater than 0".into(),
			));
		}
		if self.base_width == 0 {
			return Err(SketchError::InvalidParameter(
				"Base width must be greater than 0".into(),
			));
		}
		if self.depth < 2 {
			return Err(SketchError::InvalidParameter(format!(
				"Depth ({}) must be at least 2",
				self.depth
			)));
		}
		if self.depth > 16 {
			return Err(SketchError::InvalidParameter(format!(
				"Depth ({}) must be at most 16",
				self.depth
			)));
		}
		if !(0.0..1.0).contains(&self.dropout) {
			return Err(SketchError::InvalidParameter(format!(
				"Dropout ({}) must be in [0, 1)",
				self.dropout
			)));
		}
		Ok(())
	}

	/// Channel count produced by the encoder at `level`.
	pub fn channels_at(&self, level: usize) -> usize {
		let multiplier = 1usize
			.checked_shl(level as u32)
			.unwrap_or(usize::MAX)
			.min(network::MAX_WIDTH_MULTIPLIER);
		self.base_width * multiplier
	}

	/// Smallest square input the generator accepts; every input side must be a multiple of it.
	pub fn min_input_size(&self) -> usize {
		1 << self.depth
	}

	/// Whether the decoder block at `level` applies dropout.
	pub fn has_dropout(&self, level: usize) -> bool {
		self.dropout > 0.0 && level >= network::FIRST_DROPOUT_LEVEL && level + 2 <= self.depth
	}

	pub fn value_range(&self) -> ValueRange {
		self.activation.value_range()
	}
}

#[derive(Default)]
pub struct GeneratorConfigBuilder {
	in_channels: Option<usize>,
	out_channels: Option<usize>,
	depth: Option<usize>,
	base_width: Option<usize>,
	activation: Option<OutputActivation>,
	dropout: Option<f32>,
	dropout_at_inference: Option<bool>,
}

impl GeneratorConfigBuilder {
	pub fn in_channels(mut self, channels: usize) -> Self {
		self.in_channels = Some(channels);
		self
	}

	pub fn out_channels(mut self, channels: usize) -> Self {
		self.out_channels = Some(channels);
		self
	}

	pub fn depth(mut self, depth: usize) -> Self {
		self.depth = Some(depth);
		self
	}

	pub fn base_width(mut self, width: usize) -> Self {
		self.base_width = Some(width);
		self
	}

	pub fn activation(mut self, activation: OutputActivation) -> Self {
		self.activation = Some(activation);
		self
	}

	pub fn range(self, range: ValueRange) -> Self {
		self.activation(OutputActivation::for_range(range))
	}

	pub fn dropout(mut self, dropout: f32) -> Self {
		self.dropout = Some(dropout);
		self
	}

	pub fn dropout_at_inference(mut self, enabled: bool) -> Self {
		self.dropout_at_inference = Some(enabled);
		self
	}

	pub fn build(self) -> GeneratorConfig {
		let defaults = GeneratorConfig::default();
		GeneratorConfig {
			in_channels: self.in_channels.unwrap_or(defaults.in_channels),
			out_channels: self.out_channels.unwrap_or(defaults.out_channels),
			depth: self.depth.unwrap_or(defaults.depth),
			base_width: self.base_width.unwrap_or(defaults.base_width),
			activation: self.activation.unwrap_or(defaults.activation),
			dropout: self.dropout.unwrap_or(defaults.dropout),
			dropout_at_inference: self.dropout_at_inference.unwrap_or(defaults.dropout_at_inference),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn channel_widths_follow_pix2pix_layout() {
		let config = GeneratorConfig::default();
		let widths: Vec<usize> = (0..config.depth).map(|l| config.channels_at(l)).collect();
		assert_eq!(widths, vec![64, 128, 256, 512, 512, 512, 512, 512]);
	}

	#[test]
	fn dropout_levels_for_default_depth() {
		let config = GeneratorConfig::default();
		let levels: Vec<usize> = (0..config.depth).filter(|&l| config.has_dropout(l)).collect();
		assert_eq!(levels, vec![4, 5, 6]);
	}

	#[test]
	fn shallow_networks_have_no_dropout() {
		let config = GeneratorConfig::builder().depth(4).build();
		assert!((0..4).all(|l| !config.has_dropout(l)));
	}

	#[test]
	fn validate_rejects_bad_dropout() {
		let config = GeneratorConfig::builder().dropout(1.0).build();
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("Dropout"));
	}

	#[test]
	fn validate_rejects_depth_one() {
		let config = GeneratorConfig::builder().depth(1).build();
		assert!(config.validate().is_err());
	}

	#[test]
	fn builder_range_sets_activation() {
		let config = GeneratorConfig::builder().range(ValueRange::Symmetric).build();
		assert_eq!(config.activation, OutputActivation::Tanh);
		assert_eq!(config.value_range(), ValueRange::Symmetric);
		assert_eq!(config.min_input_size(), 256);
	}
}
