use std::fmt;

use ndarray::Array3;
use rand::Rng;
use tracing::trace;

use super::layers::{self, BatchNorm, Conv2d, ConvTranspose2d};
use super::weights::{has_down_norm, GeneratorDescription};
use super::Generator;
use crate::config::{GeneratorConfig, OutputActivation};
use crate::constants::network;
use crate::error::{Result, SketchError};
use crate::transform::ValueRange;

struct DownBlock {
	conv: Conv2d,
	norm: Option<BatchNorm>,
}

struct UpBlock {
	conv: ConvTranspose2d,
	norm: Option<BatchNorm>,
	dropout: bool,
}

/// pix2pix U-Net generator.
///
/// Encoder level `k` halves the resolution; decoder level `k` doubles it again and
/// concatenates the encoder input of level `k` in front of its output. The skip
/// branch carries the leaky-ReLU-activated tensor, which is what networks trained
/// with in-place activations were trained against.
pub struct UnetGenerator {
	config: GeneratorConfig,
	down: Vec<DownBlock>,
	up: Vec<UpBlock>,
	display: String,
}

impl UnetGenerator {
	pub fn new(desc: &GeneratorDescription, display: &str) -> Result<Self> {
		desc.validate()?;
		let config = desc.config.clone();
		let params = &desc.parameters;
		let get = |name: String| {
			params
				.get(&name)
				.ok_or_else(|| SketchError::Weights(format!("Missing tensor '{}'", name)))
		};
		let batch_norm = |prefix: String| -> Result<BatchNorm> {
			BatchNorm::new(
				get(format!("{}.weight", prefix))?,
				get(format!("{}.bias", prefix))?,
				get(format!("{}.running_mean", prefix))?,
				get(format!("{}.running_var", prefix))?,
				network::BATCH_NORM_EPSILON,
			)
		};

		let mut down = Vec::with_capacity(config.depth);
		for level in 0..config.depth {
			let conv = Conv2d::new(
				get(format!("down.{}.weight", level))?,
				params.get(&format!("down.{}.bias", level)),
				network::STRIDE,
				network::PADDING,
			)?;
			let norm = if has_down_norm(level, config.depth) {
				Some(batch_norm(format!("down.{}.norm", level))?)
			} else {
				None
			};
			down.push(DownBlock { conv, norm });
		}

		let mut up = Vec::with_capacity(config.depth);
		for level in 0..config.depth {
			let conv = ConvTranspose2d::new(
				get(format!("up.{}.weight", level))?,
				params.get(&format!("up.{}.bias", level)),
				network::STRIDE,
				network::PADDING,
			)?;
			let norm = if level > 0 { Some(batch_norm(format!("up.{}.norm", level))?) } else { None };
			up.push(UpBlock {
				conv,
				norm,
				dropout: config.has_dropout(level),
			});
		}

		Ok(Self {
			config,
			down,
			up,
			display: display.to_string(),
		})
	}

	pub fn config(&self) -> &GeneratorConfig {
		&self.config
	}

	fn check_input(&self, input: &Array3<f32>) -> Result<()> {
		let (channels, height, width) = input.dim();
		let multiple = self.config.min_input_size();
		if channels != self.config.in_channels {
			return Err(SketchError::Shape(format!(
				"Generator expects {} input channels, got {}",
				self.config.in_channels, channels
			)));
		}
		if height == 0 || width == 0 || height % multiple != 0 || width % multiple != 0 {
			return Err(SketchError::Shape(format!(
				"Input of {}x{} is not a positive multiple of {} on each side",
				width, height, multiple
			)));
		}
		Ok(())
	}

	/// Runs the network, drawing dropout masks from `rng`.
	pub fn forward_with_rng<R: Rng + ?Sized>(&self, input: &Array3<f32>, rng: &mut R) -> Result<Array3<f32>> {
		self.check_input(input)?;
		let depth = self.config.depth;
		let mut skips: Vec<Array3<f32>> = Vec::with_capacity(depth);

		let mut h = self.down[0].conv.forward(input)?;
		for level in 1..depth {
			layers::leaky_relu(&mut h, network::LEAKY_RELU_SLOPE);
			let block = &self.down[level];
			let mut next = block.conv.forward(&h)?;
			if let Some(ref norm) = block.norm {
				norm.apply(&mut next)?;
			}
			skips.push(h);
			h = next;
			trace!(level, shape = ?h.dim(), "encoder");
		}

		for level in (1..depth).rev() {
			layers::relu(&mut h);
			let block = &self.up[level];
			let mut out = block.conv.forward(&h)?;
			if let Some(ref norm) = block.norm {
				norm.apply(&mut out)?;
			}
			if block.dropout && self.config.dropout_at_inference {
				layers::dropout(&mut out, self.config.dropout, rng);
			}
			let skip = skips
				.pop()
				.ok_or_else(|| SketchError::Shape("Skip connection stack underflow".into()))?;
			h = layers::concat_channels(&skip, &out)?;
			trace!(level, shape = ?h.dim(), "decoder");
		}

		layers::relu(&mut h);
		let mut out = self.up[0].conv.forward(&h)?;
		match self.config.activation {
			OutputActivation::Tanh => layers::tanh(&mut out),
			OutputActivation::MappedTanh => layers::mapped_tanh(&mut out),
		}
		Ok(out)
	}
}

impl Generator for UnetGenerator {
	fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
		self.forward_with_rng(input, &mut rand::thread_rng())
	}

	fn value_range(&self) -> ValueRange {
		self.config.value_range()
	}

	fn describe(&self) -> String {
		self.display.clone()
	}
}

impl fmt::Display for UnetGenerator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"{} (U-Net depth {}, width {}, {} output)",
			self.display, self.config.depth, self.config.base_width, self.config.value_range()
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn generator(config: GeneratorConfig) -> UnetGenerator {
		let desc = GeneratorDescription::random(config, 42).unwrap();
		UnetGenerator::new(&desc, "test").unwrap()
	}

	#[test]
	fn output_matches_input_size_and_unit_range() {
		let config = GeneratorConfig::builder().depth(3).base_width(4).build();
		let gen = generator(config);
		let input = Array3::from_elem((1, 16, 8), 0.3);
		let out = gen.forward(&input).unwrap();
		assert_eq!(out.dim(), (1, 16, 8));
		assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
	}

	#[test]
	fn symmetric_generator_outputs_in_minus_one_to_one() {
		let config = GeneratorConfig::builder().depth(4).base_width(2).range(ValueRange::Symmetric).build();
		let gen = generator(config);
		let out = gen.forward(&Array3::from_elem((1, 16, 16), -0.5)).unwrap();
		assert!(out.iter().all(|&v| (-1.0..=1.0).contains(&v)));
		assert!(out.iter().any(|&v| v < 0.0) || out.iter().any(|&v| v > 0.0));
		assert_eq!(gen.value_range(), ValueRange::Symmetric);
	}

	#[test]
	fn rejects_inputs_not_divisible_by_two_to_the_depth() {
		let config = GeneratorConfig::builder().depth(3).base_width(2).build();
		let gen = generator(config);
		let err = gen.forward(&Array3::zeros((1, 12, 8))).unwrap_err();
		assert!(matches!(err, SketchError::Shape(_)));
		assert!(gen.forward(&Array3::zeros((2, 8, 8))).is_err());
	}

	#[test]
	fn deterministic_without_dropout() {
		let config = GeneratorConfig::builder()
			.depth(6)
			.base_width(1)
			.dropout_at_inference(false)
			.build();
		let gen = generator(config);
		let input = Array3::from_shape_fn((1, 64, 64), |(_, y, x)| ((x + y) % 7) as f32 / 7.0);
		let a = gen.forward(&input).unwrap();
		let b = gen.forward(&input).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn dropout_is_seedable() {
		let config = GeneratorConfig::builder().depth(6).base_width(1).build();
		assert!(config.has_dropout(4));
		let gen = generator(config);
		let input = Array3::from_elem((1, 64, 64), 0.5);
		let a = gen.forward_with_rng(&input, &mut StdRng::seed_from_u64(1)).unwrap();
		let b = gen.forward_with_rng(&input, &mut StdRng::seed_from_u64(1)).unwrap();
		assert_eq!(a, b);
	}
}
