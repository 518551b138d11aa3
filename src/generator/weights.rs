//! Generator parameter files.
//!
//! A `.rsr` file is the bincode serialisation of a [`GeneratorDescription`],
//! byte-shuffled with a stride of 4 (all first bytes of every f32, then all
//! second bytes, ...) and xz-compressed. Shuffling groups exponent bytes
//! together, which compresses floating point data considerably better.

use std::collections::HashMap;
use std::io::Read;
use std::num::FpCategory;

use bincode::{deserialize, serialize};
use byteorder::{BigEndian, ByteOrder};
use indexmap::IndexMap;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_pickle::{DeOptions, HashableValue, Value};
use tracing::debug;
use xz2::read::{XzDecoder, XzEncoder};

use crate::config::GeneratorConfig;
use crate::constants::{file, network, quantization};
use crate::error::{Result, SketchError};

const NORM_FIELDS: [&str; 4] = ["weight", "bias", "running_mean", "running_var"];

/// Network hyperparameters plus named parameter tensors in PyTorch layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorDescription {
	pub config: GeneratorConfig,
	pub parameters: IndexMap<String, ArrayD<f32>>,
}

/// A tensor the U-Net expects to find in a description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
	pub name: String,
	pub shape: Vec<usize>,
	pub required: bool,
}

impl ParameterSpec {
	fn new(name: String, shape: Vec<usize>, required: bool) -> Self {
		Self { name, shape, required }
	}
}

/// Every tensor of a U-Net with `config`, in forward order.
pub fn expected_parameters(config: &GeneratorConfig) -> Vec<ParameterSpec> {
	let k = network::KERNEL_SIZE;
	let depth = config.depth;
	let mut specs = Vec::new();

	for level in 0..depth {
		let in_c = if level == 0 { config.in_channels } else { config.channels_at(level - 1) };
		let out_c = config.channels_at(level);
		specs.push(ParameterSpec::new(format!("down.{}.weight", level), vec![out_c, in_c, k, k], true));
		specs.push(ParameterSpec::new(format!("down.{}.bias", level), vec![out_c], false));
		if has_down_norm(level, depth) {
			for field in NORM_FIELDS.iter() {
				specs.push(ParameterSpec::new(format!("down.{}.norm.{}", level, field), vec![out_c], true));
			}
		}
	}

	for level in (0..depth).rev() {
		let (in_c, out_c) = up_channels(config, level);
		specs.push(ParameterSpec::new(format!("up.{}.weight", level), vec![in_c, out_c, k, k], true));
		specs.push(ParameterSpec::new(format!("up.{}.bias", level), vec![out_c], level == 0));
		if level > 0 {
			for field in NORM_FIELDS.iter() {
				specs.push(ParameterSpec::new(format!("up.{}.norm.{}", level, field), vec![out_c], true));
			}
		}
	}
	specs
}

/// The outermost and innermost encoder convolutions are not normalised.
pub(crate) fn has_down_norm(level: usize, depth: usize) -> bool {
	level > 0 && level + 1 < depth
}

/// `(in, out)` channels of the transposed convolution at `level`.
pub(crate) fn up_channels(config: &GeneratorConfig, level: usize) -> (usize, usize) {
	let innermost = level + 1 == config.depth;
	let in_c = if innermost { config.channels_at(level) } else { 2 * config.channels_at(level) };
	let out_c = if level == 0 { config.out_channels } else { config.channels_at(level - 1) };
	(in_c, out_c)
}

impl GeneratorDescription {
	pub fn new(config: GeneratorConfig, parameters: IndexMap<String, ArrayD<f32>>) -> Result<Self> {
		let desc = Self { config, parameters };
		desc.validate()?;
		Ok(desc)
	}

	/// Checks the config and that every required tensor is present with the right shape.
	pub fn validate(&self) -> Result<()> {
		self.config.validate()?;
		for spec in expected_parameters(&self.config) {
			match self.parameters.get(&spec.name) {
				Some(tensor) if tensor.shape() != spec.shape.as_slice() => {
					return Err(SketchError::Weights(format!(
						"Tensor '{}' has shape {:?}, expected {:?}",
						spec.name,
						tensor.shape(),
						spec.shape
					)));
				}
				None if spec.required => {
					return Err(SketchError::Weights(format!("Missing tensor '{}'", spec.name)));
				}
				_ => {}
			}
		}
		Ok(())
	}

	pub fn parameter_count(&self) -> usize {
		self.parameters.values().map(|t| t.len()).sum()
	}

	/// Deterministic initialisation with PyTorch's default fan-in uniform bounds.
	///
	/// Batch norm layers start as the identity.
	pub fn random(config: GeneratorConfig, seed: u64) -> Result<Self> {
		config.validate()?;
		let mut rng = StdRng::seed_from_u64(seed);
		let mut parameters = IndexMap::new();

		for spec in expected_parameters(&config) {
			if !spec.required {
				continue;
			}
			let tensor = if spec.name.contains(".norm.") {
				let fill = if spec.name.ends_with(".weight") || spec.name.ends_with(".running_var") {
					1.0
				} else {
					0.0
				};
				ArrayD::from_elem(IxDyn(&spec.shape), fill)
			} else {
				let fan_in = if spec.shape.len() == 4 {
					spec.shape[1] * spec.shape[2] * spec.shape[3]
				} else {
					spec.shape[0]
				};
				let bound = 1.0 / (fan_in as f32).sqrt();
				ArrayD::from_shape_fn(IxDyn(&spec.shape), |_| rng.gen_range(-bound..=bound))
			};
			parameters.insert(spec.name, tensor);
		}

		Self::new(config, parameters)
	}

	/// Imports a pickled `{name: nested list of floats}` state dict.
	///
	/// Accepts both canonical names (`down.3.weight`) and the nested module names of
	/// a pix2pix `UnetGenerator` (`model.model.1.model.1.weight`). A leading
	/// `module.` left over from `DataParallel` is stripped. Entries that map to
	/// nothing in the U-Net, such as `num_batches_tracked`, are skipped.
	pub fn from_pickle_state_dict(bytes: &[u8], config: GeneratorConfig) -> Result<Self> {
		config.validate()?;
		let value = serde_pickle::value_from_slice(bytes, DeOptions::new())
			.map_err(|e| SketchError::Weights(format!("Failed to unpickle state dict: {}", e)))?;

		let entries = match value {
			Value::Dict(entries) => entries,
			_ => return Err(SketchError::Weights("State dict must be a pickled dict".into())),
		};

		let name_map = pix2pix_name_map(&config);
		let mut parameters = IndexMap::new();
		for (key, tensor) in entries.iter() {
			let key = match key {
				HashableValue::String(s) => s.as_str(),
				other => {
					return Err(SketchError::Weights(format!("State dict key {:?} is not a string", other)))
				}
			};
			let key = key.strip_prefix("module.").unwrap_or(key);
			if key.ends_with("num_batches_tracked") {
				continue;
			}

			let canonical = match name_map.get(key) {
				Some(name) => name.clone(),
				None if is_canonical_name(key) => key.to_string(),
				None => {
					debug!(key, "Skipping state dict entry with no generator counterpart");
					continue;
				}
			};
			let array = tensor_from_value(tensor).map_err(|e| match e {
				SketchError::Weights(msg) => SketchError::Weights(format!("{}: {}", key, msg)),
				other => other,
			})?;
			parameters.insert(canonical, array);
		}

		// Keep forward order regardless of the pickle's key order.
		let mut ordered = IndexMap::new();
		for spec in expected_parameters(&config) {
			if let Some(tensor) = parameters.remove(&spec.name) {
				ordered.insert(spec.name, tensor);
			}
		}

		Self::new(config, ordered)
	}
}

fn is_canonical_name(name: &str) -> bool {
	name.starts_with("down.") || name.starts_with("up.")
}

/// Maps pix2pix `UnetSkipConnectionBlock` module paths to canonical names.
///
/// Level 0 lives at `model.model.`, level 1 at `model.model.1.model.` and every deeper
/// level nests one more `3.model.` (the submodule slot of a middle block).
pub fn pix2pix_name_map(config: &GeneratorConfig) -> HashMap<String, String> {
	let depth = config.depth;
	let mut map = HashMap::new();
	let mut prefix = String::from("model.model.");

	for level in 0..depth {
		if level == 1 {
			prefix.push_str("1.model.");
		} else if level > 1 {
			prefix.push_str("3.model.");
		}

		let innermost = level + 1 == depth;
		let (down, down_norm, up, up_norm) = if level == 0 {
			(0, None, 3, None)
		} else if innermost {
			(1, None, 3, Some(4))
		} else {
			(1, Some(2), 5, Some(6))
		};

		for param in ["weight", "bias"].iter() {
			map.insert(format!("{}{}.{}", prefix, down, param), format!("down.{}.{}", level, param));
			map.insert(format!("{}{}.{}", prefix, up, param), format!("up.{}.{}", level, param));
		}
		if let Some(idx) = down_norm {
			for field in NORM_FIELDS.iter() {
				map.insert(format!("{}{}.{}", prefix, idx, field), format!("down.{}.norm.{}", level, field));
			}
		}
		if let Some(idx) = up_norm {
			for field in NORM_FIELDS.iter() {
				map.insert(format!("{}{}.{}", prefix, idx, field), format!("up.{}.norm.{}", level, field));
			}
		}
	}
	map
}

/// Flattens nested pickle lists into a tensor, inferring its shape from the nesting.
fn tensor_from_value(value: &Value) -> Result<ArrayD<f32>> {
	let mut collector = NestedCollector::default();
	collector.collect(value, 0)?;
	ArrayD::from_shape_vec(IxDyn(&collector.shape), collector.data)
		.map_err(|e| SketchError::Weights(format!("Inconsistent tensor data: {}", e)))
}

#[derive(Default)]
struct NestedCollector {
	shape: Vec<usize>,
	data: Vec<f32>,
	leaf_depth: Option<usize>,
}

impl NestedCollector {
	fn collect(&mut self, value: &Value, depth: usize) -> Result<()> {
		match value {
			Value::List(items) | Value::Tuple(items) => {
				if self.leaf_depth.map_or(false, |d| depth >= d) {
					return Err(SketchError::Weights("Ragged nested list".into()));
				}
				if self.shape.len() == depth {
					self.shape.push(items.len());
				} else if self.shape[depth] != items.len() {
					return Err(SketchError::Weights("Ragged nested list".into()));
				}
				for item in items {
					self.collect(item, depth + 1)?;
				}
				Ok(())
			}
			Value::F64(v) => self.push_leaf(*v as f32, depth),
			Value::I64(v) => self.push_leaf(*v as f32, depth),
			Value::Bool(v) => self.push_leaf(if *v { 1.0 } else { 0.0 }, depth),
			other => Err(SketchError::Weights(format!("Unsupported tensor element {:?}", other))),
		}
	}

	fn push_leaf(&mut self, value: f32, depth: usize) -> Result<()> {
		match self.leaf_depth {
			Some(d) if d != depth => return Err(SketchError::Weights("Ragged nested list".into())),
			Some(_) => {}
			None => {
				if depth != self.shape.len() {
					return Err(SketchError::Weights("Ragged nested list".into()));
				}
				self.leaf_depth = Some(depth);
			}
		}
		self.data.push(value);
		Ok(())
	}
}

/// Decompresses and deserialises a description from the `.rsr` byte format.
pub fn description_from_bytes(data: &[u8]) -> Result<GeneratorDescription> {
	let mut decompressed = Vec::new();
	XzDecoder::new(data)
		.read_to_end(&mut decompressed)
		.map_err(|e| SketchError::Weights(format!("Failed to decompress weights: {}", e)))?;
	let unshuffled = unshuffle(&decompressed, file::SHUFFLE_STRIDE);
	let desc: GeneratorDescription = deserialize(&unshuffled)
		.map_err(|e| SketchError::Weights(format!("GeneratorDescription decoding failed: {}", e)))?;
	desc.validate()?;
	Ok(desc)
}

/// Serialises and compresses a description into the `.rsr` byte format.
/// If `quantise` is set the least significant 12 bits of every value are zeroed to improve compression.
pub fn description_to_bytes(mut desc: GeneratorDescription, quantise: bool) -> Result<Vec<u8>> {
	for tensor in desc.parameters.values_mut() {
		for e in tensor.iter_mut() {
			if let FpCategory::Subnormal = e.classify() {
				*e = 0.0;
			}
			if quantise {
				let mut bytes = [0; 4];
				BigEndian::write_f32(&mut bytes, *e);
				bytes[2] &= quantization::QUANTIZE_MASK_HIGH;
				bytes[3] &= quantization::QUANTIZE_MASK_LOW;
				*e = BigEndian::read_f32(&bytes);
			}
		}
	}

	let serialized = serialize(&desc)
		.map_err(|e| SketchError::Serialization(format!("GeneratorDescription encoding failed: {}", e)))?;
	let shuffled = shuffle(&serialized, file::SHUFFLE_STRIDE);
	let mut compressed = Vec::new();
	XzEncoder::new(shuffled.as_slice(), file::XZ_LEVEL)
		.read_to_end(&mut compressed)
		.map_err(|e| SketchError::Serialization(format!("Failed to compress weights: {}", e)))?;
	Ok(compressed)
}

/// Shuffle bytes so that all first bytes of each stride are contiguous etc.
fn shuffle(data: &[u8], stride: usize) -> Vec<u8> {
	let mut vec = Vec::with_capacity(data.len());
	for offset in 0..stride {
		for i in 0..(data.len() + stride - 1 - offset) / stride {
			vec.push(data[offset + i * stride])
		}
	}
	debug_assert_eq!(vec.len(), data.len());
	vec
}

/// Inverts `shuffle()`
fn unshuffle(data: &[u8], stride: usize) -> Vec<u8> {
	let mut vec = vec![0; data.len()];
	let mut inc = 0;
	for offset in 0..stride {
		for i in 0..(data.len() + stride - 1 - offset) / stride {
			vec[offset + i * stride] = data[inc];
			inc += 1;
		}
	}
	debug_assert_eq!(inc, data.len());
	vec
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transform::ValueRange;
	use proptest::prelude::*;
	use serde_pickle::SerOptions;
	use std::collections::BTreeMap;

	fn tiny_config() -> GeneratorConfig {
		GeneratorConfig::builder().depth(3).base_width(2).build()
	}

	fn nested(tensor: &ArrayD<f32>) -> Value {
		fn build(view: ndarray::ArrayViewD<f32>) -> Value {
			if view.ndim() == 0 {
				return Value::F64(view[IxDyn(&[])] as f64);
			}
			Value::List(view.outer_iter().map(build).collect())
		}
		build(tensor.view())
	}

	#[test]
	fn expected_parameters_for_tiny_unet() {
		let specs = expected_parameters(&tiny_config());
		let required: Vec<&str> = specs.iter().filter(|s| s.required).map(|s| s.name.as_str()).collect();
		assert!(required.contains(&"down.0.weight"));
		assert!(required.contains(&"down.1.norm.running_var"));
		assert!(!required.contains(&"down.2.norm.weight"));
		assert!(required.contains(&"up.0.bias"));
		assert!(required.contains(&"up.2.norm.weight"));

		let up2 = specs.iter().find(|s| s.name == "up.2.weight").unwrap();
		assert_eq!(up2.shape, vec![8, 4, 4, 4]);
		let up1 = specs.iter().find(|s| s.name == "up.1.weight").unwrap();
		assert_eq!(up1.shape, vec![8, 2, 4, 4]);
		let up0 = specs.iter().find(|s| s.name == "up.0.weight").unwrap();
		assert_eq!(up0.shape, vec![4, 1, 4, 4]);
	}

	#[test]
	fn random_descriptions_are_deterministic() {
		let a = GeneratorDescription::random(tiny_config(), 3).unwrap();
		let b = GeneratorDescription::random(tiny_config(), 3).unwrap();
		assert_eq!(a.parameters, b.parameters);
		assert!(a.parameter_count() > 0);
	}

	#[test]
	fn validate_reports_missing_and_misshapen_tensors() {
		let mut desc = GeneratorDescription::random(tiny_config(), 1).unwrap();
		desc.parameters.remove("up.0.bias");
		assert!(desc.validate().unwrap_err().to_string().contains("up.0.bias"));

		let mut desc = GeneratorDescription::random(tiny_config(), 1).unwrap();
		desc.parameters.insert("down.0.weight".into(), ArrayD::zeros(IxDyn(&[1, 1, 4, 4])));
		assert!(desc.validate().unwrap_err().to_string().contains("shape"));
	}

	#[test]
	fn bytes_roundtrip_and_quantise() {
		let desc = GeneratorDescription::random(tiny_config(), 11).unwrap();
		let bytes = description_to_bytes(desc.clone(), false).unwrap();
		let loaded = description_from_bytes(&bytes).unwrap();
		assert_eq!(loaded.config, desc.config);
		assert_eq!(loaded.parameters, desc.parameters);

		let quantised = description_from_bytes(&description_to_bytes(desc.clone(), true).unwrap()).unwrap();
		for (a, b) in quantised.parameters["down.0.weight"].iter().zip(desc.parameters["down.0.weight"].iter()) {
			assert!((a - b).abs() <= b.abs() * 1e-3 + 1e-12);
		}
	}

	#[test]
	fn corrupt_bytes_are_rejected() {
		assert!(matches!(description_from_bytes(b"not xz"), Err(SketchError::Weights(_))));
	}

	#[test]
	fn pix2pix_names_cover_every_tensor() {
		let config = GeneratorConfig::default();
		let map = pix2pix_name_map(&config);
		assert_eq!(map["model.model.0.weight"], "down.0.weight");
		assert_eq!(map["model.model.3.bias"], "up.0.bias");
		assert_eq!(map["model.model.1.model.1.weight"], "down.1.weight");
		assert_eq!(map["model.model.1.model.2.running_mean"], "down.1.norm.running_mean");
		assert_eq!(map["model.model.1.model.3.model.5.weight"], "up.2.weight");

		let mapped: std::collections::HashSet<&String> = map.values().collect();
		for spec in expected_parameters(&config) {
			assert!(mapped.contains(&spec.name), "no pix2pix name for {}", spec.name);
		}
	}

	#[test]
	fn import_pickled_state_dict() {
		let config = tiny_config();
		let source = GeneratorDescription::random(config.clone(), 5).unwrap();
		let inverse: HashMap<String, String> =
			pix2pix_name_map(&config).into_iter().map(|(k, v)| (v, k)).collect();

		let mut dict = BTreeMap::new();
		for (name, tensor) in source.parameters.iter() {
			dict.insert(HashableValue::String(inverse[name].clone()), nested(tensor));
		}
		dict.insert(
			HashableValue::String("model.model.1.model.2.num_batches_tracked".into()),
			Value::I64(12),
		);
		let bytes = serde_pickle::value_to_vec(&Value::Dict(dict), SerOptions::new()).unwrap();

		let imported = GeneratorDescription::from_pickle_state_dict(&bytes, config).unwrap();
		assert_eq!(imported.parameters.len(), source.parameters.len());
		for (name, tensor) in source.parameters.iter() {
			let other = &imported.parameters[name];
			assert_eq!(other.shape(), tensor.shape());
			assert!(other.iter().zip(tensor.iter()).all(|(a, b)| (a - b).abs() < 1e-6));
		}
	}

	#[test]
	fn import_rejects_ragged_lists() {
		let mut dict = BTreeMap::new();
		dict.insert(
			HashableValue::String("down.0.weight".into()),
			Value::List(vec![Value::List(vec![Value::F64(1.0)]), Value::List(vec![Value::List(vec![Value::F64(2.0)])])]),
		);
		let bytes = serde_pickle::value_to_vec(&Value::Dict(dict), SerOptions::new()).unwrap();
		let config = GeneratorConfig::builder().depth(3).base_width(2).range(ValueRange::Symmetric).build();
		let err = GeneratorDescription::from_pickle_state_dict(&bytes, config).unwrap_err();
		assert!(err.to_string().contains("Ragged"));
	}

	proptest! {
		#[test]
		fn shuffle_is_inverted_by_unshuffle(data in proptest::collection::vec(any::<u8>(), 0..256)) {
			prop_assert_eq!(unshuffle(&shuffle(&data, 4), 4), data);
		}
	}
}
