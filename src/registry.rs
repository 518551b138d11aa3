use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{file, network};
use crate::error::{Result, SketchError};
use crate::generator::{self, Generator};
use crate::transform::{InputTransform, ValueRange};

/// Where to find a model and how its inputs are prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
	pub key: String,
	/// Defaults to `trained_models/<key>/generator.rsr`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub weights: Option<PathBuf>,
	pub range: ValueRange,
	#[serde(default = "default_input_size")]
	pub input_size: u32,
}

fn default_input_size() -> u32 {
	network::DEFAULT_INPUT_SIZE
}

impl ModelSpec {
	pub fn new(key: &str, range: ValueRange) -> Self {
		Self {
			key: key.to_string(),
			weights: None,
			range,
			input_size: network::DEFAULT_INPUT_SIZE,
		}
	}

	pub fn weights_path(&self, base_dir: &Path) -> PathBuf {
		let path = match self.weights {
			Some(ref path) => path.clone(),
			None => Path::new(file::MODELS_DIR).join(&self.key).join(file::WEIGHTS_FILE_NAME),
		};
		if path.is_absolute() {
			path
		} else {
			base_dir.join(path)
		}
	}
}

#[derive(Clone)]
pub struct ModelEntry {
	pub key: String,
	pub generator: Arc<dyn Generator>,
	pub transform: InputTransform,
}

impl ModelEntry {
	pub fn new(key: &str, generator: Arc<dyn Generator>, transform: InputTransform) -> Result<Self> {
		if generator.value_range() != transform.range {
			return Err(SketchError::Config(format!(
				"Model '{}' produces {} output but its input transform is {}",
				key,
				generator.value_range(),
				transform.range
			)));
		}
		Ok(Self {
			key: key.to_string(),
			generator,
			transform,
		})
	}
}

/// Models addressable by key, kept in configuration order.
#[derive(Default, Clone)]
pub struct ModelRegistry {
	entries: IndexMap<String, ModelEntry>,
}

impl ModelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// The four models served by default: a SketchGAN and a WGAN, each trained
	/// on [0, 1] and on [-1, 1] inputs.
	pub fn default_specs() -> Vec<ModelSpec> {
		vec![
			ModelSpec::new("sketchgan01", ValueRange::Unit),
			ModelSpec::new("sketchgan_11", ValueRange::Symmetric),
			ModelSpec::new("wgan01", ValueRange::Unit),
			ModelSpec::new("wgan_11", ValueRange::Symmetric),
		]
	}

	/// Loads every model. Relative weight paths resolve against `base_dir`.
	pub fn load(specs: &[ModelSpec], base_dir: &Path) -> Result<Self> {
		let mut registry = Self::new();
		for spec in specs {
			let path = spec.weights_path(base_dir);
			let generator = generator::load_generator(&path, &spec.key)?;

			let multiple = generator.config().min_input_size() as u32;
			if spec.input_size == 0 || spec.input_size % multiple != 0 {
				return Err(SketchError::Config(format!(
					"Model '{}': input_size {} is not a multiple of {}",
					spec.key, spec.input_size, multiple
				)));
			}

			info!(key = %spec.key, path = %path.display(), "Loaded {}", generator);
			let transform = InputTransform::square(spec.input_size, spec.range);
			registry.insert(ModelEntry::new(&spec.key, Arc::new(generator), transform)?)?;
		}
		Ok(registry)
	}

	pub fn insert(&mut self, entry: ModelEntry) -> Result<()> {
		if self.entries.contains_key(&entry.key) {
			return Err(SketchError::Config(format!("Duplicate model key '{}'", entry.key)));
		}
		self.entries.insert(entry.key.clone(), entry);
		Ok(())
	}

	pub fn get(&self, key: &str) -> Result<&ModelEntry> {
		self.entries
			.get(key)
			.ok_or_else(|| SketchError::ModelNotFound(key.to_string()))
	}

	pub fn keys(&self) -> Vec<String> {
		self.entries.keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::GeneratorConfig;
	use crate::generator::{save_description, GeneratorDescription};
	use tempfile::TempDir;

	fn write_model(dir: &Path, key: &str, range: ValueRange) {
		let config = GeneratorConfig::builder().depth(3).base_width(2).range(range).build();
		let desc = GeneratorDescription::random(config, 3).unwrap();
		let model_dir = dir.join(file::MODELS_DIR).join(key);
		std::fs::create_dir_all(&model_dir).unwrap();
		save_description(desc, &model_dir.join(file::WEIGHTS_FILE_NAME), false).unwrap();
	}

	fn small(key: &str, range: ValueRange) -> ModelSpec {
		ModelSpec {
			input_size: 16,
			..ModelSpec::new(key, range)
		}
	}

	#[test]
	fn default_specs_cover_four_models() {
		let keys: Vec<_> = ModelRegistry::default_specs().into_iter().map(|s| s.key).collect();
		assert_eq!(keys, vec!["sketchgan01", "sketchgan_11", "wgan01", "wgan_11"]);
	}

	#[test]
	fn loads_in_configuration_order() {
		let dir = TempDir::new().unwrap();
		write_model(dir.path(), "b", ValueRange::Symmetric);
		write_model(dir.path(), "a", ValueRange::Unit);

		let specs = vec![small("b", ValueRange::Symmetric), small("a", ValueRange::Unit)];
		let registry = ModelRegistry::load(&specs, dir.path()).unwrap();
		assert_eq!(registry.keys(), vec!["b", "a"]);
		assert_eq!(registry.get("b").unwrap().transform.range, ValueRange::Symmetric);
	}

	#[test]
	fn unknown_key_is_model_not_found() {
		let registry = ModelRegistry::new();
		let err = registry.get("wgan02").err().unwrap();
		assert_eq!(err.to_string(), "Model key 'wgan02' not found.");
	}

	#[test]
	fn range_mismatch_aborts_load() {
		let dir = TempDir::new().unwrap();
		write_model(dir.path(), "m", ValueRange::Unit);
		let result = ModelRegistry::load(&[small("m", ValueRange::Symmetric)], dir.path());
		assert!(matches!(result, Err(SketchError::Config(_))));
	}

	#[test]
	fn input_size_must_fit_depth() {
		let dir = TempDir::new().unwrap();
		write_model(dir.path(), "m", ValueRange::Unit);
		let spec = ModelSpec {
			input_size: 12,
			..ModelSpec::new("m", ValueRange::Unit)
		};
		assert!(ModelRegistry::load(&[spec], dir.path()).is_err());
	}

	#[test]
	fn missing_weights_abort_load() {
		let dir = TempDir::new().unwrap();
		let result = ModelRegistry::load(&[small("absent", ValueRange::Unit)], dir.path());
		assert!(matches!(result, Err(SketchError::FileNotFound(_))));
	}
}
