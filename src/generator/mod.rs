pub mod layers;
pub mod unet;
pub mod weights;

use std::path::Path;

use ndarray::Array3;

use crate::error::{Result, SketchError};
use crate::transform::ValueRange;
use crate::utils::file_io::read_file_bytes;

pub use self::unet::UnetGenerator;
pub use self::weights::{description_from_bytes, description_to_bytes, GeneratorDescription};

/// An image-to-image network. Inputs and outputs are `[C, H, W]` tensors in
/// the generator's value range.
pub trait Generator: Send + Sync {
	fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>>;

	fn value_range(&self) -> ValueRange;

	fn describe(&self) -> String;
}

/// Reads and validates a `.rsr` weights file.
pub fn load_description(path: &Path) -> Result<GeneratorDescription> {
	if !path.exists() {
		return Err(SketchError::FileNotFound(path.to_path_buf()));
	}
	let data = read_file_bytes(path)?;
	description_from_bytes(&data).map_err(|e| match e {
		SketchError::Weights(msg) => SketchError::Weights(format!("{}: {}", path.display(), msg)),
		other => other,
	})
}

pub fn load_generator(path: &Path, display: &str) -> Result<UnetGenerator> {
	let desc = load_description(path)?;
	UnetGenerator::new(&desc, display)
}

pub fn save_description(desc: GeneratorDescription, path: &Path, quantise: bool) -> Result<()> {
	let data = description_to_bytes(desc, quantise)?;
	crate::utils::file_io::write_file_bytes(path, &data)
}
