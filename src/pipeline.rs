//! The request loop: decode, transform, iterate the generator, encode.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span};

use crate::constants::pipeline;
use crate::error::{Result, SketchError};
use crate::image_io;
use crate::logging::OperationLogger;
use crate::postprocess::{Postprocess, Threshold};
use crate::registry::ModelRegistry;
use crate::transform;

/// A finished request.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
	pub png: Vec<u8>,
	pub width: u32,
	pub height: u32,
	pub model_key: String,
	/// Generator passes that were run.
	pub iterations: u32,
	pub elapsed: Duration,
}

#[derive(Clone)]
pub struct SketchPipeline {
	registry: Arc<ModelRegistry>,
	postprocess: Arc<dyn Postprocess>,
	max_iterations: u32,
}

impl SketchPipeline {
	pub fn new(registry: Arc<ModelRegistry>, postprocess: Arc<dyn Postprocess>, max_iterations: u32) -> Self {
		Self {
			registry,
			postprocess,
			max_iterations,
		}
	}

	/// Pipeline with the default threshold postprocess and iteration cap.
	pub fn with_defaults(registry: Arc<ModelRegistry>) -> Self {
		Self::new(
			registry,
			Arc::new(Threshold::default()),
			pipeline::DEFAULT_MAX_ITERATIONS,
		)
	}

	pub fn registry(&self) -> &ModelRegistry {
		&self.registry
	}

	pub fn max_iterations(&self) -> u32 {
		self.max_iterations
	}

	/// Runs one request.
	///
	/// With `postprocess_value > 0` the generator and postprocess run that many
	/// times, each pass feeding on the previous one's output. Otherwise the
	/// generator runs once and the postprocess is skipped.
	pub fn process(&self, model_key: Option<&str>, postprocess_value: i64, image_bytes: &[u8]) -> Result<ProcessedImage> {
		let key = model_key.unwrap_or("None");
		let span = info_span!("process", model = %key, postprocess_value);
		let _enter = span.enter();
		info!("Processing image with model {} and postprocess value {}", key, postprocess_value);

		let mut op = OperationLogger::new(format!("process:{}", key));
		op.add_metadata("model", key);
		op.add_metadata("postprocess_value", postprocess_value);

		match self.run(key, postprocess_value, image_bytes, &mut op) {
			Ok(rendered) => {
				op.add_metadata("png_bytes", rendered.png.len());
				let elapsed = op.complete();
				metrics::counter!("sketchgan_requests_total", 1, "model" => key.to_string());

				Ok(ProcessedImage {
					png: rendered.png,
					width: rendered.width,
					height: rendered.height,
					model_key: key.to_string(),
					iterations: rendered.iterations,
					elapsed,
				})
			}
			Err(e) => {
				op.log_error(&e);
				Err(e)
			}
		}
	}

	fn run(&self, key: &str, postprocess_value: i64, image_bytes: &[u8], op: &mut OperationLogger) -> Result<Rendered> {
		if postprocess_value > self.max_iterations as i64 {
			return Err(SketchError::InvalidParameter(format!(
				"postprocess_value {} exceeds the maximum of {}",
				postprocess_value, self.max_iterations
			)));
		}

		let gray = image_io::decode_grayscale(image_bytes)?;
		let (width, height) = gray.dimensions();
		op.add_metadata("size", format!("{}x{}", width, height));

		let entry = self.registry.get(key)?;
		let generator = &entry.generator;
		let range = entry.transform.range;
		let mut image = entry.transform.apply(&gray);
		op.log_progress("input transformed");

		let iterations = if postprocess_value > 0 { postprocess_value as u32 } else { 1 };
		let inference = std::time::Instant::now();
		if postprocess_value > 0 {
			for pass in 0..iterations {
				image = self.postprocess.apply(generator.forward(&image)?, range);
				debug!(pass, postprocess = self.postprocess.name(), "Generator pass");
			}
		} else {
			image = generator.forward(&image)?;
		}
		metrics::counter!("sketchgan_generator_passes_total", iterations as u64, "model" => key.to_string());
		metrics::histogram!("sketchgan_inference_duration_seconds", inference.elapsed().as_secs_f64());

		let image = transform::denormalize(image, range);
		let output = image_io::resize(&transform::to_gray_image(&image)?, width, height);
		let png = image_io::encode_png(&output)?;

		Ok(Rendered {
			png,
			width,
			height,
			iterations,
		})
	}
}

struct Rendered {
	png: Vec<u8>,
	width: u32,
	height: u32,
	iterations: u32,
}
