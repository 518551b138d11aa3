pub mod network {
	pub const DEFAULT_INPUT_SIZE: u32 = 256;
	pub const DEFAULT_DEPTH: usize = 8;
	pub const DEFAULT_BASE_WIDTH: usize = 64;
	pub const DEFAULT_CHANNELS: usize = 1;
	pub const MAX_WIDTH_MULTIPLIER: usize = 8;
	pub const KERNEL_SIZE: usize = 4;
	pub const STRIDE: usize = 2;
	pub const PADDING: usize = 1;
	pub const DEFAULT_DROPOUT: f32 = 0.5;
	/// Decoder levels below this index never carry dropout.
	pub const FIRST_DROPOUT_LEVEL: usize = 4;
	pub const BATCH_NORM_EPSILON: f32 = 1e-5;
	pub const LEAKY_RELU_SLOPE: f32 = 0.2;
}

pub mod pipeline {
	pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
	pub const DEFAULT_THRESHOLD: f32 = 0.5;
}

pub mod server {
	pub const DEFAULT_HOST: &str = "0.0.0.0";
	pub const DEFAULT_PORT: u16 = 5000;
	pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;
	pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;
}

pub mod quantization {
	pub const QUANTIZE_MASK_HIGH: u8 = 0xF0;
	pub const QUANTIZE_MASK_LOW: u8 = 0x00;
}

pub mod file {
	pub const RSR_EXTENSION: &str = "rsr";
	pub const PNG_EXTENSION: &str = "png";
	pub const WEIGHTS_FILE_NAME: &str = "generator.rsr";
	pub const MODELS_DIR: &str = "trained_models";
	pub const XZ_LEVEL: u32 = 7;
	pub const SHUFFLE_STRIDE: usize = 4;
}
