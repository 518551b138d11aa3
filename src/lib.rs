//! Sketch completion server: pix2pix-style U-Net generators behind a small
//! HTTP API.
//!
//! A request carries a grayscale sketch. It is resized and normalised for the
//! chosen model, run through the generator (optionally several times with a
//! postprocess in between), mapped back to [0, 1] and returned as a PNG at the
//! original size.

pub mod cli;
pub mod commands;
pub mod config;
pub mod config_file;
pub mod constants;
pub mod error;
pub mod generator;
pub mod image_io;
pub mod init;
pub mod logging;
pub mod pipeline;
pub mod postprocess;
pub mod registry;
pub mod transform;
pub mod utils;
pub mod validation;
pub mod web_server;

pub use crate::config::{GeneratorConfig, OutputActivation};
pub use crate::error::{Result, SketchError};
pub use crate::generator::{Generator, GeneratorDescription, UnetGenerator};
pub use crate::pipeline::{ProcessedImage, SketchPipeline};
pub use crate::postprocess::{Postprocess, PostprocessKind};
pub use crate::registry::{ModelEntry, ModelRegistry, ModelSpec};
pub use crate::transform::{InputTransform, ValueRange};
