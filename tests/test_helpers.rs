//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use sketchgan::config_file::ServerConfigFile;
use sketchgan::constants::file;
use sketchgan::generator::save_description;
use sketchgan::{GeneratorConfig, GeneratorDescription, ModelSpec, ValueRange};

/// Side length every fixture model accepts.
pub const INPUT_SIZE: u32 = 16;

/// Writes a small random U-Net to `<dir>/trained_models/<key>/generator.rsr`.
pub fn write_model(dir: &Path, key: &str, range: ValueRange) {
    let config = GeneratorConfig::builder()
        .depth(3)
        .base_width(2)
        .range(range)
        .build();
    let desc = GeneratorDescription::random(config, 17).expect("random description");
    let path = dir.join(file::MODELS_DIR).join(key).join(file::WEIGHTS_FILE_NAME);
    save_description(desc, &path, false).expect("write model");
}

/// A config serving one unit and one symmetric fixture model out of `dir`.
pub fn fixture_config(dir: &Path) -> ServerConfigFile {
    write_model(dir, "unit01", ValueRange::Unit);
    write_model(dir, "sym_11", ValueRange::Symmetric);

    let mut config = ServerConfigFile::generate_default();
    config.models = vec![
        ModelSpec {
            input_size: INPUT_SIZE,
            ..ModelSpec::new("unit01", ValueRange::Unit)
        },
        ModelSpec {
            input_size: INPUT_SIZE,
            ..ModelSpec::new("sym_11", ValueRange::Symmetric)
        },
    ];
    config.base_dir = Some(dir.to_path_buf());
    config
}

pub fn gray_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let image = GrayImage::from_pixel(width, height, Luma([value]));
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .expect("encode png");
    bytes
}

/// A diagonal stroke on white, the kind of input the models are trained on.
pub fn sketch_png(width: u32, height: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(width, height, |x, y| {
        if x == y || x + 1 == y {
            Luma([0])
        } else {
            Luma([255])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .expect("encode png");
    bytes
}

/// Assert that a Result is Ok and return the unwrapped value.
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("Expected Ok result for {}, but got error: {:?}", context, err),
    }
}
