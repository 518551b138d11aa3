use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};

use crate::error::{Result, SketchError};

/// Decodes any supported image format and converts it to 8-bit grayscale.
///
/// Uses ITU-R BT.601 luma weights; alpha is discarded rather than composited.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage> {
	if bytes.is_empty() {
		return Err(SketchError::InvalidInput("Request body contains no image data".into()));
	}

	let decoded = image::load_from_memory(bytes)?;
	Ok(match decoded {
		DynamicImage::ImageLuma8(gray) => gray,
		other => rgb_to_luma(&other),
	})
}

fn rgb_to_luma(image: &DynamicImage) -> GrayImage {
	let rgb = image.to_rgb8();
	GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
		let p = rgb.get_pixel(x, y);
		let luma = (p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000;
		Luma([luma as u8])
	})
}

/// Resizes back to the caller's original dimensions.
pub fn resize(image: &GrayImage, width: u32, height: u32) -> GrayImage {
	if image.dimensions() == (width, height) {
		return image.clone();
	}
	imageops::resize(image, width, height, FilterType::CatmullRom)
}

pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
	let mut output = Vec::new();
	DynamicImage::ImageLuma8(image.clone()).write_to(&mut Cursor::new(&mut output), ImageOutputFormat::Png)?;
	Ok(output)
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{Rgb, RgbImage};

	fn png_of(image: DynamicImage) -> Vec<u8> {
		let mut bytes = Vec::new();
		image
			.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
			.unwrap();
		bytes
	}

	#[test]
	fn empty_body_is_rejected() {
		let err = decode_grayscale(&[]).unwrap_err();
		assert!(matches!(err, SketchError::InvalidInput(_)));
	}

	#[test]
	fn garbage_body_is_an_image_error() {
		let err = decode_grayscale(b"definitely not a png").unwrap_err();
		assert!(matches!(err, SketchError::Image(_)));
	}

	#[test]
	fn rgb_is_converted_with_bt601_weights() {
		let rgb = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
		let gray = decode_grayscale(&png_of(DynamicImage::ImageRgb8(rgb))).unwrap();
		assert_eq!(gray.get_pixel(0, 0)[0], 76);
	}

	#[test]
	fn png_roundtrip_preserves_dimensions() {
		let gray = GrayImage::from_pixel(7, 3, Luma([200]));
		let bytes = encode_png(&gray).unwrap();
		let decoded = decode_grayscale(&bytes).unwrap();
		assert_eq!(decoded.dimensions(), (7, 3));
		assert_eq!(decoded.get_pixel(6, 2)[0], 200);
	}

	#[test]
	fn resize_is_noop_for_matching_size() {
		let gray = GrayImage::from_pixel(5, 5, Luma([9]));
		assert_eq!(resize(&gray, 5, 5), gray);
		assert_eq!(resize(&gray, 10, 3).dimensions(), (10, 3));
	}
}
