use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, Rgba, RgbaImage, imageops};

use crate::error::{CutoutError, Result};
use crate::refine::check_dimensions;

/// Copies the RGB channels unchanged and takes alpha from `mask`.
pub fn apply_alpha(img: &RgbImage, mask: &GrayImage) -> Result<RgbaImage> {
	check_dimensions(img, mask)?;

	let (w, h) = (img.width(), img.height());
	let mut out = RgbaImage::new(w, h);
	for (x, y, p) in img.enumerate_pixels() {
		let a = mask.get_pixel(x, y)[0];
		out.put_pixel(x, y, Rgba([p[0], p[1], p[2], a]));
	}
	Ok(out)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
	let mut buf = Vec::new();
	let mut cur = Cursor::new(&mut buf);
	img.write_to(&mut cur, ImageFormat::Png).map_err(CutoutError::Encode)?;
	Ok(buf)
}

pub fn encode_cutout(img: &RgbImage, mask: &GrayImage) -> Result<Vec<u8>> {
	let rgba = apply_alpha(img, mask)?;
	encode_png(&DynamicImage::ImageRgba8(rgba))
}

pub fn encode_mask(mask: &GrayImage) -> Result<Vec<u8>> {
	encode_png(&DynamicImage::ImageLuma8(mask.clone()))
}

/// White columns between the panels of a comparison strip.
pub const STRIP_GAP: u32 = 20;

/// The original on the left, then every panel flattened over white, left to
/// right. Panels are expected to match the original's size.
pub fn comparison_strip(original: &RgbImage, panels: &[RgbaImage]) -> RgbaImage {
	let (w, h) = original.dimensions();
	let n = panels.len() as u32 + 1;
	let mut strip = RgbaImage::from_pixel(n * w + (n - 1) * STRIP_GAP, h, Rgba([255, 255, 255, 255]));

	imageops::replace(&mut strip, &DynamicImage::ImageRgb8(original.clone()).to_rgba8(), 0, 0);
	for (i, panel) in panels.iter().enumerate() {
		let x = (i as u32 + 1) * (w + STRIP_GAP);
		imageops::overlay(&mut strip, panel, i64::from(x), 0);
	}
	strip
}
