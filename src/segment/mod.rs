//! Mask sources. Anything that can turn an RGB image into an initial 8-bit
//! opacity map of the same size implements [`Segmenter`].

pub mod catalog;
pub mod onnx;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use image::{GrayImage, Luma, RgbImage};

pub use onnx::OnnxSegmenter;

pub trait Segmenter {
	fn name(&self) -> &str;

	fn segment(&mut self, img: &RgbImage) -> Result<GrayImage>;
}

impl<S: Segmenter + ?Sized> Segmenter for Box<S> {
	fn name(&self) -> &str {
		(**self).name()
	}

	fn segment(&mut self, img: &RgbImage) -> Result<GrayImage> {
		(**self).segment(img)
	}
}

/// A precomputed mask on disk. RGBA files contribute their alpha channel,
/// everything else is read as luma.
pub struct MaskFile {
	path: PathBuf,
	label: String
}

impl MaskFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let label = format!("mask:{}", path.display());
		Self { path, label }
	}
}

impl Segmenter for MaskFile {
	fn name(&self) -> &str {
		&self.label
	}

	fn segment(&mut self, _img: &RgbImage) -> Result<GrayImage> {
		let m = image::open(&self.path).with_context(|| format!("open mask: {}", self.path.display()))?;
		if m.color().has_alpha() {
			let rgba = m.to_rgba8();
			Ok(GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| Luma([rgba.get_pixel(x, y)[3]])))
		} else {
			Ok(m.to_luma8())
		}
	}
}

/// Several models voting on one mask.
///
/// Members that fail are left out of the blend; the ensemble only fails when
/// every member does. Surviving masks are combined per pixel as
/// `0.7 * min + 0.3 * max`, leaning towards what all members agree on.
pub struct Ensemble {
	members: Vec<Box<dyn Segmenter>>,
	label: String
}

impl Ensemble {
	pub fn new(members: Vec<Box<dyn Segmenter>>) -> Self {
		let names: Vec<&str> = members.iter().map(|m| m.name()).collect();
		let label = format!("ensemble({})", names.join("+"));
		Self { members, label }
	}
}

impl Segmenter for Ensemble {
	fn name(&self) -> &str {
		&self.label
	}

	fn segment(&mut self, img: &RgbImage) -> Result<GrayImage> {
		let mut masks: Vec<GrayImage> = Vec::with_capacity(self.members.len());
		for m in self.members.iter_mut() {
			match m.segment(img) {
				Ok(mask) if mask.dimensions() == img.dimensions() => masks.push(mask),
				Ok(mask) => tracing::warn!(
					member = m.name(),
					"mask is {}x{}, image is {}x{}; excluded",
					mask.width(),
					mask.height(),
					img.width(),
					img.height()
				),
				Err(e) => tracing::warn!(member = m.name(), "segmentation failed, excluded: {e:#}")
			}
		}

		match masks.len() {
			0 => bail!("all {} ensemble members failed", self.members.len()),
			1 => Ok(masks.remove(0)),
			_ => Ok(blend(&masks))
		}
	}
}

fn blend(masks: &[GrayImage]) -> GrayImage {
	let (w, h) = masks[0].dimensions();
	let mut out = GrayImage::new(w, h);
	for (i, p) in out.pixels_mut().enumerate() {
		let (lo, hi) = masks
			.iter()
			.map(|m| m.as_raw()[i])
			.fold((u8::MAX, u8::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
		p.0[0] = (0.7 * lo as f32 + 0.3 * hi as f32).round() as u8;
	}
	out
}
