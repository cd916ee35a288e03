#![allow(dead_code)]

use anyhow::{Result, bail};
use avatar_cutout::config::{
	AmbiguityPolicy, ComponentConfig, Connectivity, RefineConfig, SmoothingConfig, SmoothingMode, Thresholds, WhiteBand, WhiteFilter
};
use avatar_cutout::segment::Segmenter;
use image::{GrayImage, Luma, RgbImage};

/// Hands back the same mask for every image.
pub struct StaticMask {
	pub mask: GrayImage,
	pub calls: usize
}

impl StaticMask {
	pub fn new(mask: GrayImage) -> Self {
		Self { mask, calls: 0 }
	}
}

impl Segmenter for StaticMask {
	fn name(&self) -> &str {
		"static"
	}

	fn segment(&mut self, _img: &RgbImage) -> Result<GrayImage> {
		self.calls += 1;
		Ok(self.mask.clone())
	}
}

/// Solid box over the central half of whatever image it is given.
pub struct CenterBox;

impl Segmenter for CenterBox {
	fn name(&self) -> &str {
		"center-box"
	}

	fn segment(&mut self, img: &RgbImage) -> Result<GrayImage> {
		let (w, h) = img.dimensions();
		Ok(GrayImage::from_fn(w, h, |x, y| {
			let inside = x >= w / 4 && x < w - w / 4 && y >= h / 4 && y < h - h / 4;
			Luma([if inside { 255 } else { 0 }])
		}))
	}
}

pub struct Failing;

impl Segmenter for Failing {
	fn name(&self) -> &str {
		"failing"
	}

	fn segment(&mut self, _img: &RgbImage) -> Result<GrayImage> {
		bail!("session crashed")
	}
}

/// Fixed stage settings with no detail protection, so scenario outcomes depend
/// only on the policy under test.
pub fn plain_config(policy: AmbiguityPolicy) -> RefineConfig {
	RefineConfig {
		thresholds: Thresholds { low: 50, high: 200 },
		policy,
		protection: None,
		components: ComponentConfig {
			connectivity: Connectivity::Eight,
			min_area_fraction: 0.01,
			proximity_radius: 10
		},
		whites: Some(WhiteFilter {
			luminance_min: 245.0,
			saturation_max: 0.05,
			band: WhiteBand::ImageBorder { width: 10 }
		}),
		halo_erosion: 0,
		smoothing: SmoothingConfig {
			radius: 1,
			sigma: 0.2,
			mode: SmoothingMode::Blend { factor: 0.15 }
		}
	}
}

pub fn count(mask: &GrayImage, v: u8) -> usize {
	mask.pixels().filter(|p| p[0] == v).count()
}

pub fn fill(mask: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, v: u8) {
	for y in y0..y1 {
		for x in x0..x1 {
			mask.put_pixel(x, y, Luma([v]));
		}
	}
}
