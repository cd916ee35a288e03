use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;

use crate::config::{WhiteBand, WhiteFilter};

/// Rec. 601 luma, the same weights the classic grayscale conversion uses.
pub fn luminance(p: [u8; 3]) -> f32 {
	0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// `(max - min) / max`, zero for black.
pub fn saturation(p: [u8; 3]) -> f32 {
	let max = p[0].max(p[1]).max(p[2]);
	let min = p[0].min(p[1]).min(p[2]);
	if max == 0 {
		0.0
	} else {
		(max - min) as f32 / max as f32
	}
}

/// Drops near-white, near-grey pixels that leaked into the foreground.
/// Pixels that are already transparent are never touched.
pub fn filter_whites(img: &RgbImage, mask: &GrayImage, filter: &WhiteFilter) -> (GrayImage, usize) {
	let (w, h) = mask.dimensions();
	let core = match filter.band {
		WhiteBand::MaskEdge { width } if width > 0 => Some(erode(mask, Norm::LInf, width)),
		_ => None
	};

	let in_band = |x: u32, y: u32| match filter.band {
		WhiteBand::Anywhere => true,
		WhiteBand::ImageBorder { width } => x < width || y < width || x >= w.saturating_sub(width) || y >= h.saturating_sub(width),
		WhiteBand::MaskEdge { .. } => core.as_ref().is_none_or(|c| c.get_pixel(x, y)[0] == 0)
	};

	let mut out = mask.clone();
	let mut removed = 0usize;
	for (x, y, a) in out.enumerate_pixels_mut() {
		if a[0] == 0 {
			continue;
		}
		let rgb = img.get_pixel(x, y).0;
		if luminance(rgb) > filter.luminance_min && saturation(rgb) < filter.saturation_max && in_band(x, y) {
			*a = Luma([0]);
			removed += 1;
		}
	}
	(out, removed)
}
