use image::{GrayImage, Luma, RgbImage};
use imageproc::definitions::Image;
use imageproc::gradients::sobel_gradients;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use imageproc::map::map_colors;

use super::classify::{Classification, PixelClass};
use crate::config::{AmbiguityPolicy, DetailDetector, DetailProtection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
	pub eliminated: usize,
	pub promoted: usize,
	/// Ambiguous pixels forced to foreground by detail protection against the policy.
	pub protected: usize
}

/// Collapses the classification to a strictly binary mask.
pub fn resolve(
	img: &RgbImage,
	classes: &Classification,
	policy: AmbiguityPolicy,
	protection: Option<&DetailProtection>
) -> (GrayImage, ResolveReport) {
	let (w, h) = (classes.width(), classes.height());
	let mut report = ResolveReport::default();

	let shield = match protection {
		Some(p) if policy == AmbiguityPolicy::Eliminate && classes.count(PixelClass::Ambiguous) > 0 => {
			Some((detail_strength(img, p.detector), p.min_strength))
		}
		_ => None
	};

	let mut out = GrayImage::new(w, h);
	for y in 0..h {
		for x in 0..w {
			let v = match classes.get(x, y) {
				PixelClass::Background => 0,
				PixelClass::Foreground => 255,
				PixelClass::Ambiguous => {
					let shielded = shield
						.as_ref()
						.is_some_and(|(s, min)| s.get_pixel(x, y)[0] >= *min);
					match policy {
						AmbiguityPolicy::Preserve => {
							report.promoted += 1;
							255
						}
						AmbiguityPolicy::Eliminate if shielded => {
							report.protected += 1;
							255
						}
						AmbiguityPolicy::Eliminate => {
							report.eliminated += 1;
							0
						}
					}
				}
			};
			out.put_pixel(x, y, Luma([v]));
		}
	}
	(out, report)
}

/// Per-pixel detail strength of the image's luma.
pub fn detail_strength(img: &RgbImage, detector: DetailDetector) -> Image<Luma<f32>> {
	let luma = image::imageops::grayscale(img);
	match detector {
		DetailDetector::Gradient => map_colors(&sobel_gradients(&luma), |g| Luma([g[0] as f32])),
		DetailDetector::Variance { radius } => local_std_dev(&luma, u32::from(radius))
	}
}

/// Standard deviation over the `(2r + 1)` square window, clipped at the borders.
fn local_std_dev(luma: &GrayImage, r: u32) -> Image<Luma<f32>> {
	let (w, h) = luma.dimensions();
	let sum = integral_image::<_, u64>(luma);
	let sq = integral_squared_image::<_, u64>(luma);

	Image::from_fn(w, h, |x, y| {
		let (x0, y0) = (x.saturating_sub(r), y.saturating_sub(r));
		let (x1, y1) = (x.saturating_add(r).min(w - 1), y.saturating_add(r).min(h - 1));
		let n = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
		let s = sum_image_pixels(&sum, x0, y0, x1, y1)[0] as f64;
		let s2 = sum_image_pixels(&sq, x0, y0, x1, y1)[0] as f64;
		let mean = s / n;
		Luma([(s2 / n - mean * mean).max(0.0).sqrt() as f32])
	})
}
