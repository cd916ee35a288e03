use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::separable_filter_equal;
use imageproc::map::map_colors;

use crate::config::{SmoothingConfig, SmoothingMode};

/// Anti-aliases the foreground boundary. Pixels that were fully opaque before the
/// blur come out bit-for-bit unchanged.
pub fn smooth(mask: &GrayImage, cfg: &SmoothingConfig) -> GrayImage {
	if cfg.mode == SmoothingMode::Off || mask.width() == 0 || mask.height() == 0 {
		return mask.clone();
	}

	let blurred = gaussian_blur(mask, cfg.radius as usize, cfg.sigma);
	let mut out = mask.clone();
	for (x, y, p) in out.enumerate_pixels_mut() {
		let v = p[0];
		if v == 255 {
			continue;
		}
		let b = blurred.get_pixel(x, y)[0];
		let nv = match cfg.mode {
			SmoothingMode::Off => v,
			SmoothingMode::Blend { factor } => {
				if v == 0 {
					continue;
				}
				to_u8((1.0 - factor) * v as f32 + factor * b)
			}
			SmoothingMode::Rethreshold { floor, ceiling } => {
				if b <= floor as f32 {
					0
				} else if b >= ceiling as f32 {
					255
				} else {
					to_u8(b)
				}
			}
		};
		*p = Luma([nv]);
	}
	out
}

fn to_u8(v: f32) -> u8 {
	v.round().clamp(0.0, 255.0) as u8
}

fn kernel(radius: usize, sigma: f32) -> Vec<f32> {
	let two_s2 = 2.0 * sigma * sigma;
	let k: Vec<f32> = (0..=2 * radius)
		.map(|i| {
			let d = i as f32 - radius as f32;
			(-(d * d) / two_s2).exp()
		})
		.collect();
	let sum: f32 = k.iter().sum();
	k.into_iter().map(|v| v / sum).collect()
}

/// Gaussian over the opacity plane, edges replicated.
fn gaussian_blur(mask: &GrayImage, radius: usize, sigma: f32) -> Image<Luma<f32>> {
	let plane: Image<Luma<f32>> = map_colors(mask, |p| Luma([p[0] as f32]));
	separable_filter_equal(&plane, &kernel(radius, sigma))
}
