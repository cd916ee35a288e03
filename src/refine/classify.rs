use image::GrayImage;

use crate::config::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
	Background,
	Ambiguous,
	Foreground
}

impl PixelClass {
	/// Foreground wins ties, so `low == high == t` reads as `v >= t`.
	pub fn of(v: u8, t: Thresholds) -> Self {
		if v >= t.high {
			PixelClass::Foreground
		} else if v <= t.low {
			PixelClass::Background
		} else {
			PixelClass::Ambiguous
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
	width: u32,
	height: u32,
	classes: Vec<PixelClass>
}

impl Classification {
	pub fn width(&self) -> u32 {
		self.width
	}

	pub fn height(&self) -> u32 {
		self.height
	}

	pub fn get(&self, x: u32, y: u32) -> PixelClass {
		self.classes[(y as usize) * (self.width as usize) + x as usize]
	}

	pub fn iter(&self) -> impl Iterator<Item = PixelClass> + '_ {
		self.classes.iter().copied()
	}

	pub fn count(&self, class: PixelClass) -> usize {
		self.classes.iter().filter(|c| **c == class).count()
	}

	/// Background to 0, foreground to 255, ambiguous pixels keep their original opacity.
	pub fn canonical_mask(&self, mask: &GrayImage) -> GrayImage {
		let mut out = mask.clone();
		for (p, c) in out.pixels_mut().zip(self.classes.iter()) {
			match c {
				PixelClass::Background => p.0[0] = 0,
				PixelClass::Foreground => p.0[0] = 255,
				PixelClass::Ambiguous => {}
			}
		}
		out
	}
}

pub fn classify(mask: &GrayImage, thresholds: Thresholds) -> Classification {
	Classification {
		width: mask.width(),
		height: mask.height(),
		classes: mask.pixels().map(|p| PixelClass::of(p.0[0], thresholds)).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ramp() -> GrayImage {
		GrayImage::from_fn(16, 16, |x, y| image::Luma([(y * 16 + x) as u8]))
	}

	#[test]
	fn foreground_wins_ties_at_the_boundaries() {
		let t = Thresholds { low: 50, high: 200 };
		assert_eq!(PixelClass::of(0, t), PixelClass::Background);
		assert_eq!(PixelClass::of(50, t), PixelClass::Background);
		assert_eq!(PixelClass::of(51, t), PixelClass::Ambiguous);
		assert_eq!(PixelClass::of(199, t), PixelClass::Ambiguous);
		assert_eq!(PixelClass::of(200, t), PixelClass::Foreground);
		assert_eq!(PixelClass::of(255, t), PixelClass::Foreground);
	}

	#[test]
	fn equal_thresholds_collapse_to_binary() {
		let t = Thresholds::binary(128);
		assert_eq!(PixelClass::of(127, t), PixelClass::Background);
		assert_eq!(PixelClass::of(128, t), PixelClass::Foreground);

		let c = classify(&ramp(), t);
		assert_eq!(c.count(PixelClass::Ambiguous), 0);
	}

	#[test]
	fn every_pixel_lands_in_exactly_one_class() {
		let c = classify(&ramp(), Thresholds { low: 40, high: 180 });
		let total = c.count(PixelClass::Background) + c.count(PixelClass::Ambiguous) + c.count(PixelClass::Foreground);
		assert_eq!(total, 256);
		assert_eq!(c.count(PixelClass::Background), 41);
		assert_eq!(c.count(PixelClass::Foreground), 76);
	}

	#[test]
	fn reclassifying_is_idempotent() {
		for t in [Thresholds { low: 40, high: 180 }, Thresholds::binary(0), Thresholds::binary(255), Thresholds { low: 0, high: 255 }] {
			let mask = ramp();
			let first = classify(&mask, t);
			let second = classify(&first.canonical_mask(&mask), t);
			assert_eq!(first, second, "thresholds {t:?}");
		}
	}
}
