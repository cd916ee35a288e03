use std::fmt;

use image::GrayImage;
use serde::Serialize;

/// Alpha distribution of a mask, bucketed the way the halo experiments read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaskStats {
	pub total: usize,
	pub transparent: usize,
	pub very_low: usize,
	pub low: usize,
	pub medium: usize,
	pub high: usize,
	pub solid: usize
}

impl MaskStats {
	pub fn from_mask(mask: &GrayImage) -> Self {
		let mut s = MaskStats {
			total: (mask.width() as usize) * (mask.height() as usize),
			..Default::default()
		};
		for p in mask.pixels() {
			match p[0] {
				0 => s.transparent += 1,
				1..=50 => s.very_low += 1,
				51..=100 => s.low += 1,
				101..=180 => s.medium += 1,
				181..=254 => s.high += 1,
				255 => s.solid += 1
			}
		}
		s
	}

	pub fn partial(&self) -> usize {
		self.very_low + self.low + self.medium + self.high
	}

	pub fn visible(&self) -> usize {
		self.total - self.transparent
	}

	pub fn pct(&self, n: usize) -> f64 {
		if self.total == 0 {
			0.0
		} else {
			(n as f64) * 100.0 / (self.total as f64)
		}
	}
}

impl fmt::Display for MaskStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let rows = [
			("transparent (0)", self.transparent),
			("very low (1-50)", self.very_low),
			("low (51-100)", self.low),
			("medium (101-180)", self.medium),
			("high (181-254)", self.high),
			("solid (255)", self.solid)
		];
		for (label, n) in rows {
			writeln!(f, "  {label:<18} {n:>10}  {:>5.1}%", self.pct(n))?;
		}
		write!(f, "  {:<18} {:>10}  {:>5.1}%", "visible", self.visible(), self.pct(self.visible()))
	}
}
