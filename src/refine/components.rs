use image::{GrayImage, ImageBuffer, Luma, imageops};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, dilate};
use imageproc::region_labelling::{Connectivity as Conn, connected_components};

use crate::config::{ComponentConfig, Connectivity};

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
	pub min_x: u32,
	pub min_y: u32,
	pub max_x: u32,
	pub max_y: u32
}

impl Bounds {
	fn grow(&mut self, x: u32, y: u32) {
		self.min_x = self.min_x.min(x);
		self.min_y = self.min_y.min(y);
		self.max_x = self.max_x.max(x);
		self.max_y = self.max_y.max(y);
	}

	/// Expanded by `m` on every side, clamped to a `w`x`h` image. Returns `(x, y, w, h)`.
	fn window(&self, m: u32, w: u32, h: u32) -> (u32, u32, u32, u32) {
		let x0 = self.min_x.saturating_sub(m);
		let y0 = self.min_y.saturating_sub(m);
		let x1 = self.max_x.saturating_add(m).min(w - 1);
		let y1 = self.max_y.saturating_add(m).min(h - 1);
		(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
	pub label: u32,
	pub area: usize,
	pub bounds: Bounds
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	pub components: usize,
	pub anchors: usize,
	pub merged: usize,
	pub dropped: usize
}

/// Labels the nonzero pixels of `mask` and returns components ranked by area,
/// largest first. Equal areas keep label order.
pub fn label_components(mask: &GrayImage, connectivity: Connectivity) -> (LabelImage, Vec<Component>) {
	let conn = match connectivity {
		Connectivity::Four => Conn::Four,
		Connectivity::Eight => Conn::Eight
	};
	// connected_components asserts on a lone pixel.
	if mask.dimensions() == (1, 1) {
		return single_pixel_components(mask);
	}
	let labels = connected_components(mask, conn, Luma([0u8]));

	let mut comps: Vec<Component> = Vec::new();
	for (x, y, l) in labels.enumerate_pixels() {
		let label = l[0];
		if label == 0 {
			continue;
		}
		let idx = (label - 1) as usize;
		if idx >= comps.len() {
			comps.resize(
				idx + 1,
				Component {
					label: 0,
					area: 0,
					bounds: Bounds {
						min_x: u32::MAX,
						min_y: u32::MAX,
						max_x: 0,
						max_y: 0
					}
				}
			);
		}
		let c = &mut comps[idx];
		c.label = label;
		c.area += 1;
		c.bounds.grow(x, y);
	}
	comps.retain(|c| c.area > 0);
	comps.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));
	(labels, comps)
}

fn single_pixel_components(mask: &GrayImage) -> (LabelImage, Vec<Component>) {
	if mask.get_pixel(0, 0)[0] == 0 {
		return (LabelImage::new(1, 1), Vec::new());
	}
	let comp = Component {
		label: 1,
		area: 1,
		bounds: Bounds {
			min_x: 0,
			min_y: 0,
			max_x: 0,
			max_y: 0
		}
	};
	(LabelImage::from_pixel(1, 1, Luma([1])), vec![comp])
}

/// Keeps the subject as one coherent region.
///
/// The largest component always survives, as does anything at or above
/// `min_area_fraction` of the image. Smaller fragments are merged when their
/// `proximity_radius` dilation touches a survivor and dropped otherwise.
/// Merged fragments do not attract further fragments.
pub fn reconcile(mask: &GrayImage, cfg: &ComponentConfig) -> (GrayImage, ReconcileReport) {
	let (w, h) = mask.dimensions();
	let (labels, comps) = label_components(mask, cfg.connectivity);
	let mut report = ReconcileReport {
		components: comps.len(),
		..Default::default()
	};
	if comps.is_empty() {
		return (mask.clone(), report);
	}

	let total = (w as f64) * (h as f64);
	let mut anchors: Vec<&Component> = Vec::new();
	let mut fragments: Vec<&Component> = Vec::new();
	for (rank, c) in comps.iter().enumerate() {
		if rank == 0 || c.area as f64 / total >= cfg.min_area_fraction {
			anchors.push(c);
		} else {
			fragments.push(c);
		}
	}
	report.anchors = anchors.len();

	let mut is_anchor = vec![false; comps.len() + 1];
	for c in &anchors {
		is_anchor[c.label as usize] = true;
	}
	let anchor_mask = GrayImage::from_fn(w, h, |x, y| {
		let l = labels.get_pixel(x, y)[0] as usize;
		Luma([if l != 0 && is_anchor[l] { 255 } else { 0 }])
	});

	let mut out = anchor_mask.clone();
	let r = cfg.proximity_radius;

	for frag in fragments {
		if r == 0 {
			report.dropped += 1;
			continue;
		}

		// Closing at a point reads up to 2r away, evaluated up to r from the fragment.
		let (x0, y0, cw, ch) = frag.bounds.window(3 * r as u32, w, h);
		let own = GrayImage::from_fn(cw, ch, |x, y| {
			Luma([if labels.get_pixel(x0 + x, y0 + y)[0] == frag.label { 255 } else { 0 }])
		});
		let anchors_here = imageops::crop_imm(&anchor_mask, x0, y0, cw, ch).to_image();

		let reach = dilate(&own, Norm::LInf, r);
		let touches = reach
			.pixels()
			.zip(anchors_here.pixels())
			.any(|(a, b)| a[0] != 0 && b[0] != 0);
		if !touches {
			report.dropped += 1;
			continue;
		}

		let union = GrayImage::from_fn(cw, ch, |x, y| Luma([own.get_pixel(x, y)[0] | anchors_here.get_pixel(x, y)[0]]));
		let bridged = close(&union, Norm::LInf, r);
		for y in 0..ch {
			for x in 0..cw {
				let keep = own.get_pixel(x, y)[0] != 0 || (reach.get_pixel(x, y)[0] != 0 && bridged.get_pixel(x, y)[0] != 0);
				if keep {
					out.put_pixel(x0 + x, y0 + y, Luma([255]));
				}
			}
		}
		report.merged += 1;
	}

	(out, report)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rect(mask: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
		for y in y0..y0 + h {
			for x in x0..x0 + w {
				mask.put_pixel(x, y, Luma([255]));
			}
		}
	}

	fn cfg(frac: f64, radius: u8) -> ComponentConfig {
		ComponentConfig {
			connectivity: Connectivity::Eight,
			min_area_fraction: frac,
			proximity_radius: radius
		}
	}

	fn lit(mask: &GrayImage) -> usize {
		mask.pixels().filter(|p| p[0] != 0).count()
	}

	#[test]
	fn single_pixel_image_is_one_component() {
		let lit_pixel = GrayImage::from_pixel(1, 1, Luma([255]));
		let (labels, comps) = label_components(&lit_pixel, Connectivity::Four);
		assert_eq!(labels.get_pixel(0, 0)[0], 1);
		assert_eq!(comps.len(), 1);
		assert_eq!(comps[0].area, 1);

		let (out, report) = reconcile(&lit_pixel, &cfg(0.5, 3));
		assert_eq!(out, lit_pixel);
		assert_eq!(report.anchors, 1);

		let (_, comps) = label_components(&GrayImage::new(1, 1), Connectivity::Eight);
		assert!(comps.is_empty());
	}

	#[test]
	fn ranks_by_area() {
		let mut m = GrayImage::new(30, 30);
		rect(&mut m, 0, 0, 2, 2);
		rect(&mut m, 10, 10, 5, 5);
		rect(&mut m, 25, 25, 3, 3);
		let (_, comps) = label_components(&m, Connectivity::Eight);
		let areas: Vec<usize> = comps.iter().map(|c| c.area).collect();
		assert_eq!(areas, vec![25, 9, 4]);
		assert_eq!(
			comps[0].bounds,
			Bounds {
				min_x: 10,
				min_y: 10,
				max_x: 14,
				max_y: 14
			}
		);
	}

	#[test]
	fn connectivity_decides_diagonal_neighbours() {
		let mut m = GrayImage::new(4, 4);
		m.put_pixel(1, 1, Luma([255]));
		m.put_pixel(2, 2, Luma([255]));
		assert_eq!(label_components(&m, Connectivity::Eight).1.len(), 1);
		assert_eq!(label_components(&m, Connectivity::Four).1.len(), 2);
	}

	#[test]
	fn drops_small_distant_blob() {
		// 200x200: a 5% subject and a 0.3% speck 50px away.
		let mut m = GrayImage::new(200, 200);
		rect(&mut m, 20, 20, 40, 50);
		rect(&mut m, 110, 30, 10, 12);

		let (out, rep) = reconcile(&m, &cfg(0.01, 10));
		assert_eq!(rep.components, 2);
		assert_eq!(rep.dropped, 1);
		assert_eq!(lit(&out), 2000);
		assert_eq!(out.get_pixel(115, 35)[0], 0);
		assert_eq!(out.get_pixel(30, 30)[0], 255);
	}

	#[test]
	fn merges_and_bridges_nearby_fragment() {
		let mut m = GrayImage::new(200, 200);
		rect(&mut m, 20, 20, 40, 50);
		rect(&mut m, 65, 30, 10, 12);

		let (out, rep) = reconcile(&m, &cfg(0.01, 10));
		assert_eq!(rep.merged, 1);
		assert_eq!(out.get_pixel(70, 35)[0], 255);
		// The five-pixel gap is bridged where both sides overlap vertically.
		assert_eq!(out.get_pixel(62, 35)[0], 255);
		// Far from the fragment the silhouette is untouched.
		assert_eq!(out.get_pixel(62, 65)[0], 0);
		assert_eq!(label_components(&out, Connectivity::Eight).1.len(), 1);
	}

	#[test]
	fn large_secondary_component_survives_alone() {
		let mut m = GrayImage::new(100, 100);
		rect(&mut m, 0, 0, 20, 20);
		rect(&mut m, 70, 70, 15, 15);
		let (out, rep) = reconcile(&m, &cfg(0.01, 3));
		assert_eq!(rep.anchors, 2);
		assert_eq!(out, m);
	}

	#[test]
	fn largest_component_is_kept_even_when_tiny() {
		let mut m = GrayImage::new(100, 100);
		rect(&mut m, 90, 90, 3, 3);
		m.put_pixel(5, 5, Luma([255]));
		let (out, rep) = reconcile(&m, &cfg(0.5, 2));
		assert_eq!(rep.anchors, 1);
		assert_eq!(lit(&out), 9);
		assert_eq!(out.get_pixel(91, 91)[0], 255);
	}

	#[test]
	fn output_is_superset_of_anchors_for_any_config() {
		let mut m = GrayImage::new(64, 64);
		rect(&mut m, 4, 4, 20, 20);
		rect(&mut m, 30, 30, 6, 6);
		rect(&mut m, 27, 6, 2, 2);
		rect(&mut m, 60, 60, 1, 1);
		for frac in [0.0, 0.005, 0.01, 0.2, 1.0] {
			for radius in [0u8, 1, 3, 8, 30] {
				let (out, _) = reconcile(&m, &cfg(frac, radius));
				for y in 4..24 {
					for x in 4..24 {
						assert_eq!(out.get_pixel(x, y)[0], 255);
					}
				}
				if frac <= 36.0 / 4096.0 {
					assert_eq!(out.get_pixel(32, 32)[0], 255);
				}
				assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
			}
		}
	}

	#[test]
	fn empty_mask_passes_through() {
		let m = GrayImage::new(10, 10);
		let (out, rep) = reconcile(&m, &cfg(0.01, 5));
		assert_eq!(out, m);
		assert_eq!(rep, ReconcileReport::default());
	}
}
