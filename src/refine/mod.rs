//! Alpha-mask refinement.
//!
//! The stages run in a fixed order: classify, resolve, reconcile, filter
//! whites (plus optional halo erosion), smooth. The resolver always runs before
//! the reconciler, so components are always labelled on a binary mask.

pub mod classify;
pub mod components;
pub mod halo;
pub mod resolve;
pub mod smooth;
pub mod stats;
pub mod whites;

use image::{GrayImage, RgbImage};
use tracing::debug;

use crate::config::RefineConfig;
use crate::error::{CutoutError, Result};

pub use classify::{Classification, PixelClass, classify};
pub use components::{ReconcileReport, reconcile};
pub use resolve::{ResolveReport, resolve};
pub use stats::MaskStats;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineReport {
	pub input: MaskStats,
	pub background: usize,
	pub ambiguous: usize,
	pub foreground: usize,
	pub resolve: ResolveReport,
	pub reconcile: ReconcileReport,
	pub whites_removed: usize,
	pub halo_removed: usize,
	pub output: MaskStats
}

#[derive(Debug, Clone)]
pub struct Refined {
	pub mask: GrayImage,
	pub report: RefineReport
}

pub fn check_dimensions(img: &RgbImage, mask: &GrayImage) -> Result<()> {
	if img.dimensions() != mask.dimensions() {
		return Err(CutoutError::DimensionMismatch {
			image_w: img.width(),
			image_h: img.height(),
			mask_w: mask.width(),
			mask_h: mask.height()
		});
	}
	Ok(())
}

/// Runs every refinement stage over `mask`. Neither input is modified.
pub fn refine(img: &RgbImage, mask: &GrayImage, cfg: &RefineConfig) -> Result<Refined> {
	check_dimensions(img, mask)?;
	cfg.validate()?;

	let mut report = RefineReport {
		input: MaskStats::from_mask(mask),
		..Default::default()
	};

	let classes = classify(mask, cfg.thresholds);
	report.background = classes.count(PixelClass::Background);
	report.ambiguous = classes.count(PixelClass::Ambiguous);
	report.foreground = classes.count(PixelClass::Foreground);
	debug!(
		background = report.background,
		ambiguous = report.ambiguous,
		foreground = report.foreground,
		low = cfg.thresholds.low,
		high = cfg.thresholds.high,
		"classified"
	);

	let (binary, rr) = resolve(img, &classes, cfg.policy, cfg.protection.as_ref());
	report.resolve = rr;
	debug!(policy = ?cfg.policy, eliminated = rr.eliminated, promoted = rr.promoted, protected = rr.protected, "resolved");

	let (joined, cr) = reconcile(&binary, &cfg.components);
	report.reconcile = cr;
	debug!(components = cr.components, anchors = cr.anchors, merged = cr.merged, dropped = cr.dropped, "reconciled");

	let mut current = joined;
	if let Some(filter) = &cfg.whites {
		let (filtered, removed) = whites::filter_whites(img, &current, filter);
		report.whites_removed = removed;
		debug!(removed, band = ?filter.band, "filtered residual whites");
		current = filtered;
	}

	if cfg.halo_erosion > 0 {
		let before = lit(&current);
		current = halo::erode_halo(&current, cfg.halo_erosion);
		report.halo_removed = before - lit(&current);
		debug!(radius = cfg.halo_erosion, removed = report.halo_removed, "eroded halo");
	}

	let out = smooth::smooth(&current, &cfg.smoothing);
	report.output = MaskStats::from_mask(&out);
	debug!(visible = report.output.visible(), partial = report.output.partial(), "smoothed");

	Ok(Refined { mask: out, report })
}

fn lit(mask: &GrayImage) -> usize {
	mask.pixels().filter(|p| p[0] != 0).count()
}
