use std::io::Write;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, RgbImage};
use tracing::{info, warn};

use crate::config::{Preset, RefineConfig};
use crate::error::{CutoutError, Result};
use crate::refine::{self, MaskStats, RefineReport, Refined, check_dimensions};
use crate::{compose, segment::Segmenter};

/// File extensions picked up by batch mode.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

/// What ends up in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
	/// RGBA PNG: source RGB with the refined mask as alpha.
	#[default]
	Cutout,
	/// The refined mask alone, as a grayscale PNG.
	Mask
}

#[derive(Debug, Clone)]
pub struct Encoded {
	pub png: Vec<u8>,
	pub report: RefineReport
}

#[derive(Debug, Default)]
pub struct BatchSummary {
	pub succeeded: Vec<PathBuf>,
	pub failed: Vec<(PathBuf, CutoutError)>
}

impl BatchSummary {
	pub fn total(&self) -> usize {
		self.succeeded.len() + self.failed.len()
	}
}

/// Runs the segmenter and checks its mask against the image.
pub fn segment(img: &RgbImage, segmenter: &mut dyn Segmenter) -> Result<GrayImage> {
	let mask = segmenter.segment(img).map_err(|e| CutoutError::Segmentation {
		model: segmenter.name().to_string(),
		reason: format!("{e:#}")
	})?;
	check_dimensions(img, &mask)?;
	Ok(mask)
}

/// Segments and refines one decoded image.
pub fn process_image(img: &RgbImage, segmenter: &mut dyn Segmenter, cfg: &RefineConfig) -> Result<Refined> {
	cfg.validate()?;
	let mask = segment(img, segmenter)?;
	refine::refine(img, &mask, cfg)
}

/// Decodes `input_bytes`, processes it and returns the encoded PNG.
pub fn remove_background_bytes(
	input_bytes: &[u8],
	segmenter: &mut dyn Segmenter,
	cfg: &RefineConfig,
	kind: OutputKind
) -> Result<Encoded> {
	let img = image::load_from_memory(input_bytes)
		.map_err(|source| CutoutError::Decode {
			path: PathBuf::from("<memory>"),
			source
		})?
		.to_rgb8();
	encode(&img, segmenter, cfg, kind)
}

/// Processes `input` into `output`. The output is written through a temporary
/// file in the destination directory, so a failure never leaves a partial file.
pub fn process_file(
	input: &Path,
	output: &Path,
	segmenter: &mut dyn Segmenter,
	cfg: &RefineConfig,
	kind: OutputKind
) -> Result<RefineReport> {
	let img = open_rgb(input)?;
	let Encoded { png, report } = encode(&img, segmenter, cfg, kind)?;
	write_atomic(output, &png)?;
	info!(
		input = %input.display(),
		output = %output.display(),
		visible = report.output.visible(),
		"wrote {}",
		match kind {
			OutputKind::Cutout => "cutout",
			OutputKind::Mask => "mask"
		}
	);
	Ok(report)
}

/// Every supported image directly inside `dir`, sorted by file name.
pub fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
	if !dir.is_dir() {
		return Err(CutoutError::InputNotFound(dir.to_path_buf()));
	}
	let rd = std::fs::read_dir(dir).map_err(|e| CutoutError::io("read dir", dir, e))?;
	let mut files: Vec<PathBuf> = rd
		.flatten()
		.map(|e| e.path())
		.filter(|p| p.is_file() && is_supported(p))
		.collect();
	files.sort();
	Ok(files)
}

pub fn is_supported(path: &Path) -> bool {
	path.extension()
		.and_then(|s| s.to_str())
		.is_some_and(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

/// `<dir>_processed`, next to `dir`.
pub fn default_batch_outdir(dir: &Path) -> PathBuf {
	let name = dir.file_name().and_then(|s| s.to_str()).unwrap_or("batch");
	dir.with_file_name(format!("{name}_processed"))
}

pub fn batch_output_path(outdir: &Path, input: &Path) -> PathBuf {
	let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
	outdir.join(format!("{stem}_no_bg.png"))
}

/// Processes every supported file in `dir` one after another with the same
/// segmenter. A failing file is logged and recorded; the rest still run.
pub fn process_batch(
	dir: &Path,
	outdir: &Path,
	segmenter: &mut dyn Segmenter,
	cfg: &RefineConfig,
	kind: OutputKind
) -> Result<BatchSummary> {
	cfg.validate()?;
	let files = list_inputs(dir)?;
	std::fs::create_dir_all(outdir).map_err(|e| CutoutError::io("create dir", outdir, e))?;
	info!(dir = %dir.display(), files = files.len(), "batch start");

	let mut summary = BatchSummary::default();
	for (i, input) in files.into_iter().enumerate() {
		let output = batch_output_path(outdir, &input);
		info!("[{}] {}", i + 1, input.display());
		match process_file(&input, &output, segmenter, cfg, kind) {
			Ok(_) => summary.succeeded.push(input),
			Err(e) => {
				warn!(input = %input.display(), "failed: {e}");
				summary.failed.push((input, e));
			}
		}
	}

	info!(succeeded = summary.succeeded.len(), failed = summary.failed.len(), "batch done");
	Ok(summary)
}

#[derive(Debug)]
pub struct PresetOutput {
	pub preset: Preset,
	pub path: PathBuf,
	pub report: RefineReport
}

#[derive(Debug)]
pub struct Comparison {
	pub outputs: Vec<PresetOutput>,
	/// Original plus one cutout per preset, side by side.
	pub strip: PathBuf
}

/// `<stem>_compare`, next to `input`.
pub fn default_compare_outdir(input: &Path) -> PathBuf {
	let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
	input.with_file_name(format!("{stem}_compare"))
}

/// Segments `input` once and refines that mask under each config. Writes
/// `<stem>_<preset>.png` per config and `<stem>_comparison.png` into `outdir`.
pub fn compare_presets(
	input: &Path,
	outdir: &Path,
	segmenter: &mut dyn Segmenter,
	configs: &[(Preset, RefineConfig)],
	kind: OutputKind
) -> Result<Comparison> {
	for (_, cfg) in configs {
		cfg.validate()?;
	}
	let img = open_rgb(input)?;
	let mask = segment(&img, segmenter)?;
	let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");

	let mut outputs = Vec::with_capacity(configs.len());
	let mut panels = Vec::with_capacity(configs.len());
	for (preset, cfg) in configs {
		let Refined { mask: refined, report } = refine::refine(&img, &mask, cfg)?;
		let cutout = compose::apply_alpha(&img, &refined)?;
		let png = match kind {
			OutputKind::Cutout => compose::encode_png(&image::DynamicImage::ImageRgba8(cutout.clone()))?,
			OutputKind::Mask => compose::encode_mask(&refined)?
		};
		let path = outdir.join(format!("{stem}_{}.png", preset.name()));
		write_atomic(&path, &png)?;
		info!(preset = preset.name(), output = %path.display(), visible = report.output.visible(), "wrote comparison panel");

		panels.push(cutout);
		outputs.push(PresetOutput {
			preset: *preset,
			path,
			report
		});
	}

	let strip_img = compose::comparison_strip(&img, &panels);
	let strip = outdir.join(format!("{stem}_comparison.png"));
	write_atomic(&strip, &compose::encode_png(&image::DynamicImage::ImageRgba8(strip_img))?)?;
	info!(output = %strip.display(), panels = panels.len(), "wrote comparison strip");

	Ok(Comparison { outputs, strip })
}

/// Alpha statistics of an existing image. Images without an alpha channel count
/// as fully solid.
pub fn file_stats(path: &Path) -> Result<MaskStats> {
	if !path.exists() {
		return Err(CutoutError::InputNotFound(path.to_path_buf()));
	}
	let img = image::open(path).map_err(|source| CutoutError::Decode {
		path: path.to_path_buf(),
		source
	})?;
	let alpha = if img.color().has_alpha() {
		let rgba = img.to_rgba8();
		GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| Luma([rgba.get_pixel(x, y)[3]]))
	} else {
		GrayImage::from_pixel(img.width(), img.height(), Luma([255]))
	};
	Ok(MaskStats::from_mask(&alpha))
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
	if !path.exists() {
		return Err(CutoutError::InputNotFound(path.to_path_buf()));
	}
	let img = image::open(path).map_err(|source| CutoutError::Decode {
		path: path.to_path_buf(),
		source
	})?;
	Ok(img.to_rgb8())
}

fn encode(img: &RgbImage, segmenter: &mut dyn Segmenter, cfg: &RefineConfig, kind: OutputKind) -> Result<Encoded> {
	let Refined { mask, report } = process_image(img, segmenter, cfg)?;
	let png = match kind {
		OutputKind::Cutout => compose::encode_cutout(img, &mask)?,
		OutputKind::Mask => compose::encode_mask(&mask)?
	};
	Ok(Encoded { png, report })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
	let dir = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new(".")
	};
	std::fs::create_dir_all(dir).map_err(|e| CutoutError::io("create dir", dir, e))?;

	let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CutoutError::io("create temp file in", dir, e))?;
	tmp.write_all(bytes).map_err(|e| CutoutError::io("write", tmp.path().to_path_buf(), e))?;
	tmp.persist(path).map_err(|e| CutoutError::io("persist", path, e.error))?;
	Ok(())
}
