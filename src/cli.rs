use std::path::PathBuf;

use clap::Parser;

use crate::config::{AmbiguityPolicy, Connectivity, Preset, RefineConfig, SmoothingMode, WhiteFilter};
use crate::error::Result;
use crate::runtime::Device;

#[derive(Debug, Parser)]
#[command(name = "avatar-cutout", version, about = "Avatar background removal with mask refinement")]
pub struct Args {
	/// Input image path.
	#[arg(required_unless_present_any = ["batch", "stats", "list_presets", "list_models"])]
	pub input: Option<PathBuf>,

	/// Output path. In batch mode, the output directory (defaults to `<dir>_processed`).
	#[arg(short, long)]
	pub output: Option<PathBuf>,

	/// Segmentation model (see `--list-models`).
	#[arg(short = 'm', long, default_value = "isnet-general-use")]
	pub model: String,

	/// Blend several models, comma separated (e.g. `u2net,silueta`).
	#[arg(long, value_delimiter = ',', conflicts_with = "mask")]
	pub ensemble: Vec<String>,

	/// Use a precomputed mask (alpha channel or grayscale) instead of running a model.
	#[arg(long)]
	pub mask: Option<PathBuf>,

	/// Process every supported image in this directory.
	#[arg(long, conflicts_with = "input")]
	pub batch: Option<PathBuf>,

	/// Write the refined mask as a grayscale PNG instead of the cutout.
	#[arg(long)]
	pub only_mask: bool,

	/// Print alpha statistics of an existing image and exit.
	#[arg(long, value_name = "IMAGE", conflicts_with_all = ["input", "batch"])]
	pub stats: Option<PathBuf>,

	/// With `--stats`, print JSON instead of a table.
	#[arg(long, requires = "stats")]
	pub json: bool,

	/// List the refinement presets and exit.
	#[arg(long)]
	pub list_presets: bool,

	/// List the catalog models and exit.
	#[arg(long)]
	pub list_models: bool,

	/// Render the input under every preset, plus a side-by-side strip. `-o` names
	/// the output directory (defaults to `<stem>_compare`).
	#[arg(long, requires = "input", conflicts_with_all = ["batch", "config", "preset"])]
	pub compare: bool,

	/// Refinement preset.
	#[arg(short, long, value_enum, default_value_t = Preset::Balanced)]
	pub preset: Preset,

	/// Load the whole refinement config from JSON instead of a preset.
	#[arg(long, conflicts_with = "preset")]
	pub config: Option<PathBuf>,

	/// Opacity at or below which a pixel is background.
	#[arg(long)]
	pub low: Option<u8>,

	/// Opacity at or above which a pixel is foreground.
	#[arg(long)]
	pub high: Option<u8>,

	/// What to do with pixels between `--low` and `--high`.
	#[arg(long, value_enum)]
	pub policy: Option<AmbiguityPolicy>,

	/// Pixel adjacency used when grouping the mask into components.
	#[arg(long, value_enum)]
	pub connectivity: Option<Connectivity>,

	/// Fraction of the image a fragment needs to survive on its own (0-1).
	#[arg(long)]
	pub min_area: Option<f64>,

	/// How far (px) a small fragment may be from the subject and still be merged.
	#[arg(long)]
	pub proximity: Option<u8>,

	/// Luminance (0-255) above which a foreground pixel counts as residual white.
	#[arg(long)]
	pub white_luminance: Option<f32>,

	/// Saturation (0-1) below which a bright pixel counts as residual white.
	#[arg(long)]
	pub white_saturation: Option<f32>,

	/// Disable the residual white filter.
	#[arg(long, conflicts_with_all = ["white_luminance", "white_saturation"])]
	pub no_whites: bool,

	/// Erode the final binary mask by this many pixels (0 disables).
	#[arg(long)]
	pub halo: Option<u8>,

	/// Edge smoothing kernel radius (1-3).
	#[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
	pub smooth_radius: Option<u8>,

	/// Gaussian sigma of the edge smoothing kernel.
	#[arg(long)]
	pub smooth_sigma: Option<f32>,

	/// Skip edge smoothing.
	#[arg(long)]
	pub no_smooth: bool,

	/// Inference device.
	#[arg(long, value_enum, default_value_t = Device::Cpu)]
	pub device: Device,

	/// Path to an onnxruntime shared library (also read from `ORT_DYLIB_PATH`).
	#[arg(long)]
	pub ort_lib: Option<PathBuf>,

	/// Fail instead of downloading models or the runtime.
	#[arg(long)]
	pub offline: bool,

	/// Assume "yes" for download prompts.
	#[arg(short = 'y', long)]
	pub yes: bool,

	/// More logging (-v info, -vv debug, -vvv trace).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Only log errors.
	#[arg(short, long)]
	pub quiet: bool
}

impl Args {
	/// Base config (JSON file or preset) with the individual flags applied on top.
	pub fn refine_config(&self) -> Result<RefineConfig> {
		let base = match &self.config {
			Some(path) => RefineConfig::from_json_file(path)?,
			None => self.preset.config()
		};
		self.with_overrides(base)
	}

	/// Every preset with the individual flags applied, in `Preset::ALL` order.
	pub fn preset_configs(&self) -> Result<Vec<(Preset, RefineConfig)>> {
		Preset::ALL
			.into_iter()
			.map(|p| self.with_overrides(p.config()).map(|cfg| (p, cfg)))
			.collect()
	}

	/// Where the config came from, for logging.
	pub fn config_source(&self) -> String {
		match &self.config {
			Some(path) => path.display().to_string(),
			None if self.compare => "all presets".to_string(),
			None => self.preset.name().to_string()
		}
	}

	fn with_overrides(&self, mut cfg: RefineConfig) -> Result<RefineConfig> {

		if let Some(v) = self.low {
			cfg.thresholds.low = v;
		}
		if let Some(v) = self.high {
			cfg.thresholds.high = v;
		}
		if let Some(v) = self.policy {
			cfg.policy = v;
		}
		if let Some(v) = self.connectivity {
			cfg.components.connectivity = v;
		}
		if let Some(v) = self.min_area {
			cfg.components.min_area_fraction = v;
		}
		if let Some(v) = self.proximity {
			cfg.components.proximity_radius = v;
		}

		if self.no_whites {
			cfg.whites = None;
		} else if self.white_luminance.is_some() || self.white_saturation.is_some() {
			let w = cfg.whites.get_or_insert_with(WhiteFilter::default);
			if let Some(v) = self.white_luminance {
				w.luminance_min = v;
			}
			if let Some(v) = self.white_saturation {
				w.saturation_max = v;
			}
		}

		if let Some(v) = self.halo {
			cfg.halo_erosion = v;
		}
		if let Some(v) = self.smooth_radius {
			cfg.smoothing.radius = v;
		}
		if let Some(v) = self.smooth_sigma {
			cfg.smoothing.sigma = v;
		}
		if self.no_smooth {
			cfg.smoothing.mode = SmoothingMode::Off;
		}

		cfg.validate()?;
		Ok(cfg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::CutoutError;

	fn parse(args: &[&str]) -> Args {
		Args::try_parse_from(std::iter::once("avatar-cutout").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn defaults_to_balanced() {
		let a = parse(&["in.png"]);
		assert_eq!(a.preset, Preset::Balanced);
		assert_eq!(a.model, "isnet-general-use");
		assert_eq!(a.refine_config().unwrap(), RefineConfig::default());
	}

	#[test]
	fn flags_override_the_preset() {
		let a = parse(&[
			"in.png",
			"--preset",
			"strict",
			"--low",
			"10",
			"--policy",
			"preserve",
			"--proximity",
			"0",
			"--halo",
			"0",
			"--no-smooth"
		]);
		let cfg = a.refine_config().unwrap();
		assert_eq!(cfg.thresholds.low, 10);
		assert_eq!(cfg.thresholds.high, 240);
		assert_eq!(cfg.policy, AmbiguityPolicy::Preserve);
		assert_eq!(cfg.components.proximity_radius, 0);
		assert_eq!(cfg.halo_erosion, 0);
		assert_eq!(cfg.smoothing.mode, SmoothingMode::Off);
	}

	#[test]
	fn white_flags_enable_the_filter() {
		let a = parse(&["in.png", "--no-whites"]);
		assert!(a.refine_config().unwrap().whites.is_none());

		let a = parse(&["in.png", "--white-luminance", "230"]);
		let w = a.refine_config().unwrap().whites.unwrap();
		assert_eq!(w.luminance_min, 230.0);
		assert_eq!(w.saturation_max, 0.05);
	}

	#[test]
	fn overrides_are_validated() {
		let a = parse(&["in.png", "--low", "250", "--high", "20"]);
		assert!(matches!(a.refine_config(), Err(CutoutError::InvalidConfig(_))));
	}

	#[test]
	fn compare_applies_flags_to_every_preset() {
		let a = parse(&["in.png", "--compare", "--no-whites"]);
		let cfgs = a.preset_configs().unwrap();
		assert_eq!(cfgs.len(), Preset::ALL.len());
		for (p, cfg) in &cfgs {
			assert!(cfg.whites.is_none(), "{}", p.name());
			assert_eq!(cfg.thresholds, p.config().thresholds);
		}
		assert_eq!(a.config_source(), "all presets");

		assert!(Args::try_parse_from(["avatar-cutout", "--compare"]).is_err());
		assert!(Args::try_parse_from(["avatar-cutout", "in.png", "--compare", "-p", "strict"]).is_err());
	}

	#[test]
	fn config_source_names_the_json_file() {
		let a = parse(&["in.png", "--config", "tuned.json"]);
		assert_eq!(a.config_source(), "tuned.json");
		assert_eq!(parse(&["in.png", "-p", "strict"]).config_source(), "strict");
	}

	#[test]
	fn every_flag_is_documented() {
		use clap::CommandFactory;
		for arg in Args::command().get_arguments() {
			if matches!(arg.get_id().as_str(), "help" | "version") {
				continue;
			}
			assert!(arg.get_help().is_some(), "{} has no help text", arg.get_id());
		}
	}

	#[test]
	fn ensemble_is_comma_separated() {
		let a = parse(&["in.png", "--ensemble", "u2net,silueta"]);
		assert_eq!(a.ensemble, vec!["u2net", "silueta"]);
	}

	#[test]
	fn input_is_optional_for_listing_and_stats() {
		assert!(Args::try_parse_from(["avatar-cutout"]).is_err());
		assert!(Args::try_parse_from(["avatar-cutout", "--list-presets"]).is_ok());
		let a = parse(&["--stats", "x.png", "--json"]);
		assert!(a.json);
		assert!(a.input.is_none());
	}
}
