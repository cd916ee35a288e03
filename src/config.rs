use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CutoutError, Result};

/// Opacity band edges for the transparency classifier.
///
/// `v >= high` is foreground, otherwise `v <= low` is background, anything in
/// between is ambiguous. `low == high` degenerates to a single binary cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
	pub low: u8,
	pub high: u8
}

impl Thresholds {
	pub fn new(low: u8, high: u8) -> Result<Self> {
		if low > high {
			return Err(CutoutError::invalid_config(format!("threshold low ({low}) is above high ({high})")));
		}
		Ok(Self { low, high })
	}

	pub fn binary(cut: u8) -> Self {
		Self { low: cut, high: cut }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
	/// Semi-transparent pixels are treated as model hallucinations and dropped.
	Eliminate,
	/// Semi-transparent pixels are treated as real subject detail and made solid.
	Preserve
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailDetector {
	/// Sobel gradient magnitude of the luma image.
	Gradient,
	/// Standard deviation of luma over a `(2r+1)^2` window.
	Variance { radius: u8 }
}

/// Shields high-detail ambiguous pixels from the resolver policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetailProtection {
	pub detector: DetailDetector,
	pub min_strength: f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
	Four,
	Eight
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
	pub connectivity: Connectivity,
	/// Fragments covering at least this fraction of the image survive on their own.
	pub min_area_fraction: f64,
	/// Dilation radius (square element) used to decide whether a small fragment is close enough to merge.
	pub proximity_radius: u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WhiteBand {
	Anywhere,
	ImageBorder { width: u32 },
	MaskEdge { width: u8 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteFilter {
	/// Luminance must be strictly above this.
	pub luminance_min: f32,
	/// Saturation proxy must be strictly below this.
	pub saturation_max: f32,
	pub band: WhiteBand
}

impl Default for WhiteFilter {
	fn default() -> Self {
		Self {
			luminance_min: 245.0,
			saturation_max: 0.05,
			band: WhiteBand::ImageBorder { width: 10 }
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingMode {
	Off,
	Blend { factor: f32 },
	Rethreshold { floor: u8, ceiling: u8 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
	pub radius: u8,
	pub sigma: f32,
	pub mode: SmoothingMode
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineConfig {
	pub thresholds: Thresholds,
	pub policy: AmbiguityPolicy,
	#[serde(default)]
	pub protection: Option<DetailProtection>,
	pub components: ComponentConfig,
	#[serde(default)]
	pub whites: Option<WhiteFilter>,
	#[serde(default)]
	pub halo_erosion: u8,
	pub smoothing: SmoothingConfig
}

impl Default for RefineConfig {
	fn default() -> Self {
		Preset::Balanced.config()
	}
}

impl RefineConfig {
	pub fn preset(name: &str) -> Result<Self> {
		Ok(Preset::from_name(name)?.config())
	}

	pub fn from_json_file(path: &Path) -> Result<Self> {
		let s = std::fs::read_to_string(path).map_err(|e| CutoutError::io("read config", path, e))?;
		let cfg: RefineConfig = serde_json::from_str(&s)
			.map_err(|e| CutoutError::invalid_config(format!("{}: {e}", path.display())))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<()> {
		Thresholds::new(self.thresholds.low, self.thresholds.high)?;

		if let Some(p) = &self.protection {
			if !p.min_strength.is_finite() || p.min_strength < 0.0 {
				return Err(CutoutError::invalid_config(format!("protection min_strength must be >= 0, got {}", p.min_strength)));
			}
			if let DetailDetector::Variance { radius: 0 } = p.detector {
				return Err(CutoutError::invalid_config("variance detector radius must be at least 1"));
			}
		}

		let frac = self.components.min_area_fraction;
		if !(0.0..=1.0).contains(&frac) {
			return Err(CutoutError::invalid_config(format!("min_area_fraction must be within [0, 1], got {frac}")));
		}

		if let Some(w) = &self.whites {
			if !(0.0..=255.0).contains(&w.luminance_min) {
				return Err(CutoutError::invalid_config(format!("white luminance cutoff must be within [0, 255], got {}", w.luminance_min)));
			}
			if !(0.0..=1.0).contains(&w.saturation_max) {
				return Err(CutoutError::invalid_config(format!("white saturation cutoff must be within [0, 1], got {}", w.saturation_max)));
			}
		}

		let s = &self.smoothing;
		if s.mode != SmoothingMode::Off {
			if !(1..=3).contains(&s.radius) {
				return Err(CutoutError::invalid_config(format!("smoothing radius must be 1..=3, got {}", s.radius)));
			}
			if !s.sigma.is_finite() || s.sigma <= 0.0 {
				return Err(CutoutError::invalid_config(format!("smoothing sigma must be > 0, got {}", s.sigma)));
			}
		}
		match s.mode {
			SmoothingMode::Blend { factor } if !(0.0..=1.0).contains(&factor) => {
				Err(CutoutError::invalid_config(format!("blend factor must be within [0, 1], got {factor}")))
			}
			SmoothingMode::Rethreshold { floor, ceiling } if floor >= ceiling => {
				Err(CutoutError::invalid_config(format!("rethreshold floor ({floor}) must be below ceiling ({ceiling})")))
			}
			_ => Ok(())
		}
	}
}

/// Named tunings distilled from the experiments that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
	Balanced,
	Preserve,
	Eliminate,
	Strict,
	Conservative
}

impl Preset {
	pub const ALL: [Preset; 5] = [Preset::Balanced, Preset::Preserve, Preset::Eliminate, Preset::Strict, Preset::Conservative];

	pub fn from_name(name: &str) -> Result<Self> {
		match name.trim().to_ascii_lowercase().as_str() {
			"balanced" => Ok(Preset::Balanced),
			"preserve" => Ok(Preset::Preserve),
			"eliminate" => Ok(Preset::Eliminate),
			"strict" => Ok(Preset::Strict),
			"conservative" => Ok(Preset::Conservative),
			_ => Err(CutoutError::UnknownPreset(name.to_string()))
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Preset::Balanced => "balanced",
			Preset::Preserve => "preserve",
			Preset::Eliminate => "eliminate",
			Preset::Strict => "strict",
			Preset::Conservative => "conservative"
		}
	}

	pub fn description(self) -> &'static str {
		match self {
			Preset::Balanced => "keep semi-transparent detail, trim white at the image border",
			Preset::Preserve => "treat every uncertain pixel as subject (balloons, watches, hair)",
			Preset::Eliminate => "drop semi-transparent regions the model hallucinated",
			Preset::Strict => "hard cut with aggressive white removal and a one pixel halo trim",
			Preset::Conservative => "single low cut, keep nearly everything the model saw"
		}
	}

	pub fn config(self) -> RefineConfig {
		let soft_blend = SmoothingConfig {
			radius: 1,
			sigma: 0.2,
			mode: SmoothingMode::Blend { factor: 0.15 }
		};
		let border_whites = WhiteFilter::default();

		match self {
			Preset::Balanced => RefineConfig {
				thresholds: Thresholds { low: 50, high: 200 },
				policy: AmbiguityPolicy::Preserve,
				protection: None,
				components: ComponentConfig {
					connectivity: Connectivity::Eight,
					min_area_fraction: 0.01,
					proximity_radius: 10
				},
				whites: Some(border_whites),
				halo_erosion: 0,
				smoothing: soft_blend
			},
			Preset::Preserve => RefineConfig {
				thresholds: Thresholds { low: 30, high: 128 },
				policy: AmbiguityPolicy::Preserve,
				protection: None,
				components: ComponentConfig {
					connectivity: Connectivity::Eight,
					min_area_fraction: 0.005,
					proximity_radius: 15
				},
				whites: Some(border_whites),
				halo_erosion: 0,
				smoothing: soft_blend
			},
			Preset::Eliminate => RefineConfig {
				thresholds: Thresholds { low: 20, high: 150 },
				policy: AmbiguityPolicy::Eliminate,
				protection: Some(DetailProtection {
					detector: DetailDetector::Gradient,
					min_strength: 200.0
				}),
				components: ComponentConfig {
					connectivity: Connectivity::Eight,
					min_area_fraction: 0.01,
					proximity_radius: 10
				},
				whites: Some(WhiteFilter {
					luminance_min: 240.0,
					saturation_max: 0.1,
					band: WhiteBand::MaskEdge { width: 3 }
				}),
				halo_erosion: 0,
				smoothing: SmoothingConfig {
					radius: 1,
					sigma: 0.5,
					mode: SmoothingMode::Blend { factor: 0.3 }
				}
			},
			Preset::Strict => RefineConfig {
				thresholds: Thresholds { low: 100, high: 240 },
				policy: AmbiguityPolicy::Eliminate,
				protection: None,
				components: ComponentConfig {
					connectivity: Connectivity::Eight,
					min_area_fraction: 0.02,
					proximity_radius: 5
				},
				whites: Some(WhiteFilter {
					luminance_min: 235.0,
					saturation_max: 0.15,
					band: WhiteBand::Anywhere
				}),
				halo_erosion: 1,
				smoothing: SmoothingConfig {
					radius: 1,
					sigma: 0.5,
					mode: SmoothingMode::Rethreshold { floor: 64, ceiling: 192 }
				}
			},
			Preset::Conservative => RefineConfig {
				thresholds: Thresholds::binary(20),
				policy: AmbiguityPolicy::Preserve,
				protection: None,
				components: ComponentConfig {
					connectivity: Connectivity::Eight,
					min_area_fraction: 0.001,
					proximity_radius: 20
				},
				whites: Some(WhiteFilter {
					luminance_min: 250.0,
					..border_whites
				}),
				halo_erosion: 0,
				smoothing: soft_blend
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_preset_validates() {
		for p in Preset::ALL {
			p.config().validate().unwrap_or_else(|e| panic!("{}: {e}", p.name()));
			assert_eq!(Preset::from_name(p.name()).unwrap(), p);
		}
	}

	#[test]
	fn detail_protection_only_ships_with_eliminate() {
		for p in Preset::ALL {
			let cfg = p.config();
			if cfg.protection.is_some() {
				assert_eq!(cfg.policy, AmbiguityPolicy::Eliminate, "{}", p.name());
			}
		}
	}

	#[test]
	fn rejects_inverted_thresholds() {
		assert!(Thresholds::new(200, 50).is_err());
		assert!(Thresholds::new(50, 50).is_ok());

		let mut cfg = RefineConfig::default();
		cfg.thresholds = Thresholds { low: 9, high: 3 };
		assert!(matches!(cfg.validate(), Err(CutoutError::InvalidConfig(_))));
	}

	#[test]
	fn rejects_bad_smoothing() {
		let mut cfg = RefineConfig::default();
		cfg.smoothing.radius = 4;
		assert!(cfg.validate().is_err());

		let mut cfg = RefineConfig::default();
		cfg.smoothing.mode = SmoothingMode::Rethreshold { floor: 200, ceiling: 100 };
		assert!(cfg.validate().is_err());

		// Radius and sigma are irrelevant once smoothing is off.
		let mut cfg = RefineConfig::default();
		cfg.smoothing = SmoothingConfig {
			radius: 0,
			sigma: 0.0,
			mode: SmoothingMode::Off
		};
		assert!(cfg.validate().is_ok());
	}

	#[test]
	fn unknown_preset_is_reported() {
		assert!(matches!(RefineConfig::preset("fluffy"), Err(CutoutError::UnknownPreset(_))));
		assert_eq!(RefineConfig::preset(" Strict ").unwrap(), Preset::Strict.config());
	}

	#[test]
	fn json_roundtrip_through_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cfg.json");
		let cfg = Preset::Eliminate.config();
		std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
		assert_eq!(RefineConfig::from_json_file(&path).unwrap(), cfg);
	}

	#[test]
	fn json_optional_stages_default_off() {
		let s = r#"{
			"thresholds": { "low": 10, "high": 240 },
			"policy": "eliminate",
			"components": { "connectivity": "four", "min_area_fraction": 0.0, "proximity_radius": 0 },
			"smoothing": { "radius": 1, "sigma": 0.5, "mode": { "kind": "off" } }
		}"#;
		let cfg: RefineConfig = serde_json::from_str(s).unwrap();
		assert!(cfg.protection.is_none());
		assert!(cfg.whites.is_none());
		assert_eq!(cfg.halo_erosion, 0);
		assert!(cfg.validate().is_ok());
	}
}
