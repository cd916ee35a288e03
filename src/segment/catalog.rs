use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::download;

/// Per-channel input normalization: `(x / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
	pub mean: [f32; 3],
	pub std: [f32; 3]
}

const IMAGENET: Normalization = Normalization {
	mean: [0.485, 0.456, 0.406],
	std: [0.229, 0.224, 0.225]
};

const CENTERED: Normalization = Normalization {
	mean: [0.5, 0.5, 0.5],
	std: [1.0, 1.0, 1.0]
};

const IMAGENET_MEAN_ONLY: Normalization = Normalization {
	mean: IMAGENET.mean,
	std: [1.0, 1.0, 1.0]
};

#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
	pub name: &'static str,
	pub url: &'static str,
	pub input_size: u32,
	pub norm: Normalization,
	pub md5: Option<&'static str>
}

// Checksums are only listed where the upstream release has been verified.
pub const MODELS: &[ModelSpec] = &[
	ModelSpec {
		name: "isnet-general-use",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx",
		input_size: 1024,
		norm: CENTERED,
		md5: Some("fc16ebd8b0c10d971d3513d564d01e29")
	},
	ModelSpec {
		name: "isnet-anime",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-anime.onnx",
		input_size: 1024,
		norm: IMAGENET_MEAN_ONLY,
		md5: None
	},
	ModelSpec {
		name: "u2net",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx",
		input_size: 320,
		norm: IMAGENET,
		md5: Some("60024c5c889badc19c04ad937298a77b")
	},
	ModelSpec {
		name: "u2netp",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx",
		input_size: 320,
		norm: IMAGENET,
		md5: Some("8e83ca70e441ab06c318d82300c84806")
	},
	ModelSpec {
		name: "u2net_human_seg",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net_human_seg.onnx",
		input_size: 320,
		norm: IMAGENET,
		md5: None
	},
	ModelSpec {
		name: "silueta",
		url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/silueta.onnx",
		input_size: 320,
		norm: IMAGENET,
		md5: None
	}
];

pub fn lookup(name: &str) -> Result<&'static ModelSpec> {
	let key = name.trim().to_ascii_lowercase();
	match MODELS.iter().find(|m| m.name == key) {
		Some(m) => Ok(m),
		None => {
			let names: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
			bail!("unsupported model: {key} (supported: {})", names.join(", "))
		}
	}
}

pub struct ModelInstall {
	pub spec: &'static ModelSpec,
	pub path: PathBuf
}

pub struct DownloadProgress<'a> {
	pub url: &'a str,
	pub progress: download::Progress
}

/// Resolves a catalog model to a local `.onnx`, downloading it on first use.
pub fn ensure_model(
	name: &str,
	cache_dir: &Path,
	allow_download: bool,
	mut on_progress: impl FnMut(DownloadProgress<'_>)
) -> Result<ModelInstall> {
	let spec = lookup(name)?;
	let path = cache_dir.join("models").join(format!("{}.onnx", spec.name));

	if !path.exists() {
		if !allow_download {
			bail!("download required: model {} ({})", spec.name, spec.url);
		}
		tracing::info!(model = spec.name, url = spec.url, "downloading model");
		download::download_to_path(
			spec.url,
			&path,
			spec.md5.map(download::Digest::Md5),
			|p| on_progress(DownloadProgress { url: spec.url, progress: p })
		)
		.with_context(|| format!("download model {} from {}", spec.name, spec.url))?;
	}

	Ok(ModelInstall { spec, path })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookup_is_case_and_space_insensitive() {
		assert_eq!(lookup(" U2NetP ").unwrap().name, "u2netp");
		assert_eq!(lookup("isnet-general-use").unwrap().input_size, 1024);
	}

	#[test]
	fn unknown_model_lists_the_catalog() {
		let err = lookup("sam").unwrap_err().to_string();
		assert!(err.contains("sam"));
		assert!(err.contains("silueta"));
	}

	#[test]
	fn every_url_points_at_its_own_onnx() {
		for m in MODELS {
			assert!(m.url.starts_with("https://github.com/danielgatis/rembg/releases/"));
			assert!(m.url.ends_with(&format!("/{}.onnx", m.name)), "{}", m.url);
		}
	}

	#[test]
	fn catalog_only_lists_single_channel_models() {
		assert!(lookup("u2net_cloth_seg").is_err());
		assert_eq!(MODELS.len(), 6);
	}

	#[test]
	fn anime_model_subtracts_imagenet_mean_without_scaling() {
		let norm = lookup("isnet-anime").unwrap().norm;
		assert_eq!(norm.mean, [0.485, 0.456, 0.406]);
		assert_eq!(norm.std, [1.0, 1.0, 1.0]);
		assert_eq!(lookup("isnet-general-use").unwrap().norm, CENTERED);
	}

	#[test]
	fn offline_lookup_refuses_to_download() {
		let dir = tempfile::tempdir().unwrap();
		let err = ensure_model("u2netp", dir.path(), false, |_| {}).err().unwrap();
		assert!(err.to_string().contains("download required"));
	}

	#[test]
	fn cached_model_is_used_without_network() {
		let dir = tempfile::tempdir().unwrap();
		let models = dir.path().join("models");
		std::fs::create_dir_all(&models).unwrap();
		std::fs::write(models.join("silueta.onnx"), b"stub").unwrap();
		let m = ensure_model("silueta", dir.path(), false, |_| {}).unwrap();
		assert_eq!(m.path, models.join("silueta.onnx"));
	}
}
