use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CutoutError>;

/// Everything that can abort a cutout invocation. No variant is recovered from
/// inside the pipeline; the caller sees the first failure and nothing is written.
#[derive(Debug, Error)]
pub enum CutoutError {
	#[error("input not found: {}", .0.display())]
	InputNotFound(PathBuf),

	#[error("decode image {}", .path.display())]
	Decode {
		path: PathBuf,
		#[source]
		source: image::ImageError
	},

	#[error("segmentation failed ({model}): {reason}")]
	Segmentation { model: String, reason: String },

	#[error("mask is {mask_w}x{mask_h} but image is {image_w}x{image_h}")]
	DimensionMismatch {
		image_w: u32,
		image_h: u32,
		mask_w: u32,
		mask_h: u32
	},

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("unknown preset {0:?} (available: balanced, preserve, eliminate, strict, conservative)")]
	UnknownPreset(String),

	#[error("encode png")]
	Encode(#[source] image::ImageError),

	#[error("{op} {}", .path.display())]
	Io {
		op: &'static str,
		path: PathBuf,
		#[source]
		source: std::io::Error
	}
}

impl CutoutError {
	pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
		Self::InvalidConfig(msg.into())
	}

	pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io {
			op,
			path: path.into(),
			source
		}
	}
}
