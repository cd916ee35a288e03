use std::collections::HashMap;
use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ProjectJson {
	info: InfoJson,
	releases: HashMap<String, Vec<FileJson>>
}

#[derive(Debug, Deserialize)]
struct InfoJson {
	version: String
}

#[derive(Debug, Deserialize)]
struct FileJson {
	filename: String,
	url: String,
	packagetype: String,
	digests: DigestsJson
}

#[derive(Debug, Deserialize)]
struct DigestsJson {
	sha256: String
}

/// A binary wheel of the latest release of a PyPI project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wheel {
	pub version: String,
	pub filename: String,
	pub url: String,
	pub sha256: String
}

/// Normalized `(os, arch)` as used in wheel platform tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
	pub os: &'static str,
	pub arch: &'static str
}

impl Platform {
	pub fn current() -> Self {
		let os = match std::env::consts::OS {
			"windows" => "windows",
			"macos" => "macos",
			_ => "linux"
		};
		Platform {
			os,
			arch: std::env::consts::ARCH
		}
	}

	fn accepts(&self, filename: &str) -> bool {
		// Only the native library inside the wheel matters, so python tags are ignored.
		match (self.os, self.arch) {
			("windows", "x86_64") => filename.ends_with("win_amd64.whl"),
			("windows", "aarch64") => filename.ends_with("win_arm64.whl"),
			("linux", "x86_64") => filename.contains("manylinux") && filename.ends_with("x86_64.whl"),
			("linux", "aarch64") => filename.contains("manylinux") && filename.ends_with("aarch64.whl"),
			("macos", "aarch64") => filename.contains("macosx") && (filename.ends_with("arm64.whl") || filename.ends_with("universal2.whl")),
			("macos", "x86_64") => filename.contains("macosx") && (filename.ends_with("x86_64.whl") || filename.ends_with("universal2.whl")),
			_ => false
		}
	}
}

pub fn latest_wheel(package: &str, platform: Platform) -> Result<Wheel> {
	let url = format!("https://pypi.org/pypi/{package}/json");
	let mut body = String::new();
	crate::download::http_get(&url)?
		.into_body()
		.into_reader()
		.read_to_string(&mut body)
		.context("read pypi json")?;
	pick_wheel(&body, platform)
}

fn pick_wheel(json: &str, platform: Platform) -> Result<Wheel> {
	let proj: ProjectJson = serde_json::from_str(json).context("parse pypi json")?;
	let version = proj.info.version;
	let files = proj
		.releases
		.get(&version)
		.with_context(|| format!("missing releases entry for version {version}"))?;

	let mut wheels: Vec<&FileJson> = files
		.iter()
		.filter(|f| f.packagetype == "bdist_wheel" && platform.accepts(&f.filename))
		.collect();
	// Highest python tag first; any of them carries the same native library.
	wheels.sort_by(|a, b| b.filename.cmp(&a.filename));

	let f = wheels
		.first()
		.with_context(|| format!("no wheel for {}/{} in {version}", platform.os, platform.arch))?;
	Ok(Wheel {
		version: version.clone(),
		filename: f.filename.clone(),
		url: f.url.clone(),
		sha256: f.digests.sha256.clone()
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	const JSON: &str = r#"{
		"info": { "version": "1.20.1" },
		"releases": {
			"1.20.1": [
				{ "filename": "onnxruntime-1.20.1-cp311-cp311-manylinux_2_27_x86_64.manylinux_2_28_x86_64.whl",
				  "url": "https://files/311.whl", "packagetype": "bdist_wheel", "digests": { "sha256": "aa" } },
				{ "filename": "onnxruntime-1.20.1-cp312-cp312-manylinux_2_27_x86_64.manylinux_2_28_x86_64.whl",
				  "url": "https://files/312.whl", "packagetype": "bdist_wheel", "digests": { "sha256": "bb" } },
				{ "filename": "onnxruntime-1.20.1-cp312-cp312-win_amd64.whl",
				  "url": "https://files/win.whl", "packagetype": "bdist_wheel", "digests": { "sha256": "cc" } },
				{ "filename": "onnxruntime-1.20.1.tar.gz",
				  "url": "https://files/src.tgz", "packagetype": "sdist", "digests": { "sha256": "dd" } }
			],
			"1.19.0": []
		}
	}"#;

	#[test]
	fn picks_platform_wheel_of_latest_release() {
		let w = pick_wheel(JSON, Platform { os: "linux", arch: "x86_64" }).unwrap();
		assert_eq!(w.version, "1.20.1");
		assert_eq!(w.url, "https://files/312.whl");
		assert_eq!(w.sha256, "bb");

		let w = pick_wheel(JSON, Platform { os: "windows", arch: "x86_64" }).unwrap();
		assert_eq!(w.sha256, "cc");
	}

	#[test]
	fn unsupported_platform_is_an_error() {
		let err = pick_wheel(JSON, Platform { os: "linux", arch: "riscv64" }).unwrap_err();
		assert!(err.to_string().contains("linux/riscv64"));
	}
}
