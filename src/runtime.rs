use std::{
	cmp::Ordering,
	env, fs,
	io::{self, Write},
	path::{Path, PathBuf},
	sync::OnceLock
};

use anyhow::{Context, Result, bail};

use crate::{download, pypi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Device {
	/// CPU inference with the stock `onnxruntime` wheel.
	Cpu,
	/// CUDA on Linux, DirectML on Windows. Falls back to CPU if the session cannot be built.
	Gpu
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
	Cpu,
	Cuda,
	DirectMl
}

impl ExecutionProvider {
	pub fn for_device(device: Device) -> Result<Self> {
		let (os, arch) = (env::consts::OS, env::consts::ARCH);
		match (device, os) {
			(Device::Cpu, _) => Ok(ExecutionProvider::Cpu),
			(Device::Gpu, "windows") => Ok(ExecutionProvider::DirectMl),
			(Device::Gpu, "linux") if arch == "x86_64" || arch == "aarch64" => Ok(ExecutionProvider::Cuda),
			(Device::Gpu, _) => bail!("GPU inference is not supported on this platform ({os}/{arch})")
		}
	}

	/// PyPI package that ships a runtime built with this provider.
	pub fn package(self) -> &'static str {
		match self {
			ExecutionProvider::Cpu => "onnxruntime",
			ExecutionProvider::Cuda => "onnxruntime-gpu",
			ExecutionProvider::DirectMl => "onnxruntime-directml"
		}
	}
}

pub struct RuntimeRequest<'a> {
	pub provider: ExecutionProvider,
	/// Library given on the command line; wins over everything else.
	pub explicit: Option<&'a Path>,
	pub cache_dir: &'a Path,
	pub allow_download: bool,
	/// Skip the interactive confirmation before downloading.
	pub assume_yes: bool
}

pub struct DownloadProgress<'a> {
	pub url: &'a str,
	pub progress: download::Progress
}

static ORT_MAIN_LIB: OnceLock<PathBuf> = OnceLock::new();

/// Per-user cache holding downloaded models and runtime wheels.
pub fn cache_dir() -> Result<PathBuf> {
	let dirs = directories::ProjectDirs::from("rs", "avatar-cutout", "avatar-cutout")
		.ok_or_else(|| anyhow::anyhow!("unable to resolve user cache directory"))?;
	Ok(dirs.cache_dir().to_path_buf())
}

/// Finds the ONNX Runtime shared library: explicit path, then `ORT_DYLIB_PATH`,
/// then any cached install, then a fresh wheel download.
pub fn resolve_runtime(req: &RuntimeRequest<'_>, mut on_progress: impl FnMut(DownloadProgress<'_>)) -> Result<PathBuf> {
	if let Some(p) = req.explicit {
		if !p.is_file() {
			bail!("onnxruntime library not found: {}", p.display());
		}
		return Ok(p.to_path_buf());
	}

	if let Some(p) = env::var_os("ORT_DYLIB_PATH").map(PathBuf::from) {
		if p.is_file() {
			tracing::debug!(path = %p.display(), "using ORT_DYLIB_PATH");
			return Ok(p);
		}
		tracing::warn!(path = %p.display(), "ORT_DYLIB_PATH does not point at a file, ignoring");
	}

	let os = env::consts::OS;
	let package = req.provider.package();
	let pkg_dir = req.cache_dir.join("onnxruntime").join(package);

	if let Some(lib) = find_installed(os, &pkg_dir)? {
		return Ok(lib);
	}

	let wheel = pypi::latest_wheel(package, pypi::Platform::current())?;
	if !req.allow_download {
		bail!("download required: runtime package {package} ({})", wheel.url);
	}
	if !prompt_yes_no(&format!("Download ONNX Runtime ({package} {})?", wheel.version), req.assume_yes)? {
		bail!("runtime download cancelled by user");
	}

	let base = pkg_dir.join(&wheel.version);
	let wheel_path = base.join(&wheel.filename);
	let lib_dir = base.join("lib");
	if !wheel_path.exists() {
		download::download_to_path(
			&wheel.url,
			&wheel_path,
			Some(download::Digest::Sha256(&wheel.sha256)),
			|p| on_progress(DownloadProgress { url: &wheel.url, progress: p })
		)
		.with_context(|| format!("download wheel: {}", wheel.filename))?;
	}
	extract_runtime_libs(&wheel_path, &lib_dir)?;

	find_main_lib(os, &lib_dir)
		.ok_or_else(|| anyhow::anyhow!("no onnxruntime library in {} after extraction", lib_dir.display()))
}

/// Loads the runtime library. Must run before the first `Session` is built, and
/// only one library can be loaded per process.
pub fn init_ort(lib: &Path) -> Result<()> {
	if let Some(p) = ORT_MAIN_LIB.get() {
		if p != lib {
			bail!("ONNX Runtime is already initialized with {}, cannot switch to {}", p.display(), lib.display());
		}
		return Ok(());
	}

	let builder = ort::init_from(lib).with_context(|| format!("load onnxruntime from {}", lib.display()))?;
	builder.commit();
	let _ = ORT_MAIN_LIB.set(lib.to_path_buf());
	Ok(())
}

fn find_installed(os: &str, pkg_dir: &Path) -> Result<Option<PathBuf>> {
	if !pkg_dir.exists() {
		return Ok(None);
	}

	let rd = fs::read_dir(pkg_dir).with_context(|| format!("read cache dir: {}", pkg_dir.display()))?;
	let mut versions: Vec<PathBuf> = rd.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
	versions.sort_by(|a, b| cmp_versions(dir_name(b), dir_name(a)));

	for vdir in versions {
		let lib_dir = vdir.join("lib");
		if let Some(lib) = find_main_lib(os, &lib_dir) {
			return Ok(Some(lib));
		}
		// A wheel without extracted libs means an earlier run was interrupted.
		if let Some(wheel) = find_wheel(&vdir)? {
			extract_runtime_libs(&wheel, &lib_dir)?;
			if let Some(lib) = find_main_lib(os, &lib_dir) {
				return Ok(Some(lib));
			}
		}
	}
	Ok(None)
}

fn find_wheel(dir: &Path) -> Result<Option<PathBuf>> {
	let rd = fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))?;
	Ok(rd.flatten().map(|e| e.path()).find(|p| {
		p.is_file() && p.extension().and_then(|s| s.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("whl"))
	}))
}

fn find_main_lib(os: &str, lib_dir: &Path) -> Option<PathBuf> {
	let preferred = lib_dir.join(match os {
		"windows" => "onnxruntime.dll",
		"macos" => "libonnxruntime.dylib",
		_ => "libonnxruntime.so"
	});
	if preferred.exists() {
		return Some(preferred);
	}

	// Versioned names (libonnxruntime.so.1.20.1): take the largest file, the others are symlink stand-ins.
	let rd = fs::read_dir(lib_dir).ok()?;
	rd.flatten()
		.filter(|e| {
			let name = e.file_name().to_string_lossy().to_ascii_lowercase();
			match os {
				"windows" => name == "onnxruntime.dll",
				"macos" => name.starts_with("libonnxruntime") && name.ends_with(".dylib"),
				_ => name.starts_with("libonnxruntime.so")
			}
		})
		.max_by_key(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
		.map(|e| e.path())
}

/// Unpacks the native libraries under `onnxruntime/capi/` of a wheel into
/// `lib_dir`. Files already present are left alone.
fn extract_runtime_libs(wheel_path: &Path, lib_dir: &Path) -> Result<()> {
	fs::create_dir_all(lib_dir).with_context(|| format!("create lib dir: {}", lib_dir.display()))?;
	let wheel = fs::File::open(wheel_path).with_context(|| format!("open wheel: {}", wheel_path.display()))?;
	let mut archive = zip::ZipArchive::new(wheel).with_context(|| format!("read wheel archive: {}", wheel_path.display()))?;

	let mut extracted = 0usize;
	for i in 0..archive.len() {
		let mut entry = archive.by_index(i).context("read wheel entry")?;
		let name = entry.name().replace('\\', "/");
		if entry.is_dir() || !name.contains("/capi/") || !is_runtime_lib_file(&name) {
			continue;
		}
		let Some(file_name) = name.rsplit('/').next().filter(|n| !n.is_empty()) else {
			bail!("invalid wheel entry name: {name}");
		};
		let dst = lib_dir.join(file_name);
		if dst.exists() {
			continue;
		}

		let mut out = fs::File::create(&dst).with_context(|| format!("create {}", dst.display()))?;
		io::copy(&mut entry, &mut out).with_context(|| format!("extract {name}"))?;
		extracted += 1;
	}
	tracing::debug!(wheel = %wheel_path.display(), extracted, "unpacked runtime libraries");
	Ok(())
}

fn is_runtime_lib_file(name: &str) -> bool {
	let lower = name.to_ascii_lowercase();
	lower.ends_with(".dll") || lower.ends_with(".so") || lower.contains(".so.") || lower.ends_with(".dylib")
}

fn dir_name(p: &Path) -> &str {
	p.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

/// Compares the numeric prefix (`1.20.1` of `1.20.1.post1`), then the full string.
fn cmp_versions(a: &str, b: &str) -> Ordering {
	let (pa, pb) = (version_prefix(a), version_prefix(b));
	for i in 0..pa.len().max(pb.len()) {
		let ord = pa.get(i).copied().unwrap_or(0).cmp(&pb.get(i).copied().unwrap_or(0));
		if ord != Ordering::Equal {
			return ord;
		}
	}
	a.cmp(b)
}

fn version_prefix(s: &str) -> Vec<u64> {
	s.split('.')
		.map_while(|part| {
			let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
			digits.parse::<u64>().ok()
		})
		.collect()
}

fn prompt_yes_no(msg: &str, assume_yes: bool) -> Result<bool> {
	if assume_yes {
		return Ok(true);
	}
	eprint!("{msg} [y/N] ");
	io::stderr().flush().ok();

	let mut s = String::new();
	io::stdin().read_line(&mut s).context("read user input")?;
	Ok(matches!(s.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
