use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use sha2::Digest as _;

const PROGRESS_EVERY: Duration = Duration::from_millis(250);

/// Expected checksum of a download, hex encoded.
#[derive(Debug, Clone, Copy)]
pub enum Digest<'a> {
	Sha256(&'a str),
	Md5(&'a str)
}

impl Digest<'_> {
	fn kind(&self) -> &'static str {
		match self {
			Digest::Sha256(_) => "sha256",
			Digest::Md5(_) => "md5"
		}
	}

	fn expected(&self) -> &str {
		match self {
			Digest::Sha256(e) | Digest::Md5(e) => e
		}
	}

	fn hasher(&self) -> Hasher {
		match self {
			Digest::Sha256(_) => Hasher::Sha256(sha2::Sha256::new()),
			Digest::Md5(_) => Hasher::Md5(md5::Context::new())
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
	pub downloaded: u64,
	pub total: Option<u64>,
	pub secs: f64,
	pub done: bool
}

enum Hasher {
	Sha256(sha2::Sha256),
	Md5(md5::Context)
}

impl Hasher {
	fn update(&mut self, bytes: &[u8]) {
		match self {
			Hasher::Sha256(h) => h.update(bytes),
			Hasher::Md5(h) => h.consume(bytes)
		}
	}

	fn finish(self) -> String {
		match self {
			Hasher::Sha256(h) => hex::encode(h.finalize()),
			Hasher::Md5(h) => format!("{:x}", h.finalize())
		}
	}
}

/// Writes through to `inner`, hashing every byte and reporting progress at most
/// every `PROGRESS_EVERY`.
struct Sink<W, F> {
	inner: W,
	hasher: Option<Hasher>,
	written: u64,
	total: Option<u64>,
	started: Instant,
	reported: Instant,
	on_progress: F
}

impl<W: Write, F: FnMut(Progress)> Sink<W, F> {
	fn report(&mut self, done: bool) {
		(self.on_progress)(Progress {
			downloaded: self.written,
			total: self.total,
			secs: self.started.elapsed().as_secs_f64(),
			done
		});
		self.reported = Instant::now();
	}
}

impl<W: Write, F: FnMut(Progress)> Write for Sink<W, F> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = self.inner.write(buf)?;
		if let Some(h) = self.hasher.as_mut() {
			h.update(&buf[..n]);
		}
		self.written += n as u64;
		if self.reported.elapsed() >= PROGRESS_EVERY {
			self.report(false);
		}
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.flush()
	}
}

/// GET with a non-2xx status turned into an error.
pub(crate) fn http_get(url: &str) -> Result<ureq::http::Response<ureq::Body>> {
	let resp = ureq::get(url).call().with_context(|| format!("GET {url}"))?;
	let status = resp.status().as_u16();
	if status / 100 != 2 {
		bail!("HTTP {status}: {url}");
	}
	Ok(resp)
}

/// Streams `url` into `dst` through a `.part` file and checks `digest` before the
/// final rename. `dst` only ever appears complete and verified.
pub fn download_to_path(url: &str, dst: &Path, digest: Option<Digest<'_>>, on_progress: impl FnMut(Progress)) -> Result<()> {
	if let Some(parent) = dst.parent() {
		fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
	}
	let part = dst.with_extension("part");
	let _ = fs::remove_file(&part);

	let resp = http_get(url)?;
	let total = resp
		.headers()
		.get(ureq::http::header::CONTENT_LENGTH)
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse::<u64>().ok());
	let mut body = resp.into_body().into_reader();

	let file = File::create(&part).with_context(|| format!("create file: {}", part.display()))?;
	let now = Instant::now();
	let mut sink = Sink {
		inner: io::BufWriter::new(file),
		hasher: digest.as_ref().map(Digest::hasher),
		written: 0,
		total,
		started: now,
		reported: now,
		on_progress
	};

	let copied = io::copy(&mut body, &mut sink).and_then(|_| sink.flush());
	if let Err(e) = copied {
		let _ = fs::remove_file(&part);
		return Err(e).with_context(|| format!("download {url}"));
	}
	sink.report(true);

	if let (Some(d), Some(h)) = (digest, sink.hasher.take()) {
		let got = h.finish();
		if !eq_hex(d.expected(), &got) {
			let _ = fs::remove_file(&part);
			bail!("{} mismatch for {url}: expected {}, got {got}", d.kind(), d.expected());
		}
	}
	drop(sink);

	fs::rename(&part, dst).with_context(|| format!("rename {} -> {}", part.display(), dst.display()))?;
	Ok(())
}

/// Single-line stderr progress, redrawn in place.
pub fn print_progress(url: &str, p: Progress) {
	let mib = |b: u64| b as f64 / (1024.0 * 1024.0);
	let rate = if p.secs > 0.0 { mib(p.downloaded) / p.secs } else { 0.0 };

	let mut err = io::stderr().lock();
	let _ = match p.total.filter(|t| *t > 0) {
		Some(t) => write!(
			err,
			"\r{url}  {:.1}/{:.1} MiB ({:.0}%) {rate:.1} MiB/s",
			mib(p.downloaded),
			mib(t),
			p.downloaded as f64 * 100.0 / t as f64
		),
		None => write!(err, "\r{url}  {:.1} MiB {rate:.1} MiB/s", mib(p.downloaded))
	};
	if p.done {
		let _ = writeln!(err);
	}
	let _ = err.flush();
}

fn eq_hex(a: &str, b: &str) -> bool {
	let norm = |s: &str| s.trim().trim_start_matches("0x").to_ascii_lowercase();
	norm(a) == norm(b)
}
