use anyhow::Result;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Maps `-v` repetitions to a filter directive. `quiet` wins over verbosity.
pub fn level_filter(verbosity: u8, quiet: bool) -> &'static str {
	if quiet {
		return "error";
	}
	match verbosity {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace"
	}
}

/// Installs the stderr subscriber for the binary. `RUST_LOG` overrides the flags.
pub fn init(verbosity: u8, quiet: bool) -> Result<()> {
	let filter = match std::env::var("RUST_LOG") {
		Ok(s) if !s.trim().is_empty() => EnvFilter::try_new(s)?,
		_ => EnvFilter::try_new(level_filter(verbosity, quiet))?
	};

	let fmt_layer = fmt::layer()
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_level(true)
		.compact();

	Registry::default().with(filter).with(fmt_layer).try_init()?;
	Ok(())
}
