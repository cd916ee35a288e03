use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use avatar_cutout::config::Preset;
use avatar_cutout::core::{self, OutputKind};
use avatar_cutout::runtime::{self, ExecutionProvider, RuntimeRequest};
use avatar_cutout::segment::{Ensemble, MaskFile, OnnxSegmenter, Segmenter, catalog};
use avatar_cutout::{cli, download, logging};

fn main() {
	// Keep stdout clean for piping; errors go to stderr via `anyhow`.
	if let Err(e) = run() {
		eprintln!("{e:#}");
		std::process::exit(1);
	}
}

fn run() -> Result<()> {
	let args = cli::Args::parse();
	logging::init(args.verbose, args.quiet)?;

	if args.list_presets {
		for p in Preset::ALL {
			println!("{:<13} {}", p.name(), p.description());
		}
		return Ok(());
	}
	if args.list_models {
		for m in catalog::MODELS {
			println!("{:<18} {}x{}", m.name, m.input_size, m.input_size);
		}
		return Ok(());
	}
	if let Some(path) = &args.stats {
		let stats = core::file_stats(path)?;
		if args.json {
			println!("{}", serde_json::to_string_pretty(&stats)?);
		} else {
			println!("{} ({} pixels)", path.display(), stats.total);
			println!("{stats}");
		}
		return Ok(());
	}

	let kind = if args.only_mask { OutputKind::Mask } else { OutputKind::Cutout };
	if args.compare {
		let configs = args.preset_configs()?;
		let input = args.input.as_deref().context("missing input image")?;
		let outdir = args.output.clone().unwrap_or_else(|| core::default_compare_outdir(input));
		let mut segmenter = build_segmenter(&args)?;
		tracing::info!(segmenter = segmenter.name(), config = %args.config_source(), "ready");

		let cmp = core::compare_presets(input, &outdir, segmenter.as_mut(), &configs, kind)
			.with_context(|| format!("compare presets on {}", input.display()))?;
		for out in &cmp.outputs {
			let stats = &out.report.output;
			println!("{:<13} {:>6.2}% visible  {}", out.preset.name(), stats.pct(stats.visible()), out.path.display());
		}
		println!("{:<13} {}", "strip", cmp.strip.display());
		return Ok(());
	}

	let cfg = args.refine_config()?;
	let mut segmenter = build_segmenter(&args)?;
	tracing::info!(segmenter = segmenter.name(), config = %args.config_source(), "ready");

	if let Some(dir) = &args.batch {
		let outdir = args.output.clone().unwrap_or_else(|| core::default_batch_outdir(dir));
		let summary = core::process_batch(dir, &outdir, segmenter.as_mut(), &cfg, kind)?;
		for (path, e) in &summary.failed {
			eprintln!("failed: {}: {e}", path.display());
		}
		eprintln!("{}/{} processed into {}", summary.succeeded.len(), summary.total(), outdir.display());
		if summary.succeeded.is_empty() {
			bail!("no image in {} was processed", dir.display());
		}
		return Ok(());
	}

	let input = args.input.as_deref().context("missing input image")?;
	let output = args.output.clone().unwrap_or_else(|| default_output(input, kind));
	let report = core::process_file(input, &output, segmenter.as_mut(), &cfg, kind)
		.with_context(|| format!("process {}", input.display()))?;
	tracing::debug!(?report, "refine report");
	Ok(())
}

fn default_output(input: &Path, kind: OutputKind) -> PathBuf {
	let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
	let suffix = match kind {
		OutputKind::Cutout => "_no_bg.png",
		OutputKind::Mask => "_mask.png"
	};
	input.with_file_name(format!("{stem}{suffix}"))
}

fn build_segmenter(args: &cli::Args) -> Result<Box<dyn Segmenter>> {
	if let Some(mask) = &args.mask {
		return Ok(Box::new(MaskFile::new(mask)));
	}

	let cache = runtime::cache_dir()?;
	let provider = ExecutionProvider::for_device(args.device)?;
	let lib = runtime::resolve_runtime(
		&RuntimeRequest {
			provider,
			explicit: args.ort_lib.as_deref(),
			cache_dir: &cache,
			allow_download: !args.offline,
			assume_yes: args.yes
		},
		|p| download::print_progress(p.url, p.progress)
	)?;
	runtime::init_ort(&lib)?;

	let names = if args.ensemble.is_empty() {
		vec![args.model.clone()]
	} else {
		args.ensemble.clone()
	};
	let mut members: Vec<Box<dyn Segmenter>> = Vec::with_capacity(names.len());
	for name in &names {
		let model = catalog::ensure_model(name, &cache, !args.offline, |p| download::print_progress(p.url, p.progress))?;
		let seg = OnnxSegmenter::load(&model, provider).with_context(|| format!("load model {name}"))?;
		members.push(Box::new(seg));
	}

	if members.len() == 1 {
		Ok(members.remove(0))
	} else {
		Ok(Box::new(Ensemble::new(members)))
	}
}
