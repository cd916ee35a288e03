use anyhow::{Context, Result, bail};
use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array4, ArrayViewD};
use ort::ep;
use ort::session::Session;
use ort::value::TensorRef;

use super::Segmenter;
use super::catalog::{ModelInstall, Normalization};
use crate::runtime::ExecutionProvider;

/// A loaded ONNX segmentation model. The session is built once and reused for
/// every image handed to `segment`.
pub struct OnnxSegmenter {
	name: String,
	session: Session,
	input_size: u32,
	norm: Normalization
}

impl OnnxSegmenter {
	pub fn load(model: &ModelInstall, provider: ExecutionProvider) -> Result<Self> {
		let path = &model.path;
		let cpu = || -> Result<Session> {
			Session::builder()
				.context("create ORT session builder")?
				.commit_from_file(path)
				.with_context(|| format!("load onnx model: {}", path.display()))
		};

		let accelerated = match provider {
			ExecutionProvider::Cpu => None,
			ExecutionProvider::Cuda => Some(
				Session::builder()
					.context("create ORT session builder")?
					.with_execution_providers([ep::CUDA::default().build()])
					.context("configure CUDA EP")?
					.commit_from_file(path)
			),
			ExecutionProvider::DirectMl => Some(
				Session::builder()
					.context("create ORT session builder")?
					.with_execution_providers([ep::DirectML::default().build()])
					.context("configure DirectML EP")?
					.commit_from_file(path)
			)
		};

		let session = match accelerated {
			None => cpu()?,
			Some(Ok(s)) => s,
			Some(Err(e)) => {
				tracing::warn!(provider = ?provider, "GPU session failed, falling back to CPU: {e:#}");
				cpu()?
			}
		};

		Ok(Self {
			name: model.spec.name.to_string(),
			session,
			input_size: model.spec.input_size,
			norm: model.spec.norm
		})
	}
}

impl Segmenter for OnnxSegmenter {
	fn name(&self) -> &str {
		&self.name
	}

	fn segment(&mut self, img: &RgbImage) -> Result<GrayImage> {
		let resized = image::imageops::resize(img, self.input_size, self.input_size, FilterType::Lanczos3);
		let input = to_nchw(&resized, self.norm);

		let outputs = self
			.session
			.run(ort::inputs![TensorRef::from_array_view(&input)?])
			.context("run inference")?;
		if outputs.len() == 0 {
			bail!("model produced no outputs");
		}
		let out = outputs[0].try_extract_array::<f32>().context("extract output tensor")?;
		let small = probability_map(&out)?;

		Ok(image::imageops::resize(&small, img.width(), img.height(), FilterType::Lanczos3))
	}
}

fn to_nchw(img: &RgbImage, norm: Normalization) -> Array4<f32> {
	let (w, h) = (img.width() as usize, img.height() as usize);
	let mut t = Array4::<f32>::zeros((1, 3, h, w));
	for (x, y, p) in img.enumerate_pixels() {
		for c in 0..3 {
			t[[0, c, y as usize, x as usize]] = (p[c] as f32 / 255.0 - norm.mean[c]) / norm.std[c];
		}
	}
	t
}

/// Converts the first output (`1x1xHxW`) to an 8-bit mask.
///
/// Some exports emit probabilities and some emit logits. A sigmoid over an
/// already-[0,1] map squashes everything into ~[0.5, 0.73], so the range decides.
fn probability_map(out: &ArrayViewD<'_, f32>) -> Result<GrayImage> {
	let shape = out.shape();
	if shape.len() != 4 {
		bail!("unexpected output rank: {} (expected 4)", shape.len());
	}
	let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
	if n != 1 || c != 1 {
		bail!("unexpected output shape {shape:?} (expected [1, 1, H, W])");
	}

	let (lo, hi) = out
		.iter()
		.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
	let is_prob = lo >= -0.01 && hi <= 1.01;

	let mut mask = GrayImage::new(w as u32, h as u32);
	for y in 0..h {
		for x in 0..w {
			let v = out[[0, 0, y, x]];
			let p = if is_prob { v } else { 1.0 / (1.0 + (-v).exp()) };
			mask.put_pixel(x as u32, y as u32, Luma([(p.clamp(0.0, 1.0) * 255.0).round() as u8]));
		}
	}
	Ok(mask)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::{Array, IxDyn};

	#[test]
	fn normalizes_each_channel() {
		let img = RgbImage::from_pixel(2, 1, image::Rgb([255, 0, 128]));
		let norm = Normalization {
			mean: [0.5, 0.5, 0.5],
			std: [1.0, 0.5, 1.0]
		};
		let t = to_nchw(&img, norm);
		assert_eq!(t.shape(), &[1, 3, 1, 2]);
		assert!((t[[0, 0, 0, 1]] - 0.5).abs() < 1e-6);
		assert!((t[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
	}

	#[test]
	fn probabilities_pass_through() {
		let a = Array::from_shape_vec(IxDyn(&[1, 1, 1, 3]), vec![0.0f32, 0.5, 1.0]).unwrap();
		let m = probability_map(&a.view()).unwrap();
		assert_eq!(m.as_raw(), &vec![0, 128, 255]);
	}

	#[test]
	fn logits_go_through_sigmoid() {
		let a = Array::from_shape_vec(IxDyn(&[1, 1, 1, 3]), vec![-20.0f32, 0.0, 20.0]).unwrap();
		let m = probability_map(&a.view()).unwrap();
		assert_eq!(m.as_raw(), &vec![0, 128, 255]);
	}

	#[test]
	fn rejects_multi_channel_output() {
		let a = Array::from_shape_vec(IxDyn(&[1, 2, 1, 1]), vec![0.0f32, 1.0]).unwrap();
		assert!(probability_map(&a.view()).is_err());
	}
}
