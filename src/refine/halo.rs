use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;

/// Shaves `radius` pixels off every mask boundary.
pub fn erode_halo(mask: &GrayImage, radius: u8) -> GrayImage {
	if radius == 0 {
		return mask.clone();
	}
	erode(mask, Norm::LInf, radius)
}
