use crate::align::AffineTransform;
use crate::displacement::Category;
use crate::error::{MorphError, MorphResult};
use crate::finish::Finisher;
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use tracing::{Level, span, warn};

pub const DEFAULT_BLEND_SIGMA: f32 = 1.1;

/// Pastes an aligned crop back into the frame it was cut from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compositor {
    blur_sigma: f32,
    finisher: Finisher,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            blur_sigma: DEFAULT_BLEND_SIGMA,
            finisher: Finisher::default(),
        }
    }
}

impl Compositor {
    pub fn new(blur_sigma: f32, finisher: Finisher) -> Self {
        Self {
            blur_sigma,
            finisher,
        }
    }

    pub fn finisher(&self) -> &Finisher {
        &self.finisher
    }

    /// Finish `patch`, map it back through the inverse of `transform` and
    /// blend it over `original` with a feathered coverage mask.
    pub fn try_composite(
        &self,
        original: &RgbImage,
        patch: &RgbImage,
        transform: &AffineTransform,
        category: Category,
    ) -> MorphResult<RgbImage> {
        let span = span!(Level::DEBUG, "composite");
        let _guard = span.enter();

        let (pw, ph) = patch.dimensions();
        if pw != ph || pw == 0 {
            return Err(MorphError::shape_mismatch(
                "patch",
                [pw as usize, pw as usize],
                [pw as usize, ph as usize],
            ));
        }

        let (w, h) = original.dimensions();
        let finished = self.finisher.apply(patch, category);
        let warped = transform.unwarp_image(&finished, w, h)?;
        let mask = feather(&binarize(transform.unwarp_mask(pw, w, h)?), self.blur_sigma);

        blend(original, &warped, &mask)
    }

    /// Like `try_composite`, returning `original` on failure.
    pub fn composite(
        &self,
        original: &RgbImage,
        patch: &RgbImage,
        transform: &AffineTransform,
        category: Category,
    ) -> RgbImage {
        match self.try_composite(original, patch, transform, category) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping composite: {e}");
                original.clone()
            }
        }
    }

    /// Finish a frame sized patch then blend it over `original` through
    /// `mask`.
    pub fn blend_finished(
        &self,
        original: &RgbImage,
        patch: &RgbImage,
        mask: &GrayImage,
        category: Category,
    ) -> MorphResult<RgbImage> {
        check_dimensions(original, patch, mask)?;
        blend(original, &self.finisher.apply(patch, category), mask)
    }
}

fn check_dimensions(original: &RgbImage, patch: &RgbImage, mask: &GrayImage) -> MorphResult<()> {
    let (w, h) = original.dimensions();
    let expected = [w as usize, h as usize];

    if patch.dimensions() != (w, h) {
        return Err(MorphError::shape_mismatch(
            "patch",
            expected,
            [patch.width() as usize, patch.height() as usize],
        ));
    }
    if mask.dimensions() != (w, h) {
        return Err(MorphError::shape_mismatch(
            "mask",
            expected,
            [mask.width() as usize, mask.height() as usize],
        ));
    }

    Ok(())
}

/// `(1 - alpha) * original + alpha * patch` with alpha = mask / 255.
pub fn blend(original: &RgbImage, patch: &RgbImage, mask: &GrayImage) -> MorphResult<RgbImage> {
    check_dimensions(original, patch, mask)?;

    let mut out = original.clone();
    for ((o, p), m) in out.pixels_mut().zip(patch.pixels()).zip(mask.pixels()) {
        match m[0] {
            0 => {}
            255 => *o = *p,
            a => {
                let alpha = a as f32 / 255.;
                for c in 0..3 {
                    let v = (1. - alpha) * o[c] as f32 + alpha * p[c] as f32;
                    o[c] = v.round().clamp(0., 255.) as u8;
                }
            }
        }
    }

    Ok(out)
}

/// Gaussian blur a mask to soften its edges. Fully covered and fully
/// uncovered areas away from the edge stay exactly 255 and 0.
pub fn feather(mask: &GrayImage, sigma: f32) -> GrayImage {
    if sigma.is_nan() || sigma <= 0. {
        return mask.clone();
    }

    let (w, h) = mask.dimensions();
    let values: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(w, h, |x, y| Luma([mask.get_pixel(x, y)[0] as f32]));
    let blurred = gaussian_blur_f32(&values, sigma);

    GrayImage::from_fn(w, h, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0., 255.) as u8])
    })
}

// Anything at least half covered counts as inside
fn binarize(mut mask: GrayImage) -> GrayImage {
    for p in mask.pixels_mut() {
        p[0] = if p[0] >= 128 { 255 } else { 0 };
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{estimate_alignment, template};
    use crate::shapes::point::PointF32;
    use image::Rgb;

    fn frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 3 % 256) as u8, (y * 2 % 256) as u8, 40]))
    }

    #[test]
    fn test_zero_mask_returns_original() {
        let original = frame(20, 20);
        let patch = RgbImage::from_pixel(20, 20, Rgb([255, 0, 0]));
        let mask = GrayImage::new(20, 20);

        let out = Compositor::default()
            .blend_finished(&original, &patch, &mask, Category::Feminine)
            .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_full_mask_returns_finished_patch() {
        let original = frame(20, 20);
        let mut patch = frame(20, 20);
        for p in patch.pixels_mut() {
            p[2] = 255 - p[2];
        }
        let mask = GrayImage::from_pixel(20, 20, Luma([255]));
        let compositor = Compositor::default();

        for category in [Category::Feminine, Category::Masculine] {
            let out = compositor
                .blend_finished(&original, &patch, &mask, category)
                .unwrap();
            assert_eq!(out, compositor.finisher().apply(&patch, category));
        }
    }

    #[test]
    fn test_blend_halfway() {
        let original = RgbImage::from_pixel(1, 1, Rgb([0, 100, 200]));
        let patch = RgbImage::from_pixel(1, 1, Rgb([255, 200, 0]));
        let mask = GrayImage::from_pixel(1, 1, Luma([51]));

        let out = blend(&original, &patch, &mask).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([51, 120, 160]));
    }

    #[test]
    fn test_feather_keeps_interior() {
        let mut mask = GrayImage::new(60, 60);
        for y in 10..50 {
            for x in 10..50 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let soft = feather(&mask, 2.);

        assert_eq!(soft.get_pixel(30, 30)[0], 255);
        assert_eq!(soft.get_pixel(1, 1)[0], 0);
        let edge = soft.get_pixel(10, 30)[0];
        assert!(edge > 0 && edge < 255);
    }

    #[test]
    fn test_dimension_mismatch() {
        let original = frame(20, 20);
        let patch = frame(20, 20);

        assert!(matches!(
            blend(&original, &patch, &GrayImage::new(10, 20)),
            Err(MorphError::ShapeMismatch { what: "mask", .. })
        ));
        assert!(matches!(
            blend(&original, &frame(20, 21), &GrayImage::new(20, 20)),
            Err(MorphError::ShapeMismatch { what: "patch", .. })
        ));
    }

    #[test]
    fn test_composite_pastes_inside_crop_only() {
        let original = frame(200, 200);
        let anchors = template(128).map(|p| PointF32::new(p.x * 0.8 + 50., p.y * 0.8 + 40.));
        let transform = estimate_alignment(&anchors, 128).unwrap();
        let patch = RgbImage::from_pixel(128, 128, Rgb([250, 250, 250]));

        let out = Compositor::default().composite(&original, &patch, &transform, Category::Feminine);

        // crop covers roughly [50, 152] x [40, 142]
        let inside = out.get_pixel(100, 90);
        assert!(inside.0.iter().all(|&v| v.abs_diff(250) <= 1), "{inside:?}");
        assert_eq!(out.get_pixel(10, 190), original.get_pixel(10, 190));
        assert_eq!(out.get_pixel(190, 10), original.get_pixel(190, 10));
    }

    #[test]
    fn test_composite_failure_returns_original() {
        let original = frame(50, 50);
        let compositor = Compositor::default();
        let transform = estimate_alignment(&template(128), 128).unwrap();

        // not square
        let out = compositor.composite(&original, &frame(30, 20), &transform, Category::Masculine);
        assert_eq!(out, original);

        let singular = AffineTransform {
            m: [[0., 0., 1.], [0., 0., 1.]],
        };
        assert!(compositor
            .try_composite(&original, &frame(16, 16), &singular, Category::Masculine)
            .is_err());
        let out = compositor.composite(&original, &frame(16, 16), &singular, Category::Masculine);
        assert_eq!(out, original);
    }
}
