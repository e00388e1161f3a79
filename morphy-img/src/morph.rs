use crate::composite::{blend, feather};
use crate::displacement::{Category, Displacer};
use crate::error::MorphResult;
use crate::finish::Finisher;
use crate::landmarks::LandmarkSet;
use crate::shapes::point::PointF32;
use crate::shapes::polygon::Polygon;
use crate::shapes::rect::Rect;
use crate::warp::TpsWarper;
use image::RgbImage;
use tracing::{Level, debug, span, warn};

pub const DEFAULT_FEATHER_SIGMA: f32 = 5.0;

/// Geometric morph of one face: displace landmarks, warp the frame and blend
/// the finished result back in through a feathered face region.
#[derive(Debug, Clone)]
pub struct Morpher {
    displacer: Displacer,
    warper: TpsWarper,
    finisher: Finisher,
    feather_sigma: f32,
}

impl Default for Morpher {
    fn default() -> Self {
        Self {
            displacer: Displacer::default(),
            warper: TpsWarper::default(),
            finisher: Finisher::default(),
            feather_sigma: DEFAULT_FEATHER_SIGMA,
        }
    }
}

impl Morpher {
    pub fn new(
        displacer: Displacer,
        warper: TpsWarper,
        finisher: Finisher,
        feather_sigma: f32,
    ) -> Self {
        Self {
            displacer,
            warper,
            finisher,
            feather_sigma,
        }
    }

    pub fn displacer(&self) -> &Displacer {
        &self.displacer
    }

    pub fn try_morph(
        &self,
        frame: &RgbImage,
        landmarks: &LandmarkSet,
        category: Category,
        intensity: f32,
    ) -> MorphResult<RgbImage> {
        let span = span!(Level::DEBUG, "morph");
        let _guard = span.enter();

        let (w, h) = frame.dimensions();
        let points = self.displacer.displace(landmarks, category, intensity, w, h);

        // face points only, border pins excluded
        let n = landmarks.len();
        let face: Vec<PointF32> = points.src[..n]
            .iter()
            .chain(&points.dst[..n])
            .copied()
            .collect();
        let hull = Polygon::convex_hull(&face);
        if hull.is_degenerate() {
            debug!("Face region is empty, nothing to morph");
            return Ok(frame.clone());
        }

        let warped = self.warper.try_warp(frame, &points.src, &points.dst)?;

        let mask = feather(&hull.fill_mask(w, h), self.feather_sigma);
        let finished = match Rect::bounding(&hull.points, w, h) {
            Some(bounds) => {
                let pad = (3. * self.feather_sigma.max(0.)).ceil() as u32
                    + self.finisher.config().bilateral_radius;
                self.finisher
                    .apply_region(&warped, category, bounds.pad(pad, w, h))
            }
            None => warped,
        };

        blend(frame, &finished, &mask)
    }

    /// Like `try_morph`, returning the input frame on failure.
    pub fn morph(
        &self,
        frame: &RgbImage,
        landmarks: &LandmarkSet,
        category: Category,
        intensity: f32,
    ) -> RgbImage {
        match self.try_morph(frame, landmarks, category, intensity) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping morph: {e}");
                frame.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::FACE_MESH_LEN;
    use image::Rgb;

    fn textured(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 5 % 256) as u8, (y * 3 % 256) as u8, ((x + y) * 2 % 256) as u8])
        })
    }

    // Landmarks on a disc of radius 0.2 around the frame center
    fn disc_landmarks() -> LandmarkSet {
        let golden = std::f32::consts::PI * (3. - 5f32.sqrt());
        LandmarkSet::new(
            (0..FACE_MESH_LEN)
                .map(|i| {
                    let r = 0.2 * ((i as f32 + 0.5) / FACE_MESH_LEN as f32).sqrt();
                    let theta = i as f32 * golden;
                    PointF32::new(0.5 + r * theta.cos(), 0.5 + r * theta.sin())
                })
                .collect(),
        )
    }

    #[test]
    fn test_zero_intensity_without_finish_is_identity() {
        let frame = textured(120, 120);
        let morpher = Morpher::new(
            Displacer::default(),
            TpsWarper::default(),
            Finisher::new(crate::finish::FinishConfig {
                smooth_weight: 0.,
                sharpen_weight: 0.,
                ..Default::default()
            }),
            DEFAULT_FEATHER_SIGMA,
        );

        let out = morpher.morph(&frame, &disc_landmarks(), Category::Feminine, 0.);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_far_pixels_untouched() {
        let frame = textured(160, 160);
        let morpher = Morpher::default();

        let out = morpher
            .try_morph(&frame, &disc_landmarks(), Category::Masculine, 1.)
            .unwrap();
        assert_ne!(out, frame);

        // face spans roughly [48, 112]
        for (x, y) in [(0, 0), (5, 150), (155, 20), (10, 80), (150, 150)] {
            assert_eq!(out.get_pixel(x, y), frame.get_pixel(x, y), "({x}, {y})");
        }
    }

    #[test]
    fn test_empty_landmarks_pass_through() {
        let frame = textured(40, 40);
        let out = Morpher::default()
            .try_morph(&frame, &LandmarkSet::default(), Category::Feminine, 1.)
            .unwrap();
        assert_eq!(out, frame);
    }
}
