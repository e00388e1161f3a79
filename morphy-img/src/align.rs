use crate::error::GeometryError;
use crate::shapes::point::PointF32;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::trace;

/// Side length the alignment template is expressed in.
pub const TEMPLATE_SIZE: u32 = 112;

// left eye, right eye, nose tip, left mouth corner, right mouth corner
pub const ARCFACE_TEMPLATE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

const DET_EPSILON: f64 = 1e-12;

/// 2x3 affine matrix mapping frame coordinates into crop coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m: [[f32; 3]; 2],
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        m: [[1., 0., 0.], [0., 1., 0.]],
    };

    pub fn apply(&self, p: PointF32) -> PointF32 {
        let m = &self.m;
        PointF32::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2],
        )
    }

    pub fn invert(&self) -> Result<AffineTransform, GeometryError> {
        let [[a, b, c], [d, e, f]] = self.m.map(|row| row.map(f64::from));
        let det = a * e - b * d;
        if !det.is_finite() || det.abs() < DET_EPSILON {
            return Err(GeometryError::Singular);
        }

        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;

        Ok(AffineTransform {
            m: [
                [ia as f32, ib as f32, (-(ia * c + ib * f)) as f32],
                [id as f32, ie as f32, (-(id * c + ie * f)) as f32],
            ],
        })
    }

    pub fn to_projection(&self) -> Result<Projection, GeometryError> {
        let m = &self.m;
        Projection::from_matrix([
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], 0., 0., 1.,
        ])
        .ok_or(GeometryError::Singular)
    }

    /// Map a crop-space image back into a `width` x `height` frame. Pixels
    /// the crop does not cover are black.
    pub fn unwarp_image(
        &self,
        patch: &RgbImage,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, GeometryError> {
        let projection = self.invert()?.to_projection()?;
        let mut out = RgbImage::new(width, height);
        warp_into(
            patch,
            &projection,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut out,
        );
        Ok(out)
    }

    /// Coverage of a `crop_size` square crop within the frame, 255 inside.
    pub fn unwarp_mask(
        &self,
        crop_size: u32,
        width: u32,
        height: u32,
    ) -> Result<GrayImage, GeometryError> {
        let projection = self.invert()?.to_projection()?;
        let white = GrayImage::from_pixel(crop_size, crop_size, Luma([255]));
        let mut out = GrayImage::new(width, height);
        warp_into(
            &white,
            &projection,
            Interpolation::Bilinear,
            Luma([0]),
            &mut out,
        );
        Ok(out)
    }
}

pub fn template(crop_size: u32) -> [PointF32; 5] {
    let scale = crop_size as f32 / TEMPLATE_SIZE as f32;
    ARCFACE_TEMPLATE.map(|[x, y]| PointF32::new(x * scale, y * scale))
}

/// Least squares similarity transform (rotation, uniform scale and
/// translation) taking the five anchors onto the template scaled to
/// `crop_size`.
pub fn estimate_alignment(
    anchors: &[PointF32; 5],
    crop_size: u32,
) -> Result<AffineTransform, GeometryError> {
    if let Some(idx) = anchors.iter().position(|p| !p.is_finite()) {
        return Err(GeometryError::NonFinite(idx));
    }

    let dst = template(crop_size);
    let n = anchors.len() as f64;

    let (mut sx, mut sy, mut dx, mut dy) = (0., 0., 0., 0.);
    for (s, d) in anchors.iter().zip(&dst) {
        sx += s.x as f64;
        sy += s.y as f64;
        dx += d.x as f64;
        dy += d.y as f64;
    }
    let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

    let (mut norm, mut dot, mut cross) = (0., 0., 0.);
    for (s, d) in anchors.iter().zip(&dst) {
        let (px, py) = (s.x as f64 - sx, s.y as f64 - sy);
        let (qx, qy) = (d.x as f64 - dx, d.y as f64 - dy);
        norm += px * px + py * py;
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
    }

    // all anchors on top of each other
    if norm < DET_EPSILON {
        return Err(GeometryError::Singular);
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = dx - (a * sx - b * sy);
    let ty = dy - (b * sx + a * sy);
    trace!("Alignment scale {:.3}", (a * a + b * b).sqrt());

    Ok(AffineTransform {
        m: [
            [a as f32, -b as f32, tx as f32],
            [b as f32, a as f32, ty as f32],
        ],
    })
}

/// Sample the `crop_size` square aligned crop out of `img`.
pub fn align_crop(
    img: &RgbImage,
    transform: &AffineTransform,
    crop_size: u32,
) -> Result<RgbImage, GeometryError> {
    let projection = transform.to_projection()?;
    let mut out = RgbImage::new(crop_size, crop_size);
    warp_into(
        img,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut out,
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posed_anchors() -> [PointF32; 5] {
        let theta = 0.3f32;
        let mut anchors = ARCFACE_TEMPLATE.map(|[x, y]| PointF32::new(x * 1.7 + 40., y * 1.7 + 25.));
        let origin = anchors[2];
        for a in anchors.iter_mut() {
            a.rotate(origin, theta);
        }
        anchors
    }

    #[test]
    fn test_anchors_land_on_template() {
        let anchors = posed_anchors();
        let transform = estimate_alignment(&anchors, 128).unwrap();

        for (a, t) in anchors.iter().zip(template(128)) {
            let p = transform.apply(*a);
            assert!(p.dist(&t) < 1., "{p:?} vs {t:?}");
        }
    }

    #[test]
    fn test_invert_round_trip() {
        let anchors = posed_anchors();
        let transform = estimate_alignment(&anchors, 128).unwrap();
        let inverse = transform.invert().unwrap();

        for a in anchors {
            let back = inverse.apply(transform.apply(a));
            assert!(back.dist(&a) < 1e-2);
        }
    }

    #[test]
    fn test_degenerate_anchors() {
        let same = [PointF32::new(10., 10.); 5];
        assert_eq!(estimate_alignment(&same, 128), Err(GeometryError::Singular));

        let mut nan = posed_anchors();
        nan[1] = PointF32::new(f32::NAN, 0.);
        assert_eq!(estimate_alignment(&nan, 128), Err(GeometryError::NonFinite(1)));

        let flat = AffineTransform {
            m: [[1., 2., 0.], [2., 4., 0.]],
        };
        assert_eq!(flat.invert(), Err(GeometryError::Singular));
    }

    #[test]
    fn test_crop_and_unwarp() {
        let img = RgbImage::from_fn(300, 300, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let transform = estimate_alignment(&posed_anchors(), 128).unwrap();

        let crop = align_crop(&img, &transform, 128).unwrap();
        assert_eq!(crop.dimensions(), (128, 128));

        let mask = transform.unwarp_mask(128, 300, 300).unwrap();
        let center = transform.invert().unwrap().apply(PointF32::new(64., 64.));
        assert_eq!(mask.get_pixel(center.x as u32, center.y as u32)[0], 255);
        assert_eq!(mask.get_pixel(0, 299)[0], 0);

        let back = transform.unwarp_image(&crop, 300, 300).unwrap();
        let p = back.get_pixel(center.x.round() as u32, center.y.round() as u32);
        let q = img.get_pixel(center.x.round() as u32, center.y.round() as u32);
        assert!((p[0] as i32 - q[0] as i32).abs() <= 3);
        assert!((p[1] as i32 - q[1] as i32).abs() <= 3);
    }

    #[test]
    fn test_identity_alignment() {
        let transform = estimate_alignment(&template(112), 112).unwrap();
        for (a, b) in transform.m.iter().flatten().zip(AffineTransform::IDENTITY.m.iter().flatten()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
