use crate::error::GeometryError;
use crate::shapes::point::PointF32;
use image::{Rgb, RgbImage};
use tps::ThinPlateSpline;
use tracing::{Level, span, trace, warn};

mod tps;

pub const MIN_CONTROL_POINTS: usize = 3;
pub const DEFAULT_GRID_STEP: u32 = 4;

/// Thin-plate spline warp. Every output pixel q is sampled from f(q) in the
/// input, where f maps each dst control point onto its src counterpart.
///
/// The spline is only evaluated on a grid every `grid_step` pixels and
/// bilinearly interpolated in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpsWarper {
    grid_step: u32,
}

impl Default for TpsWarper {
    fn default() -> Self {
        Self {
            grid_step: DEFAULT_GRID_STEP,
        }
    }
}

impl TpsWarper {
    pub fn new(grid_step: u32) -> Self {
        Self {
            grid_step: grid_step.max(1),
        }
    }

    pub fn grid_step(&self) -> u32 {
        self.grid_step
    }

    pub fn try_warp(
        &self,
        img: &RgbImage,
        src: &[PointF32],
        dst: &[PointF32],
    ) -> Result<RgbImage, GeometryError> {
        let span = span!(Level::DEBUG, "tps_warp");
        let _guard = span.enter();

        validate_control_points(src, dst)?;

        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Ok(img.clone());
        }

        let tps = ThinPlateSpline::fit(dst, src, width.max(height) as f32)?;

        let xs = grid_axis(width, self.grid_step);
        let ys = grid_axis(height, self.grid_step);
        trace!("Evaluating spline on {}x{} grid", xs.len(), ys.len());

        let mut nodes = Vec::with_capacity(xs.len() * ys.len());
        for &y in &ys {
            for &x in &xs {
                nodes.push(tps.map(x as f32, y as f32));
            }
        }

        let cols = xs.len();
        let mut out = RgbImage::new(width, height);
        for y in 0..height {
            let (gy, ty) = cell(y, &ys, self.grid_step);
            let gy1 = (gy + 1).min(ys.len() - 1);

            for x in 0..width {
                let (gx, tx) = cell(x, &xs, self.grid_step);
                let gx1 = (gx + 1).min(cols - 1);

                let n00 = nodes[gy * cols + gx];
                let n10 = nodes[gy * cols + gx1];
                let n01 = nodes[gy1 * cols + gx];
                let n11 = nodes[gy1 * cols + gx1];

                let sx = lerp(lerp(n00.0, n10.0, tx), lerp(n01.0, n11.0, tx), ty);
                let sy = lerp(lerp(n00.1, n10.1, tx), lerp(n01.1, n11.1, tx), ty);

                out.put_pixel(x, y, sample_bilinear(img, sx, sy));
            }
        }

        Ok(out)
    }

    /// Like `try_warp`, but hands back the unmodified input when the control
    /// points cannot define a warp.
    pub fn warp(&self, img: &RgbImage, src: &[PointF32], dst: &[PointF32]) -> RgbImage {
        match self.try_warp(img, src, dst) {
            Ok(warped) => warped,
            Err(e) => {
                warn!("Skipping warp: {e}");
                img.clone()
            }
        }
    }
}

/// Warp with the default grid step, returning the input on degenerate
/// control points.
pub fn warp(img: &RgbImage, src: &[PointF32], dst: &[PointF32]) -> RgbImage {
    TpsWarper::default().warp(img, src, dst)
}

pub fn validate_control_points(src: &[PointF32], dst: &[PointF32]) -> Result<(), GeometryError> {
    if src.len() != dst.len() {
        return Err(GeometryError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }

    if dst.len() < MIN_CONTROL_POINTS {
        return Err(GeometryError::TooFewPoints {
            min: MIN_CONTROL_POINTS,
            found: dst.len(),
        });
    }

    if let Some(idx) = src
        .iter()
        .zip(dst)
        .position(|(s, d)| !s.is_finite() || !d.is_finite())
    {
        return Err(GeometryError::NonFinite(idx));
    }

    if all_collinear(dst) {
        return Err(GeometryError::Collinear);
    }

    Ok(())
}

fn all_collinear(points: &[PointF32]) -> bool {
    let Some(&a) = points.first() else {
        return true;
    };
    let Some(&b) = points.iter().find(|p| **p != a) else {
        return true;
    };

    points
        .iter()
        .all(|&c| robust::orient2d(a.into(), b.into(), c.into()) == 0.)
}

// Node positions along one axis: every `step` pixels plus the last pixel.
fn grid_axis(len: u32, step: u32) -> Vec<u32> {
    let mut nodes: Vec<u32> = (0..len).step_by(step as usize).collect();
    if nodes.last().is_some_and(|&last| last != len - 1) {
        nodes.push(len - 1);
    }
    nodes
}

// Grid cell containing p and the fractional position within it
fn cell(p: u32, nodes: &[u32], step: u32) -> (usize, f32) {
    let i = ((p / step) as usize).min(nodes.len() - 1);
    if i + 1 >= nodes.len() {
        return (i, 0.);
    }

    let span = (nodes[i + 1] - nodes[i]) as f32;
    (i, (p - nodes[i]) as f32 / span)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Bilinear sample at a fractional position, clamping to the nearest edge
/// pixel outside the image.
pub fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let max_x = img.width().saturating_sub(1) as f32;
    let max_y = img.height().saturating_sub(1) as f32;
    let x = if x.is_finite() { x.clamp(0., max_x) } else { 0. };
    let y = if y.is_finite() { y.clamp(0., max_y) } else { 0. };

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(max_x as u32);
    let y1 = (y0 + 1).min(max_y as u32);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    Rgb(std::array::from_fn(|c| {
        let top = lerp(p00[c] as f32, p10[c] as f32, fx);
        let bottom = lerp(p01[c] as f32, p11[c] as f32, fx);
        lerp(top, bottom, fy).round().clamp(0., 255.) as u8
    }))
}
