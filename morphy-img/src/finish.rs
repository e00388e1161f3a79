use crate::displacement::Category;
use crate::shapes::rect::Rect;
use image::{Rgb, RgbImage, imageops};
use tracing::{Level, span};

const SHARPEN_KERNEL: [f32; 9] = [-1., -1., -1., -1., 9., -1., -1., -1., -1.];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinishConfig {
    /// Share of the bilateral-smoothed image in the feminine finish
    pub smooth_weight: f32,
    /// Share of the sharpened image in the masculine finish
    pub sharpen_weight: f32,
    pub bilateral_radius: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for FinishConfig {
    fn default() -> Self {
        Self {
            smooth_weight: 0.4,
            sharpen_weight: 0.2,
            bilateral_radius: 4,
            sigma_color: 75.,
            sigma_space: 75.,
        }
    }
}

/// Category dependent tone filter. Only pixel values change, never geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Finisher {
    config: FinishConfig,
}

impl Finisher {
    pub fn new(config: FinishConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FinishConfig {
        &self.config
    }

    pub fn apply(&self, img: &RgbImage, category: Category) -> RgbImage {
        let span = span!(Level::DEBUG, "finish");
        let _guard = span.enter();

        let c = &self.config;
        match category {
            Category::Feminine => {
                let smooth = bilateral(img, c.bilateral_radius, c.sigma_color, c.sigma_space);
                add_weighted(img, &smooth, c.smooth_weight)
            }
            Category::Masculine => add_weighted(img, &sharpen(img), c.sharpen_weight),
        }
    }

    /// Finish only the pixels inside `region`, leaving the rest untouched.
    pub fn apply_region(&self, img: &RgbImage, category: Category, region: Rect) -> RgbImage {
        let mut out = img.clone();
        if region.area() == 0 {
            return out;
        }

        let crop = imageops::crop_imm(img, region.left(), region.top(), region.w, region.h);
        let finished = self.apply(&crop.to_image(), category);
        imageops::replace(
            &mut out,
            &finished,
            region.left() as i64,
            region.top() as i64,
        );

        out
    }
}

/// `(1 - weight) * base + weight * overlay`, rounded.
pub fn add_weighted(base: &RgbImage, overlay: &RgbImage, weight: f32) -> RgbImage {
    let weight = weight.clamp(0., 1.);
    let mut out = base.clone();
    for (o, p) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let v = (1. - weight) * o[c] as f32 + weight * p[c] as f32;
            o[c] = v.round().clamp(0., 255.) as u8;
        }
    }
    out
}

/// 3x3 sharpen. The outermost ring keeps its original values.
pub fn sharpen(img: &RgbImage) -> RgbImage {
    let mut out: RgbImage = imageops::filter3x3(img, &SHARPEN_KERNEL);
    let (w, h) = img.dimensions();
    for (x, y, p) in img.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
            out.put_pixel(x, y, *p);
        }
    }
    out
}

/// Edge preserving smoothing: each pixel becomes the average of its
/// (2 * radius + 1)^2 neighbourhood weighted by spatial distance and by color
/// distance.
pub fn bilateral(img: &RgbImage, radius: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    if radius == 0 || sigma_color <= 0. || sigma_space <= 0. {
        return img.clone();
    }

    let (w, h) = img.dimensions();
    let r = radius as i64;
    let side = (2 * r + 1) as usize;

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let mut spatial = vec![0f32; side * side];
    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = (dx * dx + dy * dy) as f32;
            spatial[((dy + r) as usize) * side + (dx + r) as usize] = (d2 * space_coeff).exp();
        }
    }

    RgbImage::from_fn(w, h, |x, y| {
        let center = img.get_pixel(x, y);
        let mut sum = [0f32; 3];
        let mut norm = 0f32;

        for dy in -r..=r {
            let ny = y as i64 + dy;
            if ny < 0 || ny >= h as i64 {
                continue;
            }
            for dx in -r..=r {
                let nx = x as i64 + dx;
                if nx < 0 || nx >= w as i64 {
                    continue;
                }

                let p = img.get_pixel(nx as u32, ny as u32);
                let c2: f32 = (0..3)
                    .map(|c| {
                        let d = p[c] as f32 - center[c] as f32;
                        d * d
                    })
                    .sum();
                let weight = spatial[((dy + r) as usize) * side + (dx + r) as usize]
                    * (c2 * color_coeff).exp();

                for c in 0..3 {
                    sum[c] += weight * p[c] as f32;
                }
                norm += weight;
            }
        }

        Rgb(sum.map(|s| (s / norm).round().clamp(0., 255.) as u8))
    })
}
