use crate::error::{MorphError, MorphResult};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl ChannelOrder {
    // Source pixel channel for tensor channel c
    fn channel(&self, c: usize) -> usize {
        match self {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => 2 - c,
        }
    }
}

impl FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(ChannelOrder::Rgb),
            "bgr" => Ok(ChannelOrder::Bgr),
            _ => Err(format!("unknown channel order {s:?}, expected rgb or bgr")),
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOrder::Rgb => write!(f, "rgb"),
            ChannelOrder::Bgr => write!(f, "bgr"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRange {
    /// v / 255
    ZeroToOne,
    /// v / 127.5 - 1
    NegOneToOne,
    /// (v - mean) / scale
    Centered { mean: f32, scale: f32 },
}

impl ValueRange {
    pub fn normalize(&self, v: u8) -> f32 {
        let v = v as f32;
        match *self {
            ValueRange::ZeroToOne => v / 255.,
            ValueRange::NegOneToOne => v / 127.5 - 1.,
            ValueRange::Centered { mean, scale } => (v - mean) / scale,
        }
    }

    pub fn denormalize(&self, t: f32) -> u8 {
        let v = match *self {
            ValueRange::ZeroToOne => t * 255.,
            ValueRange::NegOneToOne => (t + 1.) * 127.5,
            ValueRange::Centered { mean, scale } => t * scale + mean,
        };

        if v.is_nan() {
            return 0;
        }
        v.round().clamp(0., 255.) as u8
    }
}

/// How an image is laid out when handed to, or read back from, a model:
/// square `size`, NCHW, channels in `order`, values mapped by `range`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorLayout {
    pub size: u32,
    pub order: ChannelOrder,
    pub range: ValueRange,
}

impl TensorLayout {
    pub const fn new(size: u32, order: ChannelOrder, range: ValueRange) -> Self {
        Self { size, order, range }
    }

    pub fn with_order(self, order: ChannelOrder) -> Self {
        Self { order, ..self }
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.size as usize;
        [1, 3, s, s]
    }

    pub fn to_tensor(&self, img: &RgbImage) -> MorphResult<Array4<f32>> {
        if img.dimensions() != (self.size, self.size) {
            return Err(MorphError::shape_mismatch(
                "tensor input",
                [self.size as usize, self.size as usize],
                [img.width() as usize, img.height() as usize],
            ));
        }

        Ok(Array4::from_shape_fn(self.shape(), |(_, c, y, x)| {
            let p = img.get_pixel(x as u32, y as u32);
            self.range.normalize(p[self.order.channel(c)])
        }))
    }

    pub fn to_image(&self, tensor: ArrayViewD<f32>) -> MorphResult<RgbImage> {
        let expected = self.shape();
        if tensor.shape() != expected {
            return Err(MorphError::shape_mismatch(
                "tensor output",
                expected,
                tensor.shape(),
            ));
        }

        let tensor = tensor
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| MorphError::Model(e.into()))?;

        Ok(RgbImage::from_fn(self.size, self.size, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let mut px = [0u8; 3];
            for c in 0..3 {
                px[self.order.channel(c)] = self.range.denormalize(tensor[[0, c, y, x]]);
            }
            Rgb(px)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn sample() -> RgbImage {
        RgbImage::from_fn(4, 4, |x, y| Rgb([10 * x as u8, 10 * y as u8, 255]))
    }

    #[test]
    fn test_rgb_order() {
        let layout = TensorLayout::new(4, ChannelOrder::Rgb, ValueRange::ZeroToOne);
        let t = layout.to_tensor(&sample()).unwrap();

        assert_eq!(t.shape(), &[1, 3, 4, 4]);
        // [n, c, y, x]
        assert!((t[[0, 0, 1, 3]] - 30. / 255.).abs() < 1e-6);
        assert!((t[[0, 1, 1, 3]] - 10. / 255.).abs() < 1e-6);
        assert_eq!(t[[0, 2, 1, 3]], 1.);
    }

    #[test]
    fn test_bgr_order() {
        let layout = TensorLayout::new(4, ChannelOrder::Bgr, ValueRange::ZeroToOne);
        let t = layout.to_tensor(&sample()).unwrap();

        assert_eq!(t[[0, 0, 1, 3]], 1.);
        assert!((t[[0, 2, 1, 3]] - 30. / 255.).abs() < 1e-6);

        let back = layout.to_image(t.view().into_dyn()).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_value_ranges() {
        assert_eq!(ValueRange::NegOneToOne.normalize(0), -1.);
        assert_eq!(ValueRange::NegOneToOne.normalize(255), 1.);

        let arcface = ValueRange::Centered {
            mean: 127.5,
            scale: 128.,
        };
        assert_eq!(arcface.normalize(255), 127.5 / 128.);
        assert_eq!(arcface.denormalize(arcface.normalize(37)), 37);

        // out of range model output is clipped
        assert_eq!(ValueRange::ZeroToOne.denormalize(1.7), 255);
        assert_eq!(ValueRange::ZeroToOne.denormalize(-0.2), 0);
        assert_eq!(ValueRange::ZeroToOne.denormalize(f32::NAN), 0);
        assert_eq!(ValueRange::ZeroToOne.denormalize(0.5), 128);
    }

    #[test]
    fn test_shape_rejection() {
        let layout = TensorLayout::new(8, ChannelOrder::Rgb, ValueRange::ZeroToOne);
        assert!(matches!(
            layout.to_tensor(&sample()),
            Err(MorphError::ShapeMismatch { .. })
        ));

        let wrong = Array::<f32, _>::zeros((1, 3, 8, 4)).into_dyn();
        assert!(matches!(
            layout.to_image(wrong.view()),
            Err(MorphError::ShapeMismatch { .. })
        ));

        let nhwc = Array::<f32, _>::zeros((1, 8, 8, 3)).into_dyn();
        assert!(layout.to_image(nhwc.view()).is_err());
    }

    #[test]
    fn test_channel_order_from_str() {
        assert_eq!("BGR".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
        assert!("rgba".parse::<ChannelOrder>().is_err());
    }
}
