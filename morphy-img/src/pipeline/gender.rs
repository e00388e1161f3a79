use super::GenderSource;
use super::model::{Session, initialize_model, input_name, output_name};
use crate::displacement::Category;
use crate::tensor::{ChannelOrder, TensorLayout, ValueRange};
use anyhow::{Result, anyhow};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ort::value::Tensor;
use std::fmt;
use std::path::Path;
use tracing::{Level, span};

pub const MODEL_FILE: &str = "genderage.onnx";

/// Raw pixel values, 96x96.
pub const GENDERAGE_LAYOUT: TensorLayout = TensorLayout::new(
    96,
    ChannelOrder::Rgb,
    ValueRange::Centered {
        mean: 0.,
        scale: 1.,
    },
);

/// Category a face currently reads as, with the classifier's confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenderEstimate {
    pub category: Category,
    pub probability: f32,
}

impl GenderEstimate {
    /// Estimate from two scores ordered (feminine, masculine).
    pub fn from_logits(feminine: f32, masculine: f32) -> Result<GenderEstimate> {
        if !feminine.is_finite() || !masculine.is_finite() {
            return Err(anyhow!("non finite gender scores {feminine}, {masculine}"));
        }

        // softmax over two classes
        let p_masculine = 1. / (1. + (feminine - masculine).exp());
        Ok(if p_masculine > 0.5 {
            GenderEstimate {
                category: Category::Masculine,
                probability: p_masculine,
            }
        } else {
            GenderEstimate {
                category: Category::Feminine,
                probability: 1. - p_masculine,
            }
        })
    }
}

impl fmt::Display for GenderEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.0}%)", self.category, self.probability * 100.)
    }
}

/// InsightFace gender/age model. The first two outputs score feminine and
/// masculine, the third is age / 100 and unused here.
pub struct GenderAgeClassifier {
    model: Session,
    input: String,
    output: String,
    layout: TensorLayout,
}

impl GenderAgeClassifier {
    pub fn new(model_path: &Path, order: ChannelOrder, threads: usize) -> Result<Self> {
        let model = initialize_model(model_path, threads)?;

        Ok(Self {
            input: input_name(&model, 0)?,
            output: output_name(&model, 0)?,
            model,
            layout: GENDERAGE_LAYOUT.with_order(order),
        })
    }
}

impl GenderSource for GenderAgeClassifier {
    fn crop_size(&self) -> u32 {
        self.layout.size
    }

    fn classify(&self, face: &RgbImage) -> Result<GenderEstimate> {
        let span = span!(Level::DEBUG, "classify_gender");
        let _guard = span.enter();

        let size = self.layout.size;
        let input = if face.dimensions() == (size, size) {
            self.layout.to_tensor(face)?
        } else {
            let resized = imageops::resize(face, size, size, FilterType::Triangle);
            self.layout.to_tensor(&resized)?
        };

        let outputs = self
            .model
            .run(ort::inputs![self.input.as_str() => Tensor::from_array(input)?]?)?;
        let scores: Vec<f32> = outputs[self.output.as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        match scores.as_slice() {
            [feminine, masculine, ..] => GenderEstimate::from_logits(*feminine, *masculine),
            _ => Err(anyhow!("expected at least 2 gender scores, found {}", scores.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_logits() {
        let even = GenderEstimate::from_logits(0., 0.).unwrap();
        assert_eq!(even.category, Category::Feminine);
        assert_eq!(even.probability, 0.5);

        let masc = GenderEstimate::from_logits(-1., 1.).unwrap();
        assert_eq!(masc.category, Category::Masculine);
        assert!((masc.probability - 0.8808).abs() < 1e-3);

        let fem = GenderEstimate::from_logits(4., -4.).unwrap();
        assert_eq!(fem.category, Category::Feminine);
        assert!(fem.probability > 0.99);

        assert!(GenderEstimate::from_logits(f32::NAN, 0.).is_err());
    }

    #[test]
    fn test_display() {
        let estimate = GenderEstimate {
            category: Category::Masculine,
            probability: 0.874,
        };
        assert_eq!(estimate.to_string(), "masculine (87%)");
    }

    #[test]
    fn test_layout_keeps_raw_values() {
        assert_eq!(GENDERAGE_LAYOUT.shape(), [1, 3, 96, 96]);
        assert_eq!(GENDERAGE_LAYOUT.range.normalize(200), 200.);
    }
}
