use super::EmbeddingSource;
use super::model::{Session, initialize_model, input_name, output_name};
use crate::error::{MorphError, MorphResult};
use crate::tensor::{ChannelOrder, TensorLayout, ValueRange};
use anyhow::Result;
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array2;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Arc;
use tracing::{Level, span};

pub const MODEL_FILE: &str = "w600k_r50.onnx";
pub const EMBEDDING_LEN: usize = 512;

pub const ARCFACE_LAYOUT: TensorLayout = TensorLayout::new(
    112,
    ChannelOrder::Rgb,
    ValueRange::Centered {
        mean: 127.5,
        scale: 128.,
    },
);

/// Unit length identity vector. Cheap to clone, the values are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> MorphResult<Embedding> {
        if values.len() != EMBEDDING_LEN {
            return Err(MorphError::shape_mismatch(
                "embedding",
                [EMBEDDING_LEN],
                [values.len()],
            ));
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return Err(MorphError::Model(anyhow::anyhow!(
                "embedding norm {norm} cannot be normalized"
            )));
        }

        Ok(Embedding(values.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Shape [1, 512] for model input.
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((1, self.0.len()), |(_, i)| self.0[i])
    }

    pub fn cosine(&self, other: &Embedding) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }
}

/// ArcFace identity model.
pub struct ArcFaceEmbedder {
    model: Session,
    input: String,
    output: String,
    layout: TensorLayout,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path, order: ChannelOrder, threads: usize) -> Result<Self> {
        let model = initialize_model(model_path, threads)?;

        Ok(Self {
            input: input_name(&model, 0)?,
            output: output_name(&model, 0)?,
            model,
            layout: ARCFACE_LAYOUT.with_order(order),
        })
    }
}

impl EmbeddingSource for ArcFaceEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Embedding> {
        let span = span!(Level::DEBUG, "embed");
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
        let values: Vec<f32> = outputs[self.output.as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        Ok(Embedding::new(values)?)
    }
}
