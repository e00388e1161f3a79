use super::SynthesisSource;
use super::embedding::Embedding;
use super::model::{Session, initialize_model, input_name, output_name};
use crate::tensor::{ChannelOrder, TensorLayout, ValueRange};
use anyhow::Result;
use image::RgbImage;
use ort::value::Tensor;
use std::path::Path;
use tracing::{Level, span};

pub const MODEL_FILE: &str = "inswapper_128.onnx";

pub const INSWAPPER_LAYOUT: TensorLayout =
    TensorLayout::new(128, ChannelOrder::Rgb, ValueRange::ZeroToOne);

/// Identity conditioned face generator: aligned crop plus identity
/// embedding in, same sized crop with the identity applied out.
pub struct InSwapper {
    model: Session,
    target: String,
    source: String,
    output: String,
    layout: TensorLayout,
}

impl InSwapper {
    pub fn new(
        model_path: &Path,
        order: ChannelOrder,
        crop_size: u32,
        threads: usize,
    ) -> Result<Self> {
        let model = initialize_model(model_path, threads)?;

        Ok(Self {
            target: input_name(&model, 0)?,
            source: input_name(&model, 1)?,
            output: output_name(&model, 0)?,
            model,
            layout: TensorLayout {
                size: crop_size,
                ..INSWAPPER_LAYOUT.with_order(order)
            },
        })
    }
}

impl SynthesisSource for InSwapper {
    fn crop_size(&self) -> u32 {
        self.layout.size
    }

    fn synthesize(&self, crop: &RgbImage, identity: &Embedding) -> Result<RgbImage> {
        let span = span!(Level::DEBUG, "synthesize");
        let _guard = span.enter();

        let target = self.layout.to_tensor(crop)?;
        let source = identity.to_array();

        let outputs = self.model.run(ort::inputs![
            self.target.as_str() => Tensor::from_array(target)?,
            self.source.as_str() => Tensor::from_array(source)?
        ]?)?;
        let face = outputs[self.output.as_str()].try_extract_tensor::<f32>()?;

        Ok(self.layout.to_image(face)?)
    }
}
