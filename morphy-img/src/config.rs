use crate::composite::{Compositor, DEFAULT_BLEND_SIGMA};
use crate::displacement::{Category, Displacer, OffsetTable};
use crate::finish::{FinishConfig, Finisher};
use crate::morph::{DEFAULT_FEATHER_SIGMA, Morpher};
use crate::tensor::ChannelOrder;
use crate::warp::{DEFAULT_GRID_STEP, TpsWarper};

pub const DEFAULT_CROP_SIZE: u32 = 128;

/// Tunables for the whole pipeline. Every field has a working default.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphConfig {
    pub offsets: OffsetTable,
    pub max_intensity: f32,
    /// Keep displaced landmarks inside the frame
    pub clamp_to_frame: bool,
    pub grid_step: u32,
    /// Blur applied to the morph region mask
    pub feather_sigma: f32,
    /// Blur applied to the swap coverage mask
    pub blend_sigma: f32,
    pub finish: FinishConfig,
    pub crop_size: u32,
    /// Category the swap model produces faces for
    pub swap_category: Category,
    pub channel_order: ChannelOrder,
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self {
            offsets: OffsetTable::default(),
            max_intensity: 1.,
            clamp_to_frame: true,
            grid_step: DEFAULT_GRID_STEP,
            feather_sigma: DEFAULT_FEATHER_SIGMA,
            blend_sigma: DEFAULT_BLEND_SIGMA,
            finish: FinishConfig::default(),
            crop_size: DEFAULT_CROP_SIZE,
            swap_category: Category::Feminine,
            channel_order: ChannelOrder::default(),
        }
    }
}

impl MorphConfig {
    pub fn displacer(&self) -> Displacer {
        Displacer::new(self.offsets.clone(), self.max_intensity, self.clamp_to_frame)
    }

    pub fn warper(&self) -> TpsWarper {
        TpsWarper::new(self.grid_step)
    }

    pub fn finisher(&self) -> Finisher {
        Finisher::new(self.finish)
    }

    pub fn compositor(&self) -> Compositor {
        Compositor::new(self.blend_sigma, self.finisher())
    }

    pub fn morpher(&self) -> Morpher {
        Morpher::new(
            self.displacer(),
            self.warper(),
            self.finisher(),
            self.feather_sigma,
        )
    }
}
