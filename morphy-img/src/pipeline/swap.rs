use super::embedding::Embedding;
use super::{EmbeddingSource, LandmarkSource, SynthesisSource};
use crate::align::{TEMPLATE_SIZE, align_crop, estimate_alignment};
use crate::composite::Compositor;
use crate::displacement::Category;
use crate::error::{MorphError, MorphResult};
use crate::landmarks::LandmarkSet;
use anyhow::Result;
use image::RgbImage;
use image::imageops::{self, FilterType};
use std::sync::Arc;
use tracing::{Level, debug, span, warn};

/// Replaces a face with one synthesized for a fixed reference identity.
pub struct FaceSwapper {
    identity: Arc<Embedding>,
    synthesizer: Box<dyn SynthesisSource>,
    compositor: Compositor,
    category: Category,
}

impl FaceSwapper {
    pub fn new(
        identity: Arc<Embedding>,
        synthesizer: Box<dyn SynthesisSource>,
        compositor: Compositor,
        category: Category,
    ) -> Self {
        Self {
            identity,
            synthesizer,
            compositor,
            category,
        }
    }

    /// Compute the identity from a reference portrait. The face is aligned
    /// when `landmarks` finds one, otherwise the whole image is used.
    pub fn from_reference(
        reference: &RgbImage,
        landmarks: Option<&dyn LandmarkSource>,
        embedder: &dyn EmbeddingSource,
        synthesizer: Box<dyn SynthesisSource>,
        compositor: Compositor,
        category: Category,
    ) -> Result<Self> {
        let span = span!(Level::DEBUG, "reference_identity");
        let _guard = span.enter();

        let crop = reference_crop(reference, landmarks);
        let identity = embedder.embed(&crop)?;

        Ok(Self::new(Arc::new(identity), synthesizer, compositor, category))
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn identity(&self) -> &Arc<Embedding> {
        &self.identity
    }

    pub fn try_swap(&self, frame: &RgbImage, landmarks: &LandmarkSet) -> MorphResult<RgbImage> {
        let span = span!(Level::DEBUG, "swap");
        let _guard = span.enter();

        let (w, h) = frame.dimensions();
        let size = self.synthesizer.crop_size();

        let anchors = landmarks.alignment_anchors(w, h)?;
        let transform = estimate_alignment(&anchors, size)?;
        let crop = align_crop(frame, &transform, size)?;

        let face = self.synthesizer.synthesize(&crop, &self.identity)?;
        if face.dimensions() != (size, size) {
            return Err(MorphError::shape_mismatch(
                "synthesized face",
                [size as usize, size as usize],
                [face.width() as usize, face.height() as usize],
            ));
        }

        self.compositor
            .try_composite(frame, &face, &transform, self.category)
    }
}

fn aligned_reference(
    reference: &RgbImage,
    source: &dyn LandmarkSource,
) -> MorphResult<Option<RgbImage>> {
    let (w, h) = reference.dimensions();
    let faces = source.detect(reference)?;
    let Some(face) = faces.first() else {
        return Ok(None);
    };

    let anchors = face.alignment_anchors(w, h)?;
    let transform = estimate_alignment(&anchors, TEMPLATE_SIZE)?;
    Ok(Some(align_crop(reference, &transform, TEMPLATE_SIZE)?))
}

fn reference_crop(reference: &RgbImage, landmarks: Option<&dyn LandmarkSource>) -> RgbImage {
    let aligned = match landmarks {
        Some(source) => aligned_reference(reference, source),
        None => Ok(None),
    };

    match aligned {
        Ok(Some(crop)) => crop,
        Ok(None) => {
            debug!("No face in reference image, using the whole image");
            imageops::resize(reference, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle)
        }
        Err(e) => {
            warn!("Failed to align reference image, using the whole image: {e}");
            imageops::resize(reference, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle)
        }
    }
}
