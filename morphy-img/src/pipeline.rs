use crate::align::{align_crop, estimate_alignment};
use crate::config::MorphConfig;
use crate::displacement::Category;
use crate::error::MorphResult;
use crate::landmarks::LandmarkSet;
use crate::morph::Morpher;
use anyhow::Result;
use detection::FaceDetector;
use embedding::ArcFaceEmbedder;
use gender::GenderAgeClassifier;
use image::RgbImage;
use landmarks::FaceMeshLandmarker;
use std::path::Path;
use synthesis::InSwapper;
use tracing::{Level, debug, info, span, trace, warn};

pub mod detection;
pub mod embedding;
pub mod gender;
pub mod landmarks;
pub mod model;
pub mod swap;
pub mod synthesis;

pub use embedding::Embedding;
pub use gender::GenderEstimate;
pub use swap::FaceSwapper;

/// Finds faces and their face mesh landmarks in a frame.
pub trait LandmarkSource: Send + Sync {
    fn detect(&self, img: &RgbImage) -> Result<Vec<LandmarkSet>>;
}

/// Computes an identity embedding from an aligned face crop.
pub trait EmbeddingSource: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Embedding>;
}

/// Generates a face for `identity` in place of the face in `crop`.
pub trait SynthesisSource: Send + Sync {
    /// Side of the square crops the model takes and returns.
    fn crop_size(&self) -> u32;

    fn synthesize(&self, crop: &RgbImage, identity: &Embedding) -> Result<RgbImage>;
}

/// Estimates which category an aligned face crop currently reads as.
pub trait GenderSource: Send + Sync {
    fn crop_size(&self) -> u32;

    fn classify(&self, face: &RgbImage) -> Result<GenderEstimate>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub category: Category,
    pub intensity: f32,
    pub use_synthesis: bool,
    /// Target the opposite of each face's detected category, falling back to
    /// `category` when no estimate is available
    pub auto_category: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            category: Category::Feminine,
            intensity: 0.5,
            use_synthesis: false,
            auto_category: false,
        }
    }
}

/// A processed frame and the categories detected on its faces, in face order.
#[derive(Debug, Clone)]
pub struct Processed {
    pub image: RgbImage,
    pub genders: Vec<Option<GenderEstimate>>,
}

/// Everything needed to process frames. Models are loaded once and only
/// read afterwards, so one pipeline can serve any number of frames.
pub struct Pipeline {
    landmarks: Option<Box<dyn LandmarkSource>>,
    swapper: Option<FaceSwapper>,
    gender: Option<Box<dyn GenderSource>>,
    morpher: Morpher,
}

impl Pipeline {
    pub fn new(config: &MorphConfig) -> Pipeline {
        Pipeline {
            landmarks: None,
            swapper: None,
            gender: None,
            morpher: config.morpher(),
        }
    }

    pub fn with_landmarks(mut self, source: Box<dyn LandmarkSource>) -> Pipeline {
        self.landmarks = Some(source);
        self
    }

    pub fn with_swapper(mut self, swapper: FaceSwapper) -> Pipeline {
        self.swapper = Some(swapper);
        self
    }

    pub fn with_gender(mut self, source: Box<dyn GenderSource>) -> Pipeline {
        self.gender = Some(source);
        self
    }

    /// Load models from `models_dir`. A model that is missing or fails to
    /// load only disables the feature that needs it.
    pub fn load(
        models_dir: &Path,
        reference: Option<&Path>,
        threads: usize,
        config: &MorphConfig,
    ) -> Pipeline {
        let span = span!(Level::INFO, "pipeline_load");
        let _guard = span.enter();

        if let Err(e) = model::init_runtime() {
            warn!("Failed to initialize runtime: {e:?}");
        }

        let mut pipeline = Pipeline::new(config);

        match load_landmarker(models_dir, threads) {
            Ok(landmarker) => pipeline.landmarks = Some(Box::new(landmarker)),
            Err(e) => warn!("Face landmarks unavailable, frames will pass through: {e:?}"),
        }

        match GenderAgeClassifier::new(
            &models_dir.join(gender::MODEL_FILE),
            config.channel_order,
            threads,
        ) {
            Ok(classifier) => pipeline.gender = Some(Box::new(classifier)),
            Err(e) => warn!("Gender classification unavailable: {e:?}"),
        }

        let Some(reference) = reference else {
            info!("No reference image, face swap disabled");
            return pipeline;
        };

        match load_swapper(models_dir, reference, threads, config, pipeline.landmarks.as_deref()) {
            Ok(swapper) => {
                info!("Face swap ready for {}", swapper.category());
                pipeline.swapper = Some(swapper);
            }
            Err(e) => warn!("Face swap unavailable, morphing only: {e:?}"),
        }

        pipeline
    }

    pub fn has_landmarks(&self) -> bool {
        self.landmarks.is_some()
    }

    pub fn has_swapper(&self) -> bool {
        self.swapper.is_some()
    }

    pub fn has_gender(&self) -> bool {
        self.gender.is_some()
    }

    /// Estimate the category of one face. `None` without a classifier.
    pub fn classify(
        &self,
        frame: &RgbImage,
        landmarks: &LandmarkSet,
    ) -> MorphResult<Option<GenderEstimate>> {
        let Some(source) = &self.gender else {
            return Ok(None);
        };

        let (w, h) = frame.dimensions();
        let size = source.crop_size();
        let anchors = landmarks.alignment_anchors(w, h)?;
        let crop = align_crop(frame, &estimate_alignment(&anchors, size)?, size)?;

        Ok(Some(source.classify(&crop)?))
    }

    /// Transform one face. Swaps when asked to and a swapper for the
    /// requested category is loaded, falling back to the morph if the swap
    /// fails.
    pub fn process_face(
        &self,
        frame: &RgbImage,
        landmarks: &LandmarkSet,
        request: &Request,
    ) -> MorphResult<RgbImage> {
        if request.use_synthesis {
            match &self.swapper {
                Some(swapper) if swapper.category() == request.category => {
                    match swapper.try_swap(frame, landmarks) {
                        Ok(img) => return Ok(img),
                        Err(e) => warn!("Swap failed, morphing instead: {e}"),
                    }
                }
                Some(swapper) => debug!(
                    "Swapper produces {} faces, morphing to {}",
                    swapper.category(),
                    request.category
                ),
                None => trace!("No swapper loaded, morphing"),
            }
        }

        self.morpher
            .try_morph(frame, landmarks, request.category, request.intensity)
    }

    /// Transform every face found in `frame`. Faces that fail are left as
    /// they were.
    pub fn process(&self, frame: &RgbImage, request: &Request) -> RgbImage {
        self.process_frame(frame, request).image
    }

    /// Like `process`, also reporting the category detected on each face.
    pub fn process_frame(&self, frame: &RgbImage, request: &Request) -> Processed {
        let span = span!(Level::DEBUG, "pipeline");
        let _guard = span.enter();

        let unchanged = || Processed {
            image: frame.clone(),
            genders: Vec::new(),
        };
        let Some(source) = &self.landmarks else {
            return unchanged();
        };

        let faces = match source.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("Landmark detection failed: {e:?}");
                return unchanged();
            }
        };
        trace!("Processing {} faces", faces.len());

        let mut out = frame.clone();
        let mut genders = Vec::with_capacity(faces.len());
        for (i, face) in faces.iter().enumerate() {
            let gender = match self.classify(frame, face) {
                Ok(gender) => gender,
                Err(e) => {
                    warn!("Failed to classify face {i}: {e}");
                    None
                }
            };

            let category = match gender {
                Some(estimate) if request.auto_category => estimate.category.opposite(),
                _ => request.category,
            };
            let face_request = Request {
                category,
                ..*request
            };

            match self.process_face(&out, face, &face_request) {
                Ok(img) => out = img,
                Err(e) => warn!("Skipping face {i}: {e}"),
            }
            genders.push(gender);
        }

        Processed {
            image: out,
            genders,
        }
    }
}

fn load_landmarker(models_dir: &Path, threads: usize) -> Result<FaceMeshLandmarker> {
    let detector = FaceDetector::new(&models_dir.join(detection::MODEL_FILE), threads)?;
    FaceMeshLandmarker::new(detector, &models_dir.join(landmarks::MODEL_FILE), threads)
}

fn load_swapper(
    models_dir: &Path,
    reference: &Path,
    threads: usize,
    config: &MorphConfig,
    landmarks: Option<&dyn LandmarkSource>,
) -> Result<FaceSwapper> {
    let embedder = ArcFaceEmbedder::new(
        &models_dir.join(embedding::MODEL_FILE),
        config.channel_order,
        threads,
    )?;
    let synthesizer = InSwapper::new(
        &models_dir.join(synthesis::MODEL_FILE),
        config.channel_order,
        config.crop_size,
        threads,
    )?;
    let reference_img = image::open(reference)?.to_rgb8();

    FaceSwapper::from_reference(
        &reference_img,
        landmarks,
        &embedder,
        Box::new(synthesizer),
        config.compositor(),
        config.swap_category,
    )
}
