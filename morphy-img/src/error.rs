use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("need at least {min} control points, found {found}")]
    TooFewPoints { min: usize, found: usize },

    #[error("control point count mismatch: {src} source vs {dst} destination")]
    LengthMismatch { src: usize, dst: usize },

    #[error("control points are collinear")]
    Collinear,

    #[error("control point {0} is not finite")]
    NonFinite(usize),

    #[error("transform fit is singular")]
    Singular,

    #[error("landmark set is missing alignment anchor {0}")]
    MissingAnchors(usize),
}

#[derive(Error, Debug)]
pub enum MorphError {
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("shape mismatch in {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("model file {0} not found")]
    ModelUnavailable(String),

    #[error("unknown category {0:?}, expected feminine or masculine")]
    UnknownCategory(String),

    #[error("model error: {0}")]
    Model(#[from] anyhow::Error),
}

impl MorphError {
    pub fn shape_mismatch(
        what: &'static str,
        expected: impl Into<Vec<usize>>,
        found: impl Into<Vec<usize>>,
    ) -> Self {
        MorphError::ShapeMismatch {
            what,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

pub type MorphResult<T> = std::result::Result<T, MorphError>;
