pub mod align;
pub mod composite;
pub mod config;
pub mod displacement;
pub mod error;
pub mod finish;
pub mod landmarks;
pub mod morph;
pub mod pipeline;
pub mod shapes;
pub mod tensor;
pub mod warp;

pub use config::MorphConfig;
pub use displacement::Category;
pub use error::{GeometryError, MorphError, MorphResult};
pub use landmarks::LandmarkSet;
pub use pipeline::{Pipeline, Request};
