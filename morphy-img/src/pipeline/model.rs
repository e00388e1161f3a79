use crate::error::MorphError;
use anyhow::{Context, Result, anyhow};
use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;
use std::path::Path;
use tracing::debug;

/// Set up the ONNX runtime environment. Call once, before loading models.
pub fn init_runtime() -> Result<()> {
    ort::init()
        .with_execution_providers([execution_providers::XNNPACKExecutionProvider::default()
            .build()
            .error_on_failure()])
        .commit()?;

    Ok(())
}

pub fn initialize_model(model_file_path: &Path, threads: usize) -> Result<Session> {
    if !model_file_path.is_file() {
        return Err(MorphError::ModelUnavailable(model_file_path.display().to_string()).into());
    }

    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_file_path)
        .with_context(|| format!("loading {}", model_file_path.display()))?;

    debug!(
        "Loaded {}: inputs {:?}, outputs {:?}",
        model_file_path.display(),
        model.inputs.iter().map(|i| &i.name).collect::<Vec<_>>(),
        model.outputs.iter().map(|o| &o.name).collect::<Vec<_>>(),
    );

    Ok(model)
}

pub fn input_name(model: &Session, idx: usize) -> Result<String> {
    model
        .inputs
        .get(idx)
        .map(|i| i.name.clone())
        .ok_or_else(|| anyhow!("model has no input {idx}"))
}

pub fn output_name(model: &Session, idx: usize) -> Result<String> {
    model
        .outputs
        .get(idx)
        .map(|o| o.name.clone())
        .ok_or_else(|| anyhow!("model has no output {idx}"))
}
