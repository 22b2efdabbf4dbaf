use std::path::PathBuf;
use thiserror::Error;

/// Failures while rendering shapes or assembling a batch.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("Invalid geometry: {message}")]
    Geometry { message: String },
    #[error("Sample callback failed: {message}")]
    Callback { message: String },
    #[error("Cannot generate an empty batch")]
    EmptyBatch,
}

/// Failures while assembling the network.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Image size {image_size} collapses to nothing after {stages} conv stages")]
    InputTooSmall { image_size: usize, stages: usize },
}

/// Failures while fitting or querying the network.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Batch has {rows} rows, cannot fit with batch size {batch_size}")]
    EmptyTrainingSet { rows: usize, batch_size: usize },
    #[error("Loss diverged at epoch {epoch}: {loss}")]
    NonFiniteLoss { epoch: usize, loss: f32 },
    #[error("Tensor data conversion failed: {message}")]
    Data { message: String },
    #[error("Prediction has {actual} columns, expected {expected}")]
    OutputWidth { expected: usize, actual: usize },
}

/// Everything a controller action can surface to the error panel.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Another run is already in progress")]
    Busy,
    #[error("No trained model; train one first")]
    NotTrained,
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}
