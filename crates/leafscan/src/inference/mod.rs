//! Inference boundary.
//!
//! A [`Network`] turns image bytes into raw output tensors. An
//! [`InferenceWrapper`] owns one network and turns those tensors into an
//! [`Inference`] for its model type. [`ModelRegistry`] maps each
//! [`ModelType`](crate::model::ModelType) to the wrapper that understands it
//! and loads the hot set of models a worker dispatches to.

use serde::Deserialize;
use thiserror::Error;

use crate::error::StorageError;
use crate::model::{Model, ModelId, ModelType};

mod command;
mod registry;
mod wrappers;

pub use command::{CommandLoader, CommandNetwork};
pub use registry::{LoadedModels, ModelRegistry, WrapperConstructor};
pub use wrappers::{
    severity_from_ratio, ClassificationWrapper, CoffeeLeafOccWrapper, SegmentationWrapper,
};

/// Errors raised while running a single network.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to start model runner '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model runner exited with status {status:?}: {stderr}")]
    Runner { status: Option<i32>, stderr: String },

    #[error("Malformed network output: {0}")]
    MalformedOutput(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode mask: {0}")]
    Encode(#[from] image::ImageError),
}

/// Errors raised while loading models or dispatching a job to one.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No wrapper registered for model type {kind} (model {model_id})")]
    UnknownModelType { model_id: ModelId, kind: ModelType },

    #[error("Model {0} is not loaded")]
    ModelNotLoaded(ModelId),

    #[error("Failed to read weights for model {model_id}: {source}")]
    Weights {
        model_id: ModelId,
        #[source]
        source: StorageError,
    },

    #[error("Failed to load model {model_id}: {source}")]
    Load {
        model_id: ModelId,
        #[source]
        source: InferenceError,
    },

    #[error("Inference failed on model {model_id}: {source}")]
    Inference {
        model_id: ModelId,
        #[source]
        source: InferenceError,
    },

    #[error("Model {model_id} produced a {found} result where a {expected} result was needed")]
    UnexpectedOutput {
        model_id: ModelId,
        expected: &'static str,
        found: &'static str,
    },
}

/// A dense `f32` tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, InferenceError> {
        let tensor = Self { shape, data };
        tensor.check()?;
        Ok(tensor)
    }

    /// Verifies that `data` holds exactly as many values as `shape` implies.
    pub fn check(&self) -> Result<(), InferenceError> {
        let expected = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                InferenceError::MalformedOutput(format!(
                    "shape {:?} has too many elements",
                    self.shape
                ))
            })?;
        if expected != self.data.len() {
            return Err(InferenceError::MalformedOutput(format!(
                "shape {:?} needs {} values, got {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Index of the largest value over the whole tensor. The first index
    /// wins ties.
    pub fn argmax(&self) -> Option<usize> {
        self.data
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    }
}

/// A loaded network: image bytes in, raw output heads out.
pub trait Network: Send {
    fn forward(&self, image: &[u8]) -> Result<Vec<Tensor>, InferenceError>;
}

/// Builds a [`Network`] from a model descriptor and its weights.
pub trait NetworkLoader: Send + Sync {
    fn load(&self, model: &Model, weights: &[u8]) -> Result<Box<dyn Network>, InferenceError>;
}

/// Per-job arguments forwarded to the wrapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchArgs {
    pub generate_mask: bool,
}

/// The post-processed result of one inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Classification {
        disease: u32,
        severity: u32,
    },
    Segmentation {
        stress_ratio: f64,
        severity: u8,
        /// PNG-encoded RGB mask, present only when requested.
        mask: Option<Vec<u8>>,
    },
    Validity {
        valid: bool,
    },
}

impl Inference {
    pub fn kind(&self) -> &'static str {
        match self {
            Inference::Classification { .. } => "classification",
            Inference::Segmentation { .. } => "segmentation",
            Inference::Validity { .. } => "validity",
        }
    }
}

/// Post-processing for one model type around a loaded network.
pub trait InferenceWrapper: Send {
    fn infer(&self, image: &[u8], args: &DispatchArgs) -> Result<Inference, InferenceError>;
}
