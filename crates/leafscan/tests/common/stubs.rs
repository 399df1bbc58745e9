//! Deterministic networks for driving workers without a runner program.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use leafscan::inference::{InferenceError, Network, NetworkLoader, Tensor};
use leafscan::model::{Model, ModelId, ModelType, ProcessingModelType};

/// Stress ratio produced by every stub segmentation: one stressed pixel out
/// of four leaf pixels.
pub const STUB_STRESS_RATIO: f64 = 0.25;

/// Builds an image the stub networks understand.
///
/// Byte 0 decides validity (0 is a leaf), bytes 1 and 2 are the disease and
/// severity classes and the trailing bytes carry `seq`.
pub fn stub_image(leaf: bool, disease: u8, severity: u8, seq: u32) -> Vec<u8> {
    let mut image = vec![u8::from(!leaf), disease % 4, severity % 5];
    image.extend_from_slice(&seq.to_le_bytes());
    image
}

/// Reads back the `seq` written by [`stub_image`].
pub fn stub_seq(image: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = image.get(3..7)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Loads stub networks and records every image they are asked to run.
#[derive(Clone, Default)]
pub struct StubLoader {
    seen: Arc<Mutex<Vec<(ModelId, Vec<u8>)>>>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every forward call so far, in call order.
    pub fn seen(&self) -> Vec<(ModelId, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl NetworkLoader for StubLoader {
    fn load(&self, model: &Model, _weights: &[u8]) -> Result<Box<dyn Network>, InferenceError> {
        Ok(Box::new(StubNetwork {
            model_id: model.id,
            kind: model.kind,
            seen: Arc::clone(&self.seen),
        }))
    }
}

struct StubNetwork {
    model_id: ModelId,
    kind: ModelType,
    seen: Arc<Mutex<Vec<(ModelId, Vec<u8>)>>>,
}

fn one_hot(len: usize, hot: usize) -> Result<Tensor, InferenceError> {
    let data = (0..len).map(|i| if i == hot { 1.0 } else { 0.0 }).collect();
    Tensor::new(vec![1, len], data)
}

impl Network for StubNetwork {
    fn forward(&self, image: &[u8]) -> Result<Vec<Tensor>, InferenceError> {
        self.seen
            .lock()
            .unwrap()
            .push((self.model_id, image.to_vec()));

        let byte = |i: usize| usize::from(image.get(i).copied().unwrap_or(0));
        match self.kind {
            ModelType::Validation(_) => Ok(vec![one_hot(2, byte(0).min(1))?]),
            ModelType::Processing(ProcessingModelType::Classification) => {
                Ok(vec![one_hot(4, byte(1) % 4)?, one_hot(5, byte(2) % 5)?])
            }
            ModelType::Processing(ProcessingModelType::Segmentation) => {
                // 2x2 map, channel-major (background, leaf, stress). Pixel 0
                // is stressed, the others are healthy leaf.
                let data = vec![
                    0.0, 0.0, 0.0, 0.0, //
                    0.0, 1.0, 1.0, 1.0, //
                    1.0, 0.0, 0.0, 0.0,
                ];
                Ok(vec![Tensor::new(vec![1, 3, 2, 2], data)?])
            }
        }
    }
}
