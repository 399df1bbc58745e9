use std::collections::{BTreeMap, HashMap};

use super::{
    ClassificationWrapper, CoffeeLeafOccWrapper, DispatchArgs, DispatchError, Inference,
    InferenceWrapper, Network, NetworkLoader, SegmentationWrapper,
};
use crate::model::{Model, ModelId, ModelType, ProcessingModelType, ValidationModelType};
use crate::store::Storage;
use crate::worker::RunMode;

/// Builds the wrapper for one model type around a loaded network.
pub type WrapperConstructor = fn(Box<dyn Network>) -> Box<dyn InferenceWrapper>;

/// Maps model types to their wrapper constructors.
pub struct ModelRegistry {
    constructors: HashMap<ModelType, WrapperConstructor>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with a wrapper for every built-in model type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(
            ModelType::Validation(ValidationModelType::CoffeeLeafOcc),
            |network| Box::new(CoffeeLeafOccWrapper::new(network)),
        );
        registry.register(
            ModelType::Processing(ProcessingModelType::Classification),
            |network| Box::new(ClassificationWrapper::new(network)),
        );
        registry.register(
            ModelType::Processing(ProcessingModelType::Segmentation),
            |network| Box::new(SegmentationWrapper::new(network)),
        );
        registry
    }

    pub fn register(&mut self, kind: ModelType, constructor: WrapperConstructor) {
        self.constructors.insert(kind, constructor);
    }

    /// Loads every descriptor whose category the run mode drains.
    ///
    /// Each model's weights are read from `storage` once and handed to
    /// `loader`. Fails on the first descriptor without a registered wrapper
    /// or whose weights or network cannot be loaded.
    pub fn load_models(
        &self,
        descriptors: &BTreeMap<ModelId, Model>,
        storage: &dyn Storage,
        mode: RunMode,
        loader: &dyn NetworkLoader,
    ) -> Result<LoadedModels, DispatchError> {
        let mut wrappers = HashMap::new();

        for model in descriptors.values().filter(|m| mode.loads(m.category())) {
            let constructor =
                self.constructors
                    .get(&model.kind)
                    .ok_or(DispatchError::UnknownModelType {
                        model_id: model.id,
                        kind: model.kind,
                    })?;

            let weights =
                storage
                    .retrieve_weights(model.id)
                    .map_err(|e| DispatchError::Weights {
                        model_id: model.id,
                        source: e,
                    })?;

            let network = loader
                .load(model, &weights)
                .map_err(|e| DispatchError::Load {
                    model_id: model.id,
                    source: e,
                })?;

            log::info!(
                "Loaded model {} ({} {}.{} v{})",
                model.id,
                model.kind,
                model.module,
                model.class_name,
                model.version
            );
            wrappers.insert(model.id, constructor(network));
        }

        Ok(LoadedModels { wrappers })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// The hot set of wrappers a worker dispatches to, keyed by model id.
pub struct LoadedModels {
    wrappers: HashMap<ModelId, Box<dyn InferenceWrapper>>,
}

impl LoadedModels {
    pub fn dispatch(
        &self,
        model_id: ModelId,
        image: &[u8],
        args: &DispatchArgs,
    ) -> Result<Inference, DispatchError> {
        let wrapper = self
            .wrappers
            .get(&model_id)
            .ok_or(DispatchError::ModelNotLoaded(model_id))?;

        wrapper
            .infer(image, args)
            .map_err(|e| DispatchError::Inference {
                model_id,
                source: e,
            })
    }

    pub fn is_loaded(&self, model_id: ModelId) -> bool {
        self.wrappers.contains_key(&model_id)
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}
