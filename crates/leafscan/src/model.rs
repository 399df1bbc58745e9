//! Model descriptors and the closed set of model categories and types.
//!
//! A model's type is scoped to its category: validation models have a
//! [`ValidationModelType`], processing models a [`ProcessingModelType`].
//! [`ModelType`] carries both levels so a descriptor can never hold a type
//! from the wrong category.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub type ModelId = i64;
pub type ImageId = i64;
pub type ReportId = i64;
pub type UserId = i64;

/// Errors from parsing or cross-validating model categories and types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown model category: {0}")]
    UnknownCategory(String),

    #[error("Model type '{type_name}' does not belong to category {category}")]
    CategoryMismatch {
        category: ModelCategory,
        type_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelCategory {
    Validation,
    Processing,
}

impl ModelCategory {
    pub const ALL: [ModelCategory; 2] = [ModelCategory::Validation, ModelCategory::Processing];

    /// Name as stored in the `model_category` lookup table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelCategory::Validation => "VALIDATION",
            ModelCategory::Processing => "PROCESSING",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VALIDATION" => Ok(ModelCategory::Validation),
            "PROCESSING" => Ok(ModelCategory::Processing),
            _ => Err(ModelError::UnknownCategory(s.to_string())),
        }
    }
}

/// Processing model types. Also identifies the report variant a job writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessingModelType {
    Classification,
    Segmentation,
}

impl ProcessingModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingModelType::Classification => "CLASSIFICATION",
            ProcessingModelType::Segmentation => "SEGMENTATION",
        }
    }
}

impl fmt::Display for ProcessingModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLASSIFICATION" => Ok(ProcessingModelType::Classification),
            "SEGMENTATION" => Ok(ProcessingModelType::Segmentation),
            _ => Err(ModelError::CategoryMismatch {
                category: ModelCategory::Processing,
                type_name: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationModelType {
    CoffeeLeafOcc,
}

impl ValidationModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationModelType::CoffeeLeafOcc => "COFFEE_LEAF_OCC",
        }
    }
}

impl fmt::Display for ValidationModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COFFEE_LEAF_OCC" => Ok(ValidationModelType::CoffeeLeafOcc),
            _ => Err(ModelError::CategoryMismatch {
                category: ModelCategory::Validation,
                type_name: s.to_string(),
            }),
        }
    }
}

/// A model type tagged with its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelType {
    Validation(ValidationModelType),
    Processing(ProcessingModelType),
}

impl ModelType {
    /// Every model type known to this build.
    pub const ALL: [ModelType; 3] = [
        ModelType::Validation(ValidationModelType::CoffeeLeafOcc),
        ModelType::Processing(ProcessingModelType::Classification),
        ModelType::Processing(ProcessingModelType::Segmentation),
    ];

    pub fn category(&self) -> ModelCategory {
        match self {
            ModelType::Validation(_) => ModelCategory::Validation,
            ModelType::Processing(_) => ModelCategory::Processing,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelType::Validation(t) => t.as_str(),
            ModelType::Processing(t) => t.as_str(),
        }
    }

    /// Resolves a type name within a category, rejecting names that belong
    /// to a different category.
    pub fn from_parts(category: ModelCategory, type_name: &str) -> Result<Self, ModelError> {
        match category {
            ModelCategory::Validation => type_name.parse().map(ModelType::Validation),
            ModelCategory::Processing => type_name.parse().map(ModelType::Processing),
        }
    }

    pub fn as_processing(&self) -> Option<ProcessingModelType> {
        match self {
            ModelType::Processing(t) => Some(*t),
            ModelType::Validation(_) => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category(), self.name())
    }
}

/// A registered model as loaded from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: ModelId,
    pub kind: ModelType,
    /// Architecture family, e.g. `resnet`.
    pub subtype: String,
    pub module: String,
    pub class_name: String,
    pub version: String,
    pub enabled: bool,
}

impl Model {
    pub fn category(&self) -> ModelCategory {
        self.kind.category()
    }
}

/// Fields needed to register a new model.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub kind: ModelType,
    pub subtype: String,
    pub module: String,
    pub class_name: String,
    pub version: String,
    pub enabled: bool,
}
