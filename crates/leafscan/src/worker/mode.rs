use std::fmt;
use std::str::FromStr;

use crate::model::ModelCategory;

/// Which queues a worker drains. Fixed for the lifetime of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    Validation,
    Processing,
    Both,
}

impl RunMode {
    pub fn drains_validation(&self) -> bool {
        matches!(self, RunMode::Validation | RunMode::Both)
    }

    pub fn drains_processing(&self) -> bool {
        matches!(self, RunMode::Processing | RunMode::Both)
    }

    /// Whether models of `category` are needed by a worker in this mode.
    pub fn loads(&self, category: ModelCategory) -> bool {
        match category {
            ModelCategory::Validation => self.drains_validation(),
            ModelCategory::Processing => self.drains_processing(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Validation => "VALIDATION",
            RunMode::Processing => "PROCESSING",
            RunMode::Both => "BOTH",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VALIDATION" => Ok(RunMode::Validation),
            "PROCESSING" => Ok(RunMode::Processing),
            "BOTH" => Ok(RunMode::Both),
            _ => Err(format!(
                "unknown run mode '{}' (expected validation, processing or both)",
                s
            )),
        }
    }
}
