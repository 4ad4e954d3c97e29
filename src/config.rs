//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - quarry.toml (default configuration)
//! - Environment variables (QUARRY_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # quarry.toml
//! [optimizer]
//! max_number_of_plans = 64
//! rules = ["-interchange-adjacent-enumerations"]
//!
//! [cost]
//! default_list_length = 100
//! equality_reduction = 100.0
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUARRY_OPTIMIZER__MAX_NUMBER_OF_PLANS=16
//! QUARRY_COST__DEFAULT_LIST_LENGTH=50
//! ```

use crate::cost::CostConstants;
use crate::optimizer::OptimizerOptions;
use figment::{
    providers::{Data, Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Planner configuration: optimizer behavior plus the cost-model tuning
/// knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub optimizer: OptimizerOptions,
    pub cost: CostConstants,
}

impl PlannerConfig {
    /// Load from `quarry.toml` in the working directory plus `QUARRY_*`
    /// environment overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Toml::file("quarry.toml")).extract()
    }

    /// Load from an explicit file plus environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(path.as_ref())).extract()
    }

    fn figment(file: Data<Toml>) -> Figment {
        Figment::new()
            .merge(file)
            .merge(Env::prefixed("QUARRY_").split("__"))
    }

    /// Render the configuration as TOML, e.g. for writing a template file.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
