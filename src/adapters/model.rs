use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::table::EngineError;

/// A model-fitting request: response, predictors, intercept handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub response: String,
    pub predictors: Vec<String>,
    pub intercept: bool,
}

/// A fitted model as seen by the disclosure checker.
///
/// Carries only what the dof gate and the export need; fitting itself
/// is the collaborator's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    /// Method name, e.g. `ols`, `logit`.
    pub method: String,
    /// Number of observations used in the fit.
    pub nobs: u64,
    /// Number of fitted parameters, intercept included.
    pub params: u64,
    /// Rendered summary sections, exported verbatim and never redacted.
    pub summary: Vec<String>,
}

impl FittedModel {
    /// Residual degrees of freedom.
    pub fn dof(&self) -> i64 {
        self.nobs as i64 - self.params as i64
    }

    /// Basic sanity check on collaborator output.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.nobs == 0 {
            return Err(EngineError::InvalidModel(
                "model reports zero observations".to_string(),
            ));
        }
        if self.params == 0 {
            return Err(EngineError::InvalidModel(
                "model reports zero parameters".to_string(),
            ));
        }
        Ok(())
    }
}

/// External model-fitting collaborator
pub trait ModelFitter {
    fn fit(&self, data: &Dataset, spec: &ModelSpec) -> Result<FittedModel, EngineError>;
}
