use tracing::{info, warn};

use crate::adapters::FittedModel;
use crate::config::Policy;
use crate::models::{ModelCheckResult, Status};
use crate::table::EngineError;

/// Residual degrees-of-freedom gate for fitted models.
///
/// Purely a gate: the model summary is exported in full whatever the
/// verdict; a failing check only blocks export pending an exception.
pub fn check_model(model: &FittedModel, policy: &Policy) -> Result<ModelCheckResult, EngineError> {
    model.validate()?;

    let dof = model.dof();
    let threshold = policy.safe_dof_threshold;
    let status = if dof < threshold as i64 {
        Status::Fail
    } else {
        Status::Pass
    };

    let result = ModelCheckResult {
        status,
        dof,
        threshold,
    };

    match status {
        Status::Pass => info!(method = %model.method, dof, "model dof check passed"),
        _ => warn!(method = %model.method, dof, threshold, "unsafe model: dof below threshold"),
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(nobs: u64, params: u64) -> FittedModel {
        FittedModel {
            method: "ols".to_string(),
            nobs,
            params,
            summary: vec!["coef table".to_string()],
        }
    }

    #[test]
    fn test_dof_pass() {
        // 811 observations, 3 predictors + intercept
        let policy = Policy::default();
        let result = check_model(&model(811, 4), &policy).unwrap();
        assert_eq!(result.dof, 807);
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.describe(), "pass; dof=807 >= 10");
    }

    #[test]
    fn test_dof_fail() {
        let policy = Policy::default();
        let result = check_model(&model(12, 4), &policy).unwrap();
        assert_eq!(result.dof, 8);
        assert_eq!(result.status, Status::Fail);
    }

    #[test]
    fn test_boundary() {
        let policy = Policy::default();
        // dof exactly at the threshold passes
        let result = check_model(&model(14, 4), &policy).unwrap();
        assert_eq!(result.dof, 10);
        assert_eq!(result.status, Status::Pass);
    }

    #[test]
    fn test_invalid_model_rejected() {
        let policy = Policy::default();
        assert!(check_model(&model(0, 4), &policy).is_err());
    }
}
