//! Common planner contract shared by the rule-based, LP and ML planners.
//! Grounded on `src/optimizer/types.rs`'s `OptimizationStrategy` trait shape
//! and `examples/original_source/apps/solar_optimizer/planners/base_planner.py`'s
//! `validate_inputs`/`get_planner_info`.

#[cfg(feature = "optimization")]
pub mod lp;
pub mod rule_based;

#[cfg(feature = "ml")]
pub mod ml;

use crate::domain::{Confidence, Plan, PlanRequest};
use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_CHARGE_EFFICIENCY: f64 = 0.95;
pub const DEFAULT_DISCHARGE_EFFICIENCY: f64 = 0.95;
pub const DEFAULT_MIN_PROFIT_MARGIN_PENCE: f64 = 2.0;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("solver returned a non-optimal status: {0}")]
    SolverNonOptimal(String),
    #[error("forecast unavailable: {0}")]
    ForecastUnavailable(String),
    #[error("ML model artefact missing: {0}")]
    ModelArtefactMissing(String),
}

/// Static metadata describing a planner, for plan provenance/diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct PlannerInfo {
    pub name: &'static str,
    pub kind: &'static str,
    pub version: &'static str,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, request: &PlanRequest) -> Result<Plan, PlannerError>;
    fn info(&self) -> PlannerInfo;
}

/// Validates the common precondition every planner shares: four equal,
/// non-empty sequences and enough battery data to simulate.
pub fn validate_inputs(request: &PlanRequest) -> Result<(), PlannerError> {
    if request.prices.is_empty() {
        return Err(PlannerError::InvalidInput("prices cannot be empty".into()));
    }
    let n = request.prices.len();
    if request.solar.len() != n {
        return Err(PlannerError::InvalidInput(format!(
            "solar forecast length {} != prices length {n}",
            request.solar.len()
        )));
    }
    if request.load.len() != n {
        return Err(PlannerError::InvalidInput(format!(
            "load forecast length {} != prices length {n}",
            request.load.len()
        )));
    }
    if !request.battery_state.soc_pct.is_finite() {
        return Err(PlannerError::InvalidInput("battery_state.soc_pct is not finite".into()));
    }
    let caps = &request.capabilities;
    if caps.capacity_kwh <= 0.0 {
        return Err(PlannerError::InvalidInput("capabilities.capacity_kwh must be positive".into()));
    }
    if caps.max_charge_kw <= 0.0 {
        return Err(PlannerError::InvalidInput("capabilities.max_charge_kw must be positive".into()));
    }
    if caps.max_discharge_kw <= 0.0 {
        return Err(PlannerError::InvalidInput("capabilities.max_discharge_kw must be positive".into()));
    }
    if !(caps.min_soc_pct < caps.max_soc_pct) {
        return Err(PlannerError::InvalidInput("capabilities.min_soc_pct must be < max_soc_pct".into()));
    }
    Ok(())
}

/// Confidence band from the count of predicted-price slots: `<10 → high`,
/// `<20 → medium`, otherwise `low`.
pub fn derive_confidence(request: &PlanRequest) -> Confidence {
    match request.predicted_price_count() {
        n if n < 10 => Confidence::High,
        n if n < 20 => Confidence::Medium,
        _ => Confidence::Low,
    }
}
