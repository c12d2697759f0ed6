//! Inputs to a planning run: price, solar and load sequences on the shared
//! slot grid, plus the battery state that anchors the plan.

use crate::domain::battery::{BatteryCapabilities, BatteryState};
use serde::{Deserialize, Serialize};

/// Qualitative confidence band, derived from how many price slots were
/// synthesised rather than sourced (see [`crate::planner::derive_confidence`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    VeryLow,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
        };
        write!(f, "{s}")
    }
}

/// One slot's import/export price. `is_predicted` marks a slot whose price
/// was synthesised (e.g. carried forward) rather than sourced from the tariff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceTrace {
    pub import_pence_per_kwh: f64,
    pub export_pence_per_kwh: f64,
    pub is_predicted: bool,
}

/// One slot's expected PV generation, in kW. Never negative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolarPoint {
    pub kw: f64,
}

/// One slot's expected house load, in kW, with a qualitative confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadPoint {
    pub kw: f64,
    pub confidence: Confidence,
}

/// The full input to one planning run: four equal-length, slot-aligned
/// sequences plus the current battery reading and its fixed capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub t0: chrono::DateTime<chrono::FixedOffset>,
    pub prices: Vec<PriceTrace>,
    pub solar: Vec<SolarPoint>,
    pub load: Vec<LoadPoint>,
    pub battery_state: BatteryState,
    pub capabilities: BatteryCapabilities,
}

impl PlanRequest {
    pub fn n_slots(&self) -> usize {
        self.prices.len()
    }

    pub fn predicted_price_count(&self) -> usize {
        self.prices.iter().filter(|p| p.is_predicted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn caps() -> BatteryCapabilities {
        BatteryCapabilities {
            capacity_kwh: 10.0,
            min_soc_pct: 10.0,
            max_soc_pct: 95.0,
            max_charge_kw: 3.0,
            max_discharge_kw: 3.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            export_limit_kw: 5.0,
        }
    }

    #[test]
    fn predicted_price_count_counts_flagged_slots() {
        let t0 = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .unwrap();
        let req = PlanRequest {
            t0,
            prices: vec![
                PriceTrace { import_pence_per_kwh: 10.0, export_pence_per_kwh: 5.0, is_predicted: false },
                PriceTrace { import_pence_per_kwh: 10.0, export_pence_per_kwh: 5.0, is_predicted: true },
            ],
            solar: vec![SolarPoint { kw: 0.0 }; 2],
            load: vec![LoadPoint { kw: 0.5, confidence: Confidence::High }; 2],
            battery_state: BatteryState { soc_pct: 50.0 },
            capabilities: caps(),
        };
        assert_eq!(req.n_slots(), 2);
        assert_eq!(req.predicted_price_count(), 1);
    }
}
