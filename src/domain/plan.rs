use crate::domain::forecast::Confidence;
use crate::domain::mode::OperatingMode;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Output of the physics model for one slot under one mode. Structured data
/// only — human-readable narration is produced separately by
/// [`crate::physics::describe`] (see design note in SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlotResult {
    pub soc_delta_pct: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
    pub battery_charge_kwh: f64,
    pub battery_discharge_kwh: f64,
    pub clipped_kwh: f64,
    pub cost_pence: f64,
}

/// One slot of a finished plan, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSlot {
    pub time: DateTime<FixedOffset>,
    pub mode: OperatingMode,
    pub action: String,
    pub soc_start_pct: f64,
    pub soc_end_pct: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub import_price_pence: f64,
    pub export_price_pence: f64,
    pub cost_pence: f64,
    pub cumulative_cost_pence: f64,
}

/// Aggregate statistics carried alongside a plan's slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub total_cost_pence: f64,
    pub charge_slot_count: usize,
    pub discharge_slot_count: usize,
    pub feed_in_slot_count: usize,
    pub confidence: Confidence,
    pub solver_status: Option<String>,
    pub planner: &'static str,
}

/// A complete, immutable plan produced by one planner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub timestamp: DateTime<FixedOffset>,
    pub slots: Vec<PlanSlot>,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// The plan slot whose window contains `now`, rounded down to the
    /// nearest half hour; falls back to the earliest future slot if none
    /// matches (mirrors the executor's slot-selection rule in SPEC_FULL.md).
    pub fn slot_at(&self, now: DateTime<FixedOffset>) -> Option<&PlanSlot> {
        let aligned = crate::executor::floor_to_half_hour(now);
        self.slots
            .iter()
            .find(|s| s.time == aligned)
            .or_else(|| self.slots.iter().find(|s| s.time > now))
    }
}
