//! Battery state and capability value types.
//!
//! Unlike the teacher's `Battery` trait (an I/O port talking to a live
//! device), these are plain data: the physics model and planners never
//! touch a device, they only read these numbers.

use serde::{Deserialize, Serialize};

/// Fixed physical parameters of the battery over the whole plan horizon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryCapabilities {
    pub capacity_kwh: f64,
    pub min_soc_pct: f64,
    pub max_soc_pct: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub export_limit_kw: f64,
}

impl BatteryCapabilities {
    /// `max_soc`, relaxed upward to accommodate a `soc_start` already above it.
    /// Mirrors the data-model rule `max_soc_relaxed = max(max_soc, soc_start)`.
    pub fn max_soc_relaxed(&self, soc_start_pct: f64) -> f64 {
        self.max_soc_pct.max(soc_start_pct)
    }

    pub fn round_trip_efficiency(&self) -> f64 {
        self.charge_efficiency * self.discharge_efficiency
    }

    /// kWh of headroom remaining before `soc_pct` reaches the relaxed ceiling.
    pub fn headroom_kwh(&self, soc_pct: f64, ceiling_pct: f64) -> f64 {
        ((ceiling_pct - soc_pct) / 100.0 * self.capacity_kwh).max(0.0)
    }

    /// kWh available for discharge before `soc_pct` reaches `min_soc`.
    pub fn available_kwh(&self, soc_pct: f64) -> f64 {
        ((soc_pct - self.min_soc_pct) / 100.0 * self.capacity_kwh).max(0.0)
    }
}

/// Battery's live reading at the start of the plan horizon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryState {
    pub soc_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn max_soc_relaxed_only_raises() {
        let c = caps();
        assert_eq!(c.max_soc_relaxed(50.0), 95.0);
        assert_eq!(c.max_soc_relaxed(98.0), 98.0);
    }

    #[test]
    fn headroom_and_available_are_nonnegative() {
        let c = caps();
        assert_eq!(c.headroom_kwh(95.0, 95.0), 0.0);
        assert_eq!(c.available_kwh(10.0), 0.0);
        assert!((c.headroom_kwh(50.0, 95.0) - 4.5).abs() < 1e-9);
        assert!((c.available_kwh(50.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn round_trip_efficiency_multiplies() {
        let c = caps();
        assert!((c.round_trip_efficiency() - 0.9025).abs() < 1e-9);
    }
}
