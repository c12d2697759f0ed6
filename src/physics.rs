//! Inverter Physics Model: a pure, stateless simulator of one 30-minute
//! slot's energy flows under one operating mode.
//!
//! Grounded on `examples/original_source/apps/solar_optimizer/planners/inverter_physics.py`.
//! Every mode is derived so the AC-side energy balance
//! (`grid_import + discharge_eff·battery_discharge + solar
//!   = load + battery_charge + grid_export + clipped`) holds by
//! construction, to within floating-point rounding — see DESIGN.md for the
//! efficiency-placement decision this required (battery_charge_kWh is the
//! AC-side energy consumed by the charger; battery_discharge_kWh is the
//! stored/DC-side energy withdrawn, consistent with the balance formula as
//! literally stated: `battery_charge` appears unscaled, `battery_discharge`
//! is scaled by `discharge_efficiency`).

use crate::domain::battery::BatteryCapabilities;
use crate::domain::mode::OperatingMode;
use crate::domain::plan::SlotResult;
use crate::types::{Energy, Price, ENERGY_BALANCE_TOLERANCE_KWH, SLOT_MINUTES};

const DT_HOURS: f64 = SLOT_MINUTES as f64 / 60.0;

/// How far above `export_limit_kW` Feed-in-Priority's export ceiling is
/// raised once the DNO cap is bypassed (spec §3 invariant 3) — the same
/// lift `lp.rs`'s `use_grid_first` binary applies to its `grid_export`
/// constraint, kept numerically in step with that formulation.
const GRID_FIRST_EXPORT_LIFT_KW: f64 = 15.0;

/// Simulate one slot. `soc_start_pct` anchors the headroom/availability
/// bounds; the model never mutates shared state and never fails — out of
/// range inputs saturate at the physical limits.
pub fn simulate_slot(
    caps: &BatteryCapabilities,
    mode: OperatingMode,
    soc_start_pct: f64,
    solar_kw: f64,
    load_kw: f64,
    import_price: Price,
    export_price: Price,
) -> SlotResult {
    let solar_kw = solar_kw.max(0.0);
    let load_kw = load_kw.max(0.0);
    let ceiling = caps.max_soc_relaxed(soc_start_pct);
    let headroom_kwh = caps.headroom_kwh(soc_start_pct, ceiling);
    let available_kwh = caps.available_kwh(soc_start_pct);

    let (charge_kwh, discharge_kwh, grid_import_kwh, grid_export_kwh, clipped_kwh) = match mode {
        OperatingMode::SelfUse => self_use(caps, solar_kw, load_kw, headroom_kwh, available_kwh),
        OperatingMode::FeedInPriority => {
            feed_in_priority(caps, solar_kw, load_kw, headroom_kwh, available_kwh)
        }
        OperatingMode::ForceCharge { rate_kw } => {
            force_charge(caps, rate_kw, solar_kw, load_kw, headroom_kwh)
        }
        OperatingMode::ForceDischarge { rate_kw, target_soc } => {
            let bound_kwh = match target_soc {
                Some(target) => ((soc_start_pct - target) / 100.0 * caps.capacity_kwh).max(0.0),
                None => available_kwh,
            };
            force_discharge(caps, rate_kw, bound_kwh, solar_kw, load_kw)
        }
    };

    let soc_delta_pct =
        (caps.charge_efficiency * charge_kwh - discharge_kwh) / caps.capacity_kwh * 100.0;
    let cost_pence = import_price * Energy::kwh(grid_import_kwh) - export_price * Energy::kwh(grid_export_kwh);

    debug_assert!(
        ((grid_import_kwh + caps.discharge_efficiency * discharge_kwh + solar_kw * DT_HOURS)
            - (load_kw * DT_HOURS + charge_kwh + grid_export_kwh + clipped_kwh))
            .abs()
            < ENERGY_BALANCE_TOLERANCE_KWH * 100.0,
        "AC energy balance violated for mode {mode:?}"
    );

    SlotResult {
        soc_delta_pct,
        grid_import_kwh,
        grid_export_kwh,
        battery_charge_kwh: charge_kwh,
        battery_discharge_kwh: discharge_kwh,
        clipped_kwh,
        cost_pence,
    }
}

type FlowResult = (f64, f64, f64, f64, f64); // charge, discharge, grid_import, grid_export, clipped

fn self_use(
    caps: &BatteryCapabilities,
    solar_kw: f64,
    load_kw: f64,
    headroom_kwh: f64,
    available_kwh: f64,
) -> FlowResult {
    let net_solar_kw = solar_kw - load_kw;
    if net_solar_kw >= 0.0 {
        let surplus_kwh = net_solar_kw * DT_HOURS;
        let charge_kwh = surplus_kwh
            .min(caps.max_charge_kw * DT_HOURS)
            .min(headroom_kwh / caps.charge_efficiency);
        let remaining_kwh = surplus_kwh - charge_kwh;
        let export_kwh = remaining_kwh.min(caps.export_limit_kw * DT_HOURS);
        let clipped_kwh = (remaining_kwh - export_kwh).max(0.0);
        (charge_kwh, 0.0, 0.0, export_kwh, clipped_kwh)
    } else {
        let deficit_kwh = -net_solar_kw * DT_HOURS;
        let discharge_kwh = (deficit_kwh / caps.discharge_efficiency)
            .min(caps.max_discharge_kw * DT_HOURS)
            .min(available_kwh);
        let ac_delivered_kwh = caps.discharge_efficiency * discharge_kwh;
        let grid_import_kwh = (deficit_kwh - ac_delivered_kwh).max(0.0);
        (0.0, discharge_kwh, grid_import_kwh, 0.0, 0.0)
    }
}

fn feed_in_priority(
    caps: &BatteryCapabilities,
    solar_kw: f64,
    load_kw: f64,
    headroom_kwh: f64,
    available_kwh: f64,
) -> FlowResult {
    let solar_kwh = solar_kw * DT_HOURS;
    let load_kwh = load_kw * DT_HOURS;

    // The DNO export cap does not apply in this mode (spec §3 invariant 3):
    // the inverter routes solar to grid first, bounded only by the raised
    // grid-first ceiling the LP planner lifts `export_limit_kW` to
    // (`lp.rs`'s `GRID_FIRST_EXPORT_LIFT_KW`), not by `export_limit_kW` itself.
    let export_kwh = solar_kwh.min((caps.export_limit_kw + GRID_FIRST_EXPORT_LIFT_KW) * DT_HOURS);
    let after_export_kwh = solar_kwh - export_kwh;
    let solar_to_load_kwh = after_export_kwh.min(load_kwh);
    let remaining_load_kwh = load_kwh - solar_to_load_kwh;
    let excess_after_load_kwh = after_export_kwh - solar_to_load_kwh;

    let charge_kwh = excess_after_load_kwh
        .min(caps.max_charge_kw * DT_HOURS)
        .min(headroom_kwh / caps.charge_efficiency);
    let clipped_kwh = (excess_after_load_kwh - charge_kwh).max(0.0);

    let discharge_kwh = (remaining_load_kwh / caps.discharge_efficiency)
        .min(caps.max_discharge_kw * DT_HOURS)
        .min(available_kwh);
    let ac_delivered_kwh = caps.discharge_efficiency * discharge_kwh;
    let grid_import_kwh = (remaining_load_kwh - ac_delivered_kwh).max(0.0);

    (charge_kwh, discharge_kwh, grid_import_kwh, export_kwh, clipped_kwh)
}

fn force_charge(
    caps: &BatteryCapabilities,
    rate_kw: f64,
    solar_kw: f64,
    load_kw: f64,
    headroom_kwh: f64,
) -> FlowResult {
    let rate_kwh = rate_kw.min(caps.max_charge_kw) * DT_HOURS;
    let excess_solar_kwh = (solar_kw - load_kw).max(0.0) * DT_HOURS;
    let requested_kwh = rate_kwh + excess_solar_kwh;
    let charge_kwh = requested_kwh.min(headroom_kwh / caps.charge_efficiency);

    let solar_used_kwh = excess_solar_kwh.min(charge_kwh);
    let clipped_kwh = (excess_solar_kwh - solar_used_kwh).max(0.0);
    let grid_for_charge_kwh = charge_kwh - solar_used_kwh;
    let grid_for_load_kwh = (load_kw - solar_kw).max(0.0) * DT_HOURS;
    let grid_import_kwh = grid_for_load_kwh + grid_for_charge_kwh;

    (charge_kwh, 0.0, grid_import_kwh, 0.0, clipped_kwh)
}

fn force_discharge(
    caps: &BatteryCapabilities,
    rate_kw: f64,
    bound_kwh: f64,
    solar_kw: f64,
    load_kw: f64,
) -> FlowResult {
    let rate_kwh = rate_kw.min(caps.max_discharge_kw) * DT_HOURS;
    let discharge_kwh = (rate_kwh / caps.discharge_efficiency)
        .min(caps.max_discharge_kw * DT_HOURS)
        .min(bound_kwh);
    let ac_delivered_kwh = caps.discharge_efficiency * discharge_kwh;

    let solar_kwh = solar_kw * DT_HOURS;
    let load_kwh = load_kw * DT_HOURS;
    let solar_to_load_kwh = solar_kwh.min(load_kwh);
    let load_after_solar_kwh = load_kwh - solar_to_load_kwh;
    let excess_solar_after_load_kwh = solar_kwh - solar_to_load_kwh;

    let served_by_battery_kwh = ac_delivered_kwh.min(load_after_solar_kwh);
    let battery_remainder_kwh = ac_delivered_kwh - served_by_battery_kwh;
    let unmet_load_kwh = load_after_solar_kwh - served_by_battery_kwh;

    let export_candidate_kwh = battery_remainder_kwh + excess_solar_after_load_kwh;
    let export_kwh = export_candidate_kwh.min(caps.export_limit_kw * DT_HOURS);
    let clipped_kwh = (export_candidate_kwh - export_kwh).max(0.0);

    (0.0, discharge_kwh, unmet_load_kwh, export_kwh, clipped_kwh)
}

/// Human-readable narration of a simulated slot, kept separate from the
/// structured [`SlotResult`] so tests and the planners operate on numbers
/// only (see the design note on splitting numeric accounting from
/// log-message synthesis).
pub fn describe(result: &SlotResult, mode: &OperatingMode) -> String {
    if result.battery_charge_kwh > 1e-6 {
        format!("{}: charging {:.2} kWh", mode, result.battery_charge_kwh)
    } else if result.battery_discharge_kwh > 1e-6 {
        format!("{}: discharging {:.2} kWh", mode, result.battery_discharge_kwh)
    } else if result.grid_export_kwh > 1e-6 {
        format!("{}: exporting {:.2} kWh", mode, result.grid_export_kwh)
    } else {
        format!("{mode}: idle")
    }
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

    fn balance_holds(caps: &BatteryCapabilities, r: &SlotResult, solar_kw: f64, load_kw: f64) {
        let lhs = r.grid_import_kwh + caps.discharge_efficiency * r.battery_discharge_kwh + solar_kw * DT_HOURS;
        let rhs = load_kw * DT_HOURS + r.battery_charge_kwh + r.grid_export_kwh + r.clipped_kwh;
        assert!(
            (lhs - rhs).abs() < 1e-9,
            "balance violated: lhs={lhs} rhs={rhs} result={r:?}"
        );
    }

    #[test]
    fn self_use_surplus_charges_then_exports_then_clips() {
        let c = caps();
        let r = simulate_slot(
            &c,
            OperatingMode::SelfUse,
            50.0,
            10.0,
            1.0,
            Price::pence_per_kwh(15.0),
            Price::pence_per_kwh(5.0),
        );
        balance_holds(&c, &r, 10.0, 1.0);
        assert!(r.battery_charge_kwh > 0.0);
        assert_eq!(r.battery_discharge_kwh, 0.0);
        assert!(r.clipped_kwh > 0.0, "10kW of solar into a 3kW charger and 5kW export must clip");
    }

    #[test]
    fn self_use_deficit_drains_battery_then_grid() {
        let c = caps();
        let r = simulate_slot(
            &c,
            OperatingMode::SelfUse,
            50.0,
            0.0,
            2.0,
            Price::pence_per_kwh(15.0),
            Price::pence_per_kwh(5.0),
        );
        balance_holds(&c, &r, 0.0, 2.0);
        assert!(r.battery_discharge_kwh > 0.0);
        assert_eq!(r.battery_charge_kwh, 0.0);
    }

    #[test]
    fn feed_in_priority_bypasses_the_dno_export_cap_then_charges_the_rest() {
        let c = caps();
        // Solar comfortably exceeds both the DNO cap (5 kW) and the
        // grid-first ceiling (5 + 15 kW), so export should saturate at the
        // raised ceiling rather than the plain `export_limit_kw`, with the
        // remainder routed to charging instead of being clipped.
        let r = simulate_slot(
            &c,
            OperatingMode::FeedInPriority,
            50.0,
            24.0,
            1.0,
            Price::pence_per_kwh(15.0),
            Price::pence_per_kwh(15.0),
        );
        balance_holds(&c, &r, 24.0, 1.0);
        assert!(
            (r.grid_export_kwh - (c.export_limit_kw + GRID_FIRST_EXPORT_LIFT_KW) * DT_HOURS).abs() < 1e-9,
            "expected export to saturate at the raised grid-first ceiling, got {}",
            r.grid_export_kwh
        );
        assert!(
            r.grid_export_kwh > c.export_limit_kw * DT_HOURS,
            "export should exceed the plain DNO cap in this mode"
        );
        assert!(r.battery_charge_kwh > 0.0, "excess solar after the export ceiling should still charge the battery");
    }

    #[test]
    fn force_charge_draws_grid_when_solar_insufficient() {
        let c = caps();
        let r = simulate_slot(
            &c,
            OperatingMode::ForceCharge { rate_kw: 2.0 },
            50.0,
            0.0,
            0.5,
            Price::pence_per_kwh(-5.0),
            Price::pence_per_kwh(5.0),
        );
        balance_holds(&c, &r, 0.0, 0.5);
        assert!(r.battery_charge_kwh > 0.0);
        assert!(r.grid_import_kwh > 0.0);
    }

    #[test]
    fn force_discharge_respects_target_soc_bound() {
        let c = caps();
        let r = simulate_slot(
            &c,
            OperatingMode::ForceDischarge { rate_kw: 3.0, target_soc: Some(48.0) },
            50.0,
            0.0,
            0.0,
            Price::pence_per_kwh(15.0),
            Price::pence_per_kwh(30.0),
        );
        balance_holds(&c, &r, 0.0, 0.0);
        // bounded to (50-48)/100*10 = 0.2 kWh of stored energy.
        assert!(r.battery_discharge_kwh <= 0.2 + 1e-9);
    }

    #[test]
    fn mutual_exclusion_never_charges_and_discharges_at_once() {
        let c = caps();
        for mode in [
            OperatingMode::SelfUse,
            OperatingMode::FeedInPriority,
            OperatingMode::ForceCharge { rate_kw: 1.0 },
            OperatingMode::ForceDischarge { rate_kw: 1.0, target_soc: None },
        ] {
            let r = simulate_slot(&c, mode, 50.0, 2.0, 2.0, Price::pence_per_kwh(10.0), Price::pence_per_kwh(5.0));
            assert!(r.battery_charge_kwh * r.battery_discharge_kwh < 1e-12);
        }
    }

    #[test]
    fn never_exceeds_soc_bounds_from_full_battery() {
        let c = caps();
        let r = simulate_slot(&c, OperatingMode::SelfUse, 95.0, 20.0, 0.5, Price::pence_per_kwh(10.0), Price::pence_per_kwh(5.0));
        balance_holds(&c, &r, 20.0, 0.5);
        let soc_end = 95.0 + r.soc_delta_pct;
        assert!(soc_end <= 95.0 + 1e-6, "soc_end {soc_end} exceeded ceiling");
    }
}
