//! Integration tests encoding the testable scenarios from SPEC_FULL.md §8
//! (S1-S6), exercised against the public planner API rather than internal
//! helpers, using fixed dates for determinism.

use bess_planner::domain::{
    BatteryCapabilities, BatteryState, Confidence, LoadPoint, OperatingMode, PlanRequest, PriceTrace, SolarPoint,
};
use bess_planner::physics::simulate_slot;
use bess_planner::planner::{rule_based::RuleBasedPlanner, Planner};
use bess_planner::types::Price;
use chrono::{FixedOffset, TimeZone};

const SLOTS_PER_HOUR: usize = 2;

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

fn bell_curve_solar(hour: u32, peak_kw: f64, efficiency: f64) -> f64 {
    if !(5..21).contains(&hour) {
        return 0.0;
    }
    let x = (hour as f64 - 13.0) / 8.0;
    (peak_kw * efficiency * (1.0 - x * x).max(0.0)).max(0.0)
}

fn t0() -> chrono::DateTime<FixedOffset> {
    FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

/// `import_at(hour)`/`export_at(hour)` let each scenario define its own
/// overnight/day/peak price bands without a shared enum of bands.
fn make_request(
    soc_start: f64,
    peak_solar_kw: f64,
    solar_efficiency: f64,
    import_at: impl Fn(u32) -> f64,
    export_at: impl Fn(u32) -> f64,
) -> PlanRequest {
    let n = 48usize;
    let mut prices = Vec::with_capacity(n);
    let mut solar = Vec::with_capacity(n);
    let mut load = Vec::with_capacity(n);
    for i in 0..n {
        let hour = (i / SLOTS_PER_HOUR) as u32;
        prices.push(PriceTrace {
            import_pence_per_kwh: import_at(hour),
            export_pence_per_kwh: export_at(hour),
            is_predicted: false,
        });
        solar.push(SolarPoint { kw: bell_curve_solar(hour, peak_solar_kw, solar_efficiency) });
        let load_kw = if (7..9).contains(&hour) { 1.5 } else if (17..21).contains(&hour) { 2.5 } else { 0.3 };
        load.push(LoadPoint { kw: load_kw, confidence: Confidence::High });
    }
    PlanRequest { t0: t0(), prices, solar, load, battery_state: BatteryState { soc_pct: soc_start }, capabilities: caps() }
}

/// Re-simulates a finished plan's chosen modes to recover total clipped
/// solar energy — `PlanSlot` itself doesn't carry `clipped_kwh`.
fn total_clipped_kwh(request: &PlanRequest, plan: &bess_planner::domain::Plan) -> f64 {
    let mut soc = request.battery_state.soc_pct;
    let mut clipped = 0.0;
    for (i, slot) in plan.slots.iter().enumerate() {
        let r = simulate_slot(
            &request.capabilities,
            slot.mode,
            soc,
            request.solar[i].kw,
            request.load[i].kw,
            Price::pence_per_kwh(request.prices[i].import_pence_per_kwh),
            Price::pence_per_kwh(request.prices[i].export_pence_per_kwh),
        );
        soc += r.soc_delta_pct;
        clipped += r.clipped_kwh;
    }
    clipped
}

#[tokio::test]
async fn s1_sunny_summer_feeds_in_for_at_least_six_hours_with_no_clipping_and_low_cost() {
    let request = make_request(
        70.0,
        17.0,
        0.80,
        |h| if !(6..20).contains(&h) { 12.0 } else if (17..21).contains(&h) { 28.0 } else { 18.0 },
        |_h| 15.0,
    );
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();

    assert!(plan.metadata.feed_in_slot_count >= 6 * SLOTS_PER_HOUR, "expected >= 6h of feed-in-priority, got {} slots", plan.metadata.feed_in_slot_count);
    assert!(total_clipped_kwh(&request, &plan) < 1e-6, "expected zero clipped solar");
    assert!(plan.metadata.total_cost_pence <= 250.0, "expected total cost <= 250p, got {}", plan.metadata.total_cost_pence);
}

#[tokio::test]
async fn s2_battery_full_at_dawn_feeds_in_for_at_least_eight_hours_with_no_clipping() {
    let request = make_request(95.0, 17.0, 0.82, |h| if !(6..20).contains(&h) { 12.0 } else { 18.0 }, |_h| 15.0);
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();

    assert!(plan.metadata.feed_in_slot_count >= 8 * SLOTS_PER_HOUR, "expected >= 8h of feed-in-priority, got {} slots", plan.metadata.feed_in_slot_count);
    assert!(total_clipped_kwh(&request, &plan) < 1e-6, "expected zero clipped solar");
}

#[tokio::test]
async fn s3_negative_overnight_price_forces_charge_and_is_profitable() {
    let request = make_request(50.0, 4.0, 0.75, |h| if !(6..20).contains(&h) { -5.0 } else { 18.0 }, |_h| 15.0);
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();

    let charges_during_negative_price =
        plan.slots.iter().any(|s| matches!(s.mode, OperatingMode::ForceCharge { .. }) && s.import_price_pence < 0.0);
    assert!(charges_during_negative_price, "expected a ForceCharge slot during negative-price overnight hours");
    assert!(plan.metadata.total_cost_pence <= -50.0, "expected total cost <= -50p, got {}", plan.metadata.total_cost_pence);
}

#[tokio::test]
async fn s4_zero_solar_charges_overnight_and_discharges_at_peak_never_both() {
    // Export is kept a flat 5p above import in every band, so the same
    // arbitrage margin (rule 3) and profitable-discharge margin (rule 6)
    // condition holds around the clock; which one fires is decided purely
    // by SOC (rule 3 below 92%, rule 6 at/above it), producing a charge
    // overnight followed by oscillation once the battery tops out, which
    // persists into the 35p peak import band.
    let import_at = |h: u32| if !(6..20).contains(&h) { 10.0 } else if (17..21).contains(&h) { 35.0 } else { 20.0 };
    let export_at = |h: u32| import_at(h) + 5.0;
    let request = make_request(50.0, 0.0, 1.0, import_at, export_at);
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();

    let any_overnight_charge = plan.slots.iter().any(|s| matches!(s.mode, OperatingMode::ForceCharge { .. }) && s.import_price_pence <= 10.0);
    let any_peak_discharge = plan.slots.iter().any(|s| matches!(s.mode, OperatingMode::ForceDischarge { .. }) && s.import_price_pence >= 35.0);
    assert!(any_overnight_charge, "expected an overnight ForceCharge slot");
    assert!(any_peak_discharge, "expected a peak ForceDischarge slot");

    for slot in &plan.slots {
        let r = simulate_slot(
            &request.capabilities,
            slot.mode,
            slot.soc_start_pct,
            slot.solar_kw,
            slot.load_kw,
            Price::pence_per_kwh(slot.import_price_pence),
            Price::pence_per_kwh(slot.export_price_pence),
        );
        assert!(
            r.battery_charge_kwh < 1e-9 || r.battery_discharge_kwh < 1e-9,
            "slot at {} both charged ({:.3} kWh) and discharged ({:.3} kWh)",
            slot.time,
            r.battery_charge_kwh,
            r.battery_discharge_kwh
        );
    }
}

#[tokio::test]
async fn s5_low_soc_charges_early_before_floor_and_ends_above_thirty_percent() {
    let request = make_request(
        15.0,
        1.5,
        0.6,
        |h| if !(6..20).contains(&h) { 22.0 } else if (17..21).contains(&h) { 38.0 } else { 28.0 },
        |_h| 10.0,
    );
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();

    let min_soc = request.capabilities.min_soc_pct;
    let floor_breach = plan.slots.iter().position(|s| s.soc_end_pct <= min_soc + 1e-6);
    let first_charge = plan.slots.iter().position(|s| matches!(s.mode, OperatingMode::ForceCharge { .. }));

    assert!(first_charge.is_some(), "expected at least one ForceCharge slot to avert a low-SOC floor");
    if let Some(breach_idx) = floor_breach {
        assert!(first_charge.unwrap() <= breach_idx, "ForceCharge must occur at or before the SOC floor is first reached");
    }

    let final_soc = plan.slots.last().unwrap().soc_end_pct;
    assert!(final_soc > 30.0, "expected final SOC > 30%, got {final_soc}");
}

#[tokio::test]
async fn s6_no_arbitrage_when_spread_is_smaller_than_round_trip_loss() {
    let n = 48;
    let request = PlanRequest {
        t0: t0(),
        prices: vec![PriceTrace { import_pence_per_kwh: 14.8, export_pence_per_kwh: 15.0, is_predicted: false }; n],
        solar: vec![SolarPoint { kw: 0.0 }; n],
        load: vec![LoadPoint { kw: 0.5, confidence: Confidence::High }; n],
        battery_state: BatteryState { soc_pct: 50.0 },
        capabilities: caps(),
    };
    let plan = RuleBasedPlanner.create_plan(&request).await.unwrap();
    assert_eq!(plan.metadata.charge_slot_count, 0, "expected zero arbitrage-driven ForceCharge slots");
}
