//! Heuristic planner with a strategic feed-in-priority window, a
//! pre-sunrise discharge window, and a per-slot decision ladder.
//!
//! Grounded on `src/optimizer/greedy.rs`'s threshold-and-reason-string
//! style and on the backwards-simulation/pre-sunrise-discharge procedures
//! in `examples/original_source/apps/solar_optimizer/planners/` (the
//! `rule_based_planner.py`/`inverter_physics.py` variant named authoritative
//! by spec.md's Open Question resolution).

use crate::domain::{OperatingMode, Plan, PlanMetadata, PlanRequest, PlanSlot};
use crate::physics::{describe, simulate_slot};
use crate::planner::{derive_confidence, validate_inputs, Planner, PlannerError, PlannerInfo};
use crate::types::{slot_time, Price, SlotIndex};
use async_trait::async_trait;

const TARGET_END_OF_DAY_SOC: f64 = 15.0;
const ARBITRAGE_MARGIN_PENCE: f64 = 2.0;
const LOW_SOC_THRESHOLD: f64 = 30.0;
const HIGH_SOC_THRESHOLD: f64 = 80.0;
const ARBITRAGE_SOC_CEILING: f64 = 92.0;
const DISCHARGE_SOC_FLOOR: f64 = 40.0;
const DISCHARGE_MARGIN_PENCE: f64 = 2.0;

#[derive(Debug, Default)]
pub struct RuleBasedPlanner;

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn create_plan(&self, request: &PlanRequest) -> Result<Plan, PlannerError> {
        validate_inputs(request)?;
        Ok(build_plan(request))
    }

    fn info(&self) -> PlannerInfo {
        PlannerInfo { name: "RuleBasedPlanner", kind: "rule_based", version: "1.0" }
    }
}

fn build_plan(request: &PlanRequest) -> Plan {
    let n = request.n_slots();
    let caps = &request.capabilities;
    let daylight = daylight_window(request);
    let feed_in = daylight.and_then(|d| select_feed_in_window(request, d));
    let pre_sunrise = daylight.and_then(|d| select_pre_sunrise_window(request, d, feed_in));

    let future_solar_surplus: Vec<f64> = suffix_solar_surplus(request);
    let future_min_price: Vec<f64> = suffix_min_import_price(request);
    let future_deficit: Vec<f64> = suffix_load_deficit(request);

    let mut soc = request.battery_state.soc_pct;
    let mut cumulative_cost = 0.0;
    let mut slots = Vec::with_capacity(n);
    let mut charge_count = 0usize;
    let mut discharge_count = 0usize;
    let mut feed_in_count = 0usize;

    for i in 0..n {
        let price = request.prices[i];
        let solar_kw = request.solar[i].kw;
        let load_kw = request.load[i].kw;

        let mode = choose_mode(
            i,
            soc,
            price.import_pence_per_kwh,
            price.export_pence_per_kwh,
            pre_sunrise,
            feed_in,
            future_solar_surplus[i],
            future_min_price[i],
            future_deficit[i],
        );

        let result = simulate_slot(
            caps,
            mode,
            soc,
            solar_kw,
            load_kw,
            Price::pence_per_kwh(price.import_pence_per_kwh),
            Price::pence_per_kwh(price.export_pence_per_kwh),
        );

        let soc_start = soc;
        soc += result.soc_delta_pct;
        cumulative_cost += result.cost_pence;

        match mode {
            OperatingMode::ForceCharge { .. } => charge_count += 1,
            OperatingMode::ForceDischarge { .. } => discharge_count += 1,
            OperatingMode::FeedInPriority => feed_in_count += 1,
            OperatingMode::SelfUse => {}
        }

        slots.push(PlanSlot {
            time: slot_time(request.t0, SlotIndex::new(i as u32)),
            mode,
            action: describe(&result, &mode),
            soc_start_pct: soc_start,
            soc_end_pct: soc,
            solar_kw,
            load_kw,
            import_price_pence: price.import_pence_per_kwh,
            export_price_pence: price.export_pence_per_kwh,
            cost_pence: result.cost_pence,
            cumulative_cost_pence: cumulative_cost,
        });
    }

    Plan {
        timestamp: request.t0,
        slots,
        metadata: PlanMetadata {
            total_cost_pence: cumulative_cost,
            charge_slot_count: charge_count,
            discharge_slot_count: discharge_count,
            feed_in_slot_count: feed_in_count,
            confidence: derive_confidence(request),
            solver_status: None,
            planner: "rule_based",
        },
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn choose_mode(
    i: usize,
    soc: f64,
    import_price: f64,
    export_price: f64,
    pre_sunrise: Option<(usize, usize, f64)>,
    feed_in: Option<(usize, usize)>,
    future_solar_surplus_kwh: f64,
    future_min_import_price: f64,
    future_deficit_kwh: f64,
) -> OperatingMode {
    // Rule 1: pre-sunrise discharge.
    if let Some((start, end, target_soc)) = pre_sunrise {
        if i >= start && i < end {
            return OperatingMode::ForceDischarge { rate_kw: f64::MAX, target_soc: Some(target_soc) };
        }
    }
    // Rule 2: feed-in window.
    if let Some((start, end)) = feed_in {
        if i >= start && i < end {
            return OperatingMode::FeedInPriority;
        }
    }
    // Rule 3: arbitrage charge.
    if export_price > import_price + ARBITRAGE_MARGIN_PENCE && soc < ARBITRAGE_SOC_CEILING {
        return OperatingMode::ForceCharge { rate_kw: f64::MAX };
    }
    // Rule 4: low-SOC top-up.
    if soc < LOW_SOC_THRESHOLD
        && future_deficit_kwh > 0.5
        && import_price <= future_min_import_price * 1.1
    {
        return OperatingMode::ForceCharge { rate_kw: f64::MAX };
    }
    // Rule 5: wastage avoidance — decline a forced charge even if arbitrage
    // looked attractive, because the battery is nearly full and more solar
    // is still coming.
    if soc > HIGH_SOC_THRESHOLD && future_solar_surplus_kwh > 2.0 {
        return OperatingMode::SelfUse;
    }
    // Rule 6: profitable discharge.
    if export_price > import_price + DISCHARGE_MARGIN_PENCE && soc > DISCHARGE_SOC_FLOOR {
        return OperatingMode::ForceDischarge { rate_kw: f64::MAX, target_soc: None };
    }
    // Rule 7: default.
    OperatingMode::SelfUse
}

pub(crate) fn daylight_window(request: &PlanRequest) -> Option<(usize, usize)> {
    let first = request.solar.iter().position(|s| s.kw > 0.5)?;
    let last = request.solar.iter().rposition(|s| s.kw > 0.5)?;
    Some((first, last + 1))
}

/// Chooses the feed-in-priority window per §4.3.1: the latest possible
/// transition to Self-Use that still minimises clipped solar energy over
/// the daylight window.
fn select_feed_in_window(request: &PlanRequest, daylight: (usize, usize)) -> Option<(usize, usize)> {
    let (start, end) = daylight;
    let caps = &request.capabilities;
    let soc0 = request.battery_state.soc_pct;

    let net_solar_surplus_kwh: f64 = (start..end)
        .map(|i| (request.solar[i].kw - request.load[i].kw).max(0.0) * (crate::types::SLOT_MINUTES as f64 / 60.0))
        .sum();
    let peak_solar_kw = (start..end).map(|i| request.solar[i].kw).fold(0.0, f64::max);
    let battery_headroom_kwh = caps.headroom_kwh(soc0, caps.max_soc_relaxed(soc0));

    if net_solar_surplus_kwh <= battery_headroom_kwh + 2.0 && peak_solar_kw <= caps.export_limit_kw {
        return None;
    }

    let total_clipped = |transition: usize| -> f64 {
        let mut soc = soc0;
        let mut clipped_sum = 0.0;
        for i in start..end {
            let mode = if i < transition { OperatingMode::FeedInPriority } else { OperatingMode::SelfUse };
            let r = simulate_slot(
                caps,
                mode,
                soc,
                request.solar[i].kw,
                request.load[i].kw,
                Price::pence_per_kwh(request.prices[i].import_pence_per_kwh),
                Price::pence_per_kwh(request.prices[i].export_pence_per_kwh),
            );
            soc += r.soc_delta_pct;
            clipped_sum += r.clipped_kwh;
        }
        clipped_sum
    };

    let baseline_clipped = total_clipped(start); // transition == start: pure Self-Use.
    if baseline_clipped <= 1e-9 {
        return None; // Self-Use alone never overflows; no benefit to feed-in.
    }

    let mut best_transition = start;
    let mut best_clipped = baseline_clipped;
    for transition in (start..=end).rev() {
        let clipped = total_clipped(transition);
        if clipped < best_clipped - 1e-9 {
            best_clipped = clipped;
            best_transition = transition;
        } else if (clipped - best_clipped).abs() <= 1e-9 && transition > best_transition {
            best_transition = transition;
        }
    }

    if best_transition <= start {
        None
    } else {
        Some((start, best_transition))
    }
}

/// Chooses a pre-sunrise discharge window per §4.3.2, making room in the
/// battery before the daylight window starts. Returns `(start, end,
/// target_soc)`.
pub(crate) fn select_pre_sunrise_window(
    request: &PlanRequest,
    daylight: (usize, usize),
    feed_in: Option<(usize, usize)>,
) -> Option<(usize, usize, f64)> {
    let caps = &request.capabilities;
    let dt_h = crate::types::SLOT_MINUTES as f64 / 60.0;
    let (sunrise, _) = daylight;
    let (surplus_start, surplus_end) = feed_in.unwrap_or_else(|| daylight_or_default(request, daylight));

    let net_solar_kwh: f64 = (surplus_start..surplus_end)
        .map(|i| (request.solar[i].kw - request.load[i].kw).max(0.0) * dt_h)
        .sum();

    let natural_drain_kwh: f64 = (0..sunrise)
        .map(|i| (request.load[i].kw - request.solar[i].kw).max(0.0) * dt_h)
        .sum();

    let soc0 = request.battery_state.soc_pct;
    let soc_at_sunrise = soc0 - natural_drain_kwh / caps.capacity_kwh * 100.0;
    let headroom_at_sunrise_kwh = caps.headroom_kwh(soc_at_sunrise, caps.max_soc_relaxed(soc_at_sunrise));

    let space_shortfall_kwh = net_solar_kwh - headroom_at_sunrise_kwh;
    if space_shortfall_kwh <= 1.0 {
        return None;
    }

    let extra_headroom_needed_kwh = space_shortfall_kwh + 2.0;
    let required_target = soc_at_sunrise - extra_headroom_needed_kwh / caps.capacity_kwh * 100.0;
    let target_soc = required_target.max(TARGET_END_OF_DAY_SOC);

    let energy_to_shed_kwh = ((soc0 - target_soc) / 100.0 * caps.capacity_kwh).max(0.0);
    if energy_to_shed_kwh <= 0.0 {
        return None;
    }
    let slots_needed = (energy_to_shed_kwh / (caps.max_discharge_kw * dt_h)).ceil() as usize;
    let slots_needed = slots_needed.max(1).min(sunrise);
    let start = sunrise.saturating_sub(slots_needed);

    Some((start, sunrise, target_soc))
}

fn daylight_or_default(request: &PlanRequest, daylight: (usize, usize)) -> (usize, usize) {
    // Fallback 06:00-18:00 window when no feed-in window was chosen,
    // clamped to the request's slot count.
    let n = request.n_slots();
    let start = (0..n)
        .find(|&i| slot_time(request.t0, SlotIndex::new(i as u32)).format("%H").to_string().parse::<u32>().unwrap_or(0) >= 6)
        .unwrap_or(daylight.0);
    let end = (0..n)
        .find(|&i| slot_time(request.t0, SlotIndex::new(i as u32)).format("%H").to_string().parse::<u32>().unwrap_or(0) >= 18)
        .unwrap_or(daylight.1);
    (start.min(daylight.0), end.max(daylight.1).min(n))
}

pub(crate) fn suffix_solar_surplus(request: &PlanRequest) -> Vec<f64> {
    let dt_h = crate::types::SLOT_MINUTES as f64 / 60.0;
    let n = request.n_slots();
    let mut out = vec![0.0; n];
    let mut acc = 0.0;
    for i in (0..n).rev() {
        acc += (request.solar[i].kw - request.load[i].kw).max(0.0) * dt_h;
        out[i] = acc;
    }
    out
}

pub(crate) fn suffix_load_deficit(request: &PlanRequest) -> Vec<f64> {
    let dt_h = crate::types::SLOT_MINUTES as f64 / 60.0;
    let n = request.n_slots();
    let mut out = vec![0.0; n];
    let mut acc = 0.0;
    for i in (0..n).rev() {
        acc += (request.load[i].kw - request.solar[i].kw).max(0.0) * dt_h;
        out[i] = acc;
    }
    out
}

pub(crate) fn suffix_min_import_price(request: &PlanRequest) -> Vec<f64> {
    let n = request.n_slots();
    let mut out = vec![0.0; n];
    let mut min_so_far = f64::MAX;
    for i in (0..n).rev() {
        min_so_far = min_so_far.min(request.prices[i].import_pence_per_kwh);
        out[i] = min_so_far;
    }
    out
}
