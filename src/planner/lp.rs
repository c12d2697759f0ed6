//! MILP formulation of the planning problem over the full `N`-slot horizon.
//!
//! Grounded on `src/optimizer/strategies/milp.rs`'s `good_lp` usage (variable
//! vectors, the `constraint!` macro, `ProblemVariables`, the
//! `.minimise().using(default_solver).with(...)` builder chain) and on the
//! `good_lp` crate's own binary-variable API (`variable().binary()`) for the
//! `is_charging`/`use_grid_first` mutex/mode switches the teacher's MILP
//! never needed (its variables were all continuous).

use crate::domain::{OperatingMode, Plan, PlanMetadata, PlanRequest, PlanSlot};
use crate::physics::{describe, simulate_slot};
use crate::planner::{derive_confidence, validate_inputs, Planner, PlannerError, PlannerInfo};
use crate::types::{slot_time, Price, SlotIndex};
use async_trait::async_trait;
use good_lp::{constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use std::time::Duration;
use tracing::warn;

/// Fixed grid-side caps from SPEC_FULL.md §4.4 — not derived from
/// `BatteryCapabilities`, the MILP formulation hardcodes them as a
/// conservative upper bound on the decision variables themselves (the real
/// limits are `export_limit_kW` and the house's fuse, enforced by the
/// constraints, not the variable bounds).
const GRID_IMPORT_CAP_KW: f64 = 10.0;
const GRID_EXPORT_CAP_KW: f64 = 20.0;
const CLIPPED_CAP_KW: f64 = 20.0;
const GRID_FIRST_EXPORT_LIFT_KW: f64 = 15.0;
const GRID_FIRST_SOLAR_GATE_KW: f64 = 3.0;
const GRID_FIRST_GATE_SLACK: f64 = 0.1;
const CLIPPING_PENALTY_PENCE_PER_KWH: f64 = 50.0;
const TERMINAL_SOC_FLOOR_PCT: f64 = 40.0;
const TERMINAL_SOC_SOFT_TARGET_PCT: f64 = 80.0;
const SOLVER_WALLCLOCK_CAP: Duration = Duration::from_secs(30);
const DECISION_EPSILON_KW: f64 = 0.1;

const DT_HOURS: f64 = crate::types::SLOT_MINUTES as f64 / 60.0;

#[derive(Debug, Default)]
pub struct LpPlanner;

#[async_trait]
impl Planner for LpPlanner {
    async fn create_plan(&self, request: &PlanRequest) -> Result<Plan, PlannerError> {
        validate_inputs(request)?;
        let owned = request.clone();
        let timed_out = "solver exceeded its 30s wallclock cap".to_string();
        let solve_result =
            tokio::time::timeout(SOLVER_WALLCLOCK_CAP, tokio::task::spawn_blocking(move || solve(owned))).await;

        match solve_result {
            Ok(Ok(plan)) => Ok(plan),
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "LP solver task panicked");
                Err(PlannerError::SolverNonOptimal(join_err.to_string()))
            }
            Err(_) => {
                warn!("LP solver exceeded its wallclock cap; reusing a self-use fallback");
                Ok(self_use_fallback(request, &timed_out))
            }
        }
    }

    fn info(&self) -> PlannerInfo {
        PlannerInfo { name: "LpPlanner", kind: "lp", version: "1.0" }
    }
}

/// Runs the solver synchronously; invoked via `spawn_blocking` since `good_lp`
/// has no async interface. Never fails the call: a non-optimal status falls
/// back to an all-`SelfUse` plan with `solver_status` preserved, per the
/// error taxonomy in SPEC_FULL.md §7.
fn solve(request: PlanRequest) -> Plan {
    let request = &request;
    let n = request.n_slots();
    let caps = &request.capabilities;
    let soc0 = request.battery_state.soc_pct;
    let max_soc_relaxed = caps.max_soc_relaxed(soc0);
    let big_m = caps.max_charge_kw.max(caps.max_discharge_kw);
    let avg_import_price = request.prices.iter().map(|p| p.import_pence_per_kwh).sum::<f64>() / n as f64;

    let mut vars = ProblemVariables::new();
    let grid_import = vars.add_vector(variable().min(0.0).max(GRID_IMPORT_CAP_KW), n);
    let grid_export = vars.add_vector(variable().min(0.0).max(GRID_EXPORT_CAP_KW), n);
    let battery_charge = vars.add_vector(variable().min(0.0).max(caps.max_charge_kw), n);
    let battery_discharge = vars.add_vector(variable().min(0.0).max(caps.max_discharge_kw), n);
    let clipped = vars.add_vector(variable().min(0.0).max(CLIPPED_CAP_KW), n);
    let is_charging: Vec<Variable> = (0..n).map(|_| vars.add(variable().binary())).collect();
    let use_grid_first: Vec<Variable> = (0..n).map(|_| vars.add(variable().binary())).collect();
    let soc_shortfall = vars.add(variable().min(0.0));

    let mut soc: Vec<Variable> = Vec::with_capacity(n + 1);
    soc.push(vars.add(variable().min(caps.min_soc_pct).max(max_soc_relaxed)));
    for _ in 1..=n {
        soc.push(vars.add(variable().min(caps.min_soc_pct).max(caps.max_soc_pct)));
    }

    let mut objective = Expression::from(0.0);
    for t in 0..n {
        let price = request.prices[t];
        objective = objective + grid_import[t] * (price.import_pence_per_kwh * DT_HOURS / 100.0);
        objective = objective - grid_export[t] * (price.export_pence_per_kwh * DT_HOURS / 100.0);
        objective = objective + clipped[t] * (CLIPPING_PENALTY_PENCE_PER_KWH * DT_HOURS / 100.0);
    }
    objective = objective + soc_shortfall * (avg_import_price * caps.capacity_kwh / (100.0 * 100.0));

    let mut model = vars.minimise(objective).using(default_solver);

    model = model.with(constraint!(soc[0] == soc0));

    for t in 0..n {
        let solar_kw = request.solar[t].kw;
        let load_kw = request.load[t].kw;

        // SOC balance. Coefficients precomputed so every term is a plain
        // `Variable * f64`, keeping the expression builder to +/- only.
        let soc_coeff = DT_HOURS * 100.0 / caps.capacity_kwh;
        model = model.with(constraint!(
            soc[t + 1]
                == soc[t] + battery_charge[t] * (caps.charge_efficiency * soc_coeff)
                    - battery_discharge[t] * soc_coeff
        ));

        // AC balance: grid_import + discharge*eta_d - charge - grid_export = load - solar + clipped.
        model = model.with(constraint!(
            grid_import[t] + battery_discharge[t] * caps.discharge_efficiency - battery_charge[t] - grid_export[t]
                == load_kw - solar_kw + clipped[t]
        ));

        // Mutual exclusion between charging and discharging:
        // charge <= M*is_charging, discharge <= M*(1-is_charging), rearranged
        // to avoid a scalar-minus-variable expression.
        model = model.with(constraint!(battery_charge[t] <= is_charging[t] * big_m));
        model = model.with(constraint!(battery_discharge[t] + is_charging[t] * big_m <= big_m));

        // Export cap, lifted when grid-first (feed-in-priority) is active.
        model = model.with(constraint!(
            grid_export[t] <= caps.export_limit_kw + use_grid_first[t] * GRID_FIRST_EXPORT_LIFT_KW
        ));

        // Grid-first only makes sense with meaningful solar.
        if solar_kw < GRID_FIRST_SOLAR_GATE_KW {
            model = model.with(constraint!(use_grid_first[t] <= GRID_FIRST_GATE_SLACK));
        }
    }

    // Terminal SOC: hard floor plus a soft-penalised shortfall below 80%,
    // written as `soc_shortfall + soc[n] >= 80` to avoid a scalar-minus-
    // variable expression.
    model = model.with(constraint!(soc[n] >= TERMINAL_SOC_FLOOR_PCT));
    model = model.with(constraint!(soc_shortfall + soc[n] >= TERMINAL_SOC_SOFT_TARGET_PCT));

    let solution = match model.solve() {
        Ok(s) => s,
        Err(e) => {
            let status = classify_solver_error(&e);
            warn!(%status, "LP solver returned a non-optimal status; falling back to self-use");
            return self_use_fallback(request, &status);
        }
    };

    let mut slots = Vec::with_capacity(n);
    let mut soc_tracker = soc0;
    let mut cumulative_cost = 0.0;
    let mut charge_count = 0usize;
    let mut discharge_count = 0usize;
    let mut feed_in_count = 0usize;

    for t in 0..n {
        let price = request.prices[t];
        let solar_kw = request.solar[t].kw;
        let load_kw = request.load[t].kw;

        let grid_first = solution.value(use_grid_first[t]) > 0.5;
        let charge_kw = solution.value(battery_charge[t]);
        let discharge_kw = solution.value(battery_discharge[t]);
        let import_kw = solution.value(grid_import[t]);
        let export_kw = solution.value(grid_export[t]);

        let mode = if grid_first {
            OperatingMode::FeedInPriority
        } else if charge_kw > DECISION_EPSILON_KW && import_kw > DECISION_EPSILON_KW {
            OperatingMode::ForceCharge { rate_kw: charge_kw }
        } else if discharge_kw > DECISION_EPSILON_KW && export_kw > DECISION_EPSILON_KW {
            OperatingMode::ForceDischarge { rate_kw: discharge_kw, target_soc: None }
        } else {
            OperatingMode::SelfUse
        };

        // The LP's own variables pick the *structure* of the slot; the
        // actual flows are re-derived through the physics model so every
        // planner's output satisfies the same invariants by construction
        // (see the design note on the rule-based planner's SOC bypass bug,
        // applied uniformly here — DESIGN.md).
        let result = simulate_slot(
            caps,
            mode,
            soc_tracker,
            solar_kw,
            load_kw,
            Price::pence_per_kwh(price.import_pence_per_kwh),
            Price::pence_per_kwh(price.export_pence_per_kwh),
        );

        let soc_start = soc_tracker;
        soc_tracker += result.soc_delta_pct;
        cumulative_cost += result.cost_pence;

        match mode {
            OperatingMode::ForceCharge { .. } => charge_count += 1,
            OperatingMode::ForceDischarge { .. } => discharge_count += 1,
            OperatingMode::FeedInPriority => feed_in_count += 1,
            OperatingMode::SelfUse => {}
        }

        slots.push(PlanSlot {
            time: slot_time(request.t0, SlotIndex::new(t as u32)),
            mode,
            action: describe(&result, &mode),
            soc_start_pct: soc_start,
            soc_end_pct: soc_tracker,
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
            solver_status: Some("optimal".into()),
            planner: "lp",
        },
    }
}

fn classify_solver_error(e: &ResolutionError) -> String {
    match e {
        ResolutionError::Infeasible => "infeasible".into(),
        ResolutionError::Unbounded => "unbounded".into(),
        other => format!("suboptimal: {other:?}"),
    }
}

/// Conservative all-`SelfUse` plan built for the `Infeasible`/`Unbounded`/
/// `TimeLimit` cases — the solver never fails the call, per the error
/// taxonomy in SPEC_FULL.md §7.
fn self_use_fallback(request: &PlanRequest, status: &str) -> Plan {
    let n = request.n_slots();
    let caps = &request.capabilities;
    let mut soc = request.battery_state.soc_pct;
    let mut cumulative_cost = 0.0;
    let mut slots = Vec::with_capacity(n);

    for i in 0..n {
        let price = request.prices[i];
        let solar_kw = request.solar[i].kw;
        let load_kw = request.load[i].kw;
        let result = simulate_slot(
            caps,
            OperatingMode::SelfUse,
            soc,
            solar_kw,
            load_kw,
            Price::pence_per_kwh(price.import_pence_per_kwh),
            Price::pence_per_kwh(price.export_pence_per_kwh),
        );
        let soc_start = soc;
        soc += result.soc_delta_pct;
        cumulative_cost += result.cost_pence;
        slots.push(PlanSlot {
            time: slot_time(request.t0, SlotIndex::new(i as u32)),
            mode: OperatingMode::SelfUse,
            action: describe(&result, &OperatingMode::SelfUse),
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
            charge_slot_count: 0,
            discharge_slot_count: 0,
            feed_in_slot_count: 0,
            confidence: derive_confidence(request),
            solver_status: Some(status.to_string()),
            planner: "lp",
        },
    }
}
