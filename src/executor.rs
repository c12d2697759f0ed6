//! Plan Executor: reconciles live inverter state against the current plan's
//! slot. Pure-reconciling — it never recomputes a plan, only emits the
//! minimal diff of writes needed to converge.
//!
//! Grounded on the write-ordering discipline in
//! `src/controller/mod.rs`/`src/domain/inverter.rs` (async `Result`-returning
//! commands, logged failures) and on `src/controller/scheduler.rs`'s
//! interval-driven invocation style (reused in the top-level scheduler, not
//! here). The source's executor logs intended writes without issuing them;
//! per the Open Question resolution in DESIGN.md, this implementation
//! always issues them.

use crate::domain::{OperatingMode, Plan, PlanSlot};
use crate::ports::{InverterCommander, InverterLiveState, InverterStateReader, PortError};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike};
use thiserror::Error;
use tracing::{error, info, warn};

const SELF_USE_MODE: &str = "self-use";
const TIMED_SLOT_MODE: &str = "self-use-with-timed-slots";
const GRID_FIRST_MODE: &str = "grid-first";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no slot in the plan covers {0}")]
    NoMatchingSlot(DateTime<FixedOffset>),
}

/// Outcome of one executor invocation — the diagnostic surface named in
/// SPEC_FULL.md §6.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub executed: bool,
    pub action: String,
    pub reason: String,
}

/// The device state the current slot's mode demands.
#[derive(Debug, Clone, PartialEq)]
struct RequiredState {
    mode_switch: &'static str,
    charge_slot: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>, f64)>,
    discharge_slot: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>, f64)>,
}

/// Rounds `now` down to the start of its containing half-hour slot.
pub fn floor_to_half_hour(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let minute = if now.minute() < 30 { 0 } else { 30 };
    now.date_naive()
        .and_hms_opt(now.hour(), minute, 0)
        .expect("valid hour/minute always produces a valid time")
        .and_local_timezone(*now.offset())
        .single()
        .unwrap_or(now)
}

fn required_state(slot: &PlanSlot) -> RequiredState {
    let start = slot.time;
    let end = start + ChronoDuration::minutes(crate::types::SLOT_MINUTES);
    match slot.mode {
        OperatingMode::FeedInPriority => {
            RequiredState { mode_switch: GRID_FIRST_MODE, charge_slot: None, discharge_slot: None }
        }
        OperatingMode::ForceCharge { .. } => RequiredState {
            mode_switch: TIMED_SLOT_MODE,
            charge_slot: Some((start, end, slot.soc_end_pct)),
            discharge_slot: None,
        },
        OperatingMode::ForceDischarge { .. } => RequiredState {
            mode_switch: TIMED_SLOT_MODE,
            charge_slot: None,
            discharge_slot: Some((start, end, slot.soc_end_pct)),
        },
        OperatingMode::SelfUse => {
            RequiredState { mode_switch: SELF_USE_MODE, charge_slot: None, discharge_slot: None }
        }
    }
}

fn slot_matches(live: &[(DateTime<FixedOffset>, DateTime<FixedOffset>, f64)], wanted: (DateTime<FixedOffset>, DateTime<FixedOffset>, f64)) -> bool {
    live.iter().any(|(s, e, t)| *s == wanted.0 && *e == wanted.1 && (*t - wanted.2).abs() < 1e-6)
}

/// Runs one reconciliation pass: reads live state, diffs it against the
/// plan's current slot, and issues the minimal set of writes to converge.
pub async fn execute(
    plan: &Plan,
    now: DateTime<FixedOffset>,
    reader: &dyn InverterStateReader,
    commander: &dyn InverterCommander,
) -> ExecutionOutcome {
    let slot = match plan.slot_at(now) {
        Some(s) => s,
        None => {
            let reason = ExecutorError::NoMatchingSlot(now).to_string();
            error!(%reason, "executor found no matching plan slot");
            return ExecutionOutcome { executed: false, action: "none".into(), reason };
        }
    };
    let wanted = required_state(slot);

    let live = match reader.read().await {
        Ok(live) => Some(live),
        Err(e) => {
            // Fail-safe: write the plan anyway; a known-good command beats
            // acting on an unknown device state.
            warn!(error = %e, "inverter state unreadable; writing plan blind");
            None
        }
    };

    converge(&wanted, live.as_ref(), commander, slot).await
}

async fn converge(
    wanted: &RequiredState,
    live: Option<&InverterLiveState>,
    commander: &dyn InverterCommander,
    slot: &PlanSlot,
) -> ExecutionOutcome {
    let needs_charge_clear = wanted.charge_slot.is_none()
        && live.map(|l| !l.active_charge_slots.is_empty()).unwrap_or(true);
    let needs_discharge_clear = wanted.discharge_slot.is_none()
        && live.map(|l| !l.active_discharge_slots.is_empty()).unwrap_or(true);
    let needs_charge_set = wanted
        .charge_slot
        .map(|w| !live.map(|l| slot_matches(&l.active_charge_slots, w)).unwrap_or(false))
        .unwrap_or(false);
    let needs_discharge_set = wanted
        .discharge_slot
        .map(|w| !live.map(|l| slot_matches(&l.active_discharge_slots, w)).unwrap_or(false))
        .unwrap_or(false);
    let needs_mode_set = live.map(|l| l.mode_switch_value != wanted.mode_switch).unwrap_or(true);

    if !needs_charge_clear && !needs_discharge_clear && !needs_charge_set && !needs_discharge_set && !needs_mode_set {
        return ExecutionOutcome {
            executed: true,
            action: "none".into(),
            reason: "live state already matches the plan".into(),
        };
    }

    let mut actions = Vec::new();

    // Clear stale timed slots before setting new ones, so the inverter is
    // never carrying both an old and a new slot at once.
    if needs_charge_clear {
        if let Err(e) = commander.clear_charge_slots().await.and_then(ok_or_port_error) {
            return failed("clear_charge_slots", e);
        }
        actions.push("clear_charge_slots");
    }
    if needs_discharge_clear {
        if let Err(e) = commander.clear_discharge_slots().await.and_then(ok_or_port_error) {
            return failed("clear_discharge_slots", e);
        }
        actions.push("clear_discharge_slots");
    }

    // Set the new timed slot before switching the mode into a slot-using
    // mode, so the device is never in "slot mode" with no slot configured.
    if needs_charge_set {
        if let Some((start, end, target)) = wanted.charge_slot {
            if let Err(e) = commander.force_charge(start, end, target, None).await.and_then(ok_or_port_error) {
                return failed("force_charge", e);
            }
            actions.push("force_charge");
        }
    }
    if needs_discharge_set {
        if let Some((start, end, target)) = wanted.discharge_slot {
            if let Err(e) = commander.force_discharge(start, end, target, None).await.and_then(ok_or_port_error) {
                return failed("force_discharge", e);
            }
            actions.push("force_discharge");
        }
    }

    if needs_mode_set {
        if let Err(e) = commander.set_mode(wanted.mode_switch).await.and_then(ok_or_port_error) {
            return failed("set_mode", e);
        }
        actions.push("set_mode");
    }

    info!(slot = %slot.time, actions = ?actions, "executor converged live state to plan");
    ExecutionOutcome {
        executed: true,
        action: actions.join(","),
        reason: format!("converged to {} at slot {}", slot.mode, slot.time),
    }
}

fn ok_or_port_error(accepted: bool) -> Result<(), PortError> {
    if accepted {
        Ok(())
    } else {
        Err(PortError::Io("device rejected the command".into()))
    }
}

fn failed(step: &str, err: PortError) -> ExecutionOutcome {
    error!(step, error = %err, "executor write failed");
    ExecutionOutcome {
        executed: false,
        action: step.into(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Confidence, PlanMetadata};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn t(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
    }

    fn plan_with_mode(mode: OperatingMode) -> Plan {
        Plan {
            timestamp: t(0, 0),
            slots: vec![PlanSlot {
                time: t(12, 0),
                mode,
                action: "test".into(),
                soc_start_pct: 50.0,
                soc_end_pct: 60.0,
                solar_kw: 2.0,
                load_kw: 0.5,
                import_price_pence: 10.0,
                export_price_pence: 5.0,
                cost_pence: 0.0,
                cumulative_cost_pence: 0.0,
            }],
            metadata: PlanMetadata {
                total_cost_pence: 0.0,
                charge_slot_count: 1,
                discharge_slot_count: 0,
                feed_in_slot_count: 0,
                confidence: Confidence::High,
                solver_status: None,
                planner: "rule_based",
            },
        }
    }

    struct FakeReader(InverterLiveState);
    #[async_trait]
    impl InverterStateReader for FakeReader {
        async fn read(&self) -> Result<InverterLiveState, PortError> {
            Ok(self.0.clone())
        }
    }

    struct UnreadableReader;
    #[async_trait]
    impl InverterStateReader for UnreadableReader {
        async fn read(&self) -> Result<InverterLiveState, PortError> {
            Err(PortError::Io("timeout".into()))
        }
    }

    #[derive(Default)]
    struct RecordingCommander {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl InverterCommander for RecordingCommander {
        async fn force_charge(&self, _s: DateTime<FixedOffset>, _e: DateTime<FixedOffset>, _t: f64, _c: Option<f64>) -> Result<bool, PortError> {
            self.calls.lock().unwrap().push("force_charge");
            Ok(true)
        }
        async fn force_discharge(&self, _s: DateTime<FixedOffset>, _e: DateTime<FixedOffset>, _t: f64, _c: Option<f64>) -> Result<bool, PortError> {
            self.calls.lock().unwrap().push("force_discharge");
            Ok(true)
        }
        async fn clear_charge_slots(&self) -> Result<bool, PortError> {
            self.calls.lock().unwrap().push("clear_charge_slots");
            Ok(true)
        }
        async fn clear_discharge_slots(&self) -> Result<bool, PortError> {
            self.calls.lock().unwrap().push("clear_discharge_slots");
            Ok(true)
        }
        async fn set_mode(&self, _mode: &str) -> Result<bool, PortError> {
            self.calls.lock().unwrap().push("set_mode");
            Ok(true)
        }
    }

    fn empty_live(mode: &str) -> InverterLiveState {
        InverterLiveState {
            soc_pct: 50.0,
            battery_kw: 0.0,
            pv_kw: 2.0,
            grid_kw: 0.0,
            load_kw: 0.5,
            active_charge_slots: vec![],
            active_discharge_slots: vec![],
            mode_switch_value: mode.to_string(),
        }
    }

    #[test]
    fn floor_to_half_hour_rounds_down() {
        assert_eq!(floor_to_half_hour(t(12, 29)), t(12, 0));
        assert_eq!(floor_to_half_hour(t(12, 30)), t(12, 30));
        assert_eq!(floor_to_half_hour(t(12, 59)), t(12, 30));
    }

    #[tokio::test]
    async fn matching_state_issues_no_writes() {
        let plan = plan_with_mode(OperatingMode::ForceCharge { rate_kw: 3.0 });
        let reader = FakeReader(InverterLiveState {
            active_charge_slots: vec![(t(12, 0), t(12, 30), 60.0)],
            ..empty_live(TIMED_SLOT_MODE)
        });
        let commander = RecordingCommander::default();
        let outcome = execute(&plan, t(12, 5), &reader, &commander).await;
        assert!(outcome.executed);
        assert!(commander.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_charge_slot_mismatch_sets_new_slot() {
        let plan = plan_with_mode(OperatingMode::ForceCharge { rate_kw: 3.0 });
        let reader = FakeReader(empty_live(SELF_USE_MODE));
        let commander = RecordingCommander::default();
        let outcome = execute(&plan, t(12, 5), &reader, &commander).await;
        assert!(outcome.executed);
        let calls = commander.calls.lock().unwrap();
        assert!(calls.contains(&"force_charge"));
        assert!(calls.contains(&"set_mode"));
    }

    #[tokio::test]
    async fn self_use_clears_stale_slots() {
        let plan = plan_with_mode(OperatingMode::SelfUse);
        let reader = FakeReader(InverterLiveState {
            active_charge_slots: vec![(t(12, 0), t(12, 30), 60.0)],
            ..empty_live(TIMED_SLOT_MODE)
        });
        let commander = RecordingCommander::default();
        let outcome = execute(&plan, t(12, 5), &reader, &commander).await;
        assert!(outcome.executed);
        let calls = commander.calls.lock().unwrap();
        assert!(calls.contains(&"clear_charge_slots"));
        assert!(calls.contains(&"set_mode"));
    }

    #[tokio::test]
    async fn unreadable_inverter_writes_blind() {
        let plan = plan_with_mode(OperatingMode::ForceCharge { rate_kw: 3.0 });
        let reader = UnreadableReader;
        let commander = RecordingCommander::default();
        let outcome = execute(&plan, t(12, 5), &reader, &commander).await;
        assert!(outcome.executed);
        let calls = commander.calls.lock().unwrap();
        assert!(calls.contains(&"force_charge"));
    }
}
