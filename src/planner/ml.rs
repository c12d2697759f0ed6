//! Hybrid ML-guided planner: a feed-in-priority classifier/regressor
//! parameterises the same per-slot decision ladder as the rule-based
//! planner, refined by a physics-guided check that rejects the ML hint
//! whenever it would increase clipping.
//!
//! Grounded on `src/ml/{mod,inference,models}.rs` for the `FeatureVector`/
//! `Prediction`/model-registry shapes and on
//! `examples/original_source/apps/solar_optimizer/planners/ml_planner.py`
//! for the exact feature list and fallback-heuristic banding. The decision
//! ladder itself (rules 3-7 of SPEC_FULL.md §4.3.3) is reused directly from
//! [`crate::planner::rule_based`] rather than re-implemented, since the
//! spec describes it as "effectively §4.3.3" parameterised only by the
//! feed-in/pre-sunrise windows.

use crate::domain::{Confidence, OperatingMode, Plan, PlanMetadata, PlanRequest, PlanSlot};
use crate::physics::{describe, simulate_slot};
use crate::planner::rule_based::{
    choose_mode, daylight_window, select_pre_sunrise_window, suffix_load_deficit, suffix_min_import_price,
    suffix_solar_surplus,
};
use crate::planner::{derive_confidence, validate_inputs, Planner, PlannerError, PlannerInfo};
use crate::types::{slot_time, Price, SlotIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DT_HOURS: f64 = crate::types::SLOT_MINUTES as f64 / 60.0;

/// Minimum clipping reduction (kWh) the ML-hinted feed-in window must beat
/// pure Self-Use by, or the hint is declined — see SPEC_FULL.md §4.5 point 2.
const MIN_CLIPPING_IMPROVEMENT_KWH: f64 = 2.0;

const HEURISTIC_SURPLUS_HEADROOM_MARGIN_KWH: f64 = 2.0;
const HEURISTIC_PEAK_SOLAR_GATE_KW: f64 = 5.0;
const FALLBACK_CONFIDENCE: f64 = 0.4;
const TRAINED_MODEL_CONFIDENCE: f64 = 0.8;

/// The 15 scalar features described in SPEC_FULL.md §4.5, derived purely
/// from the plan request (no device I/O, no historical store lookup).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub soc_start: f64,
    pub capacity_kwh: f64,
    pub headroom_kwh: f64,
    pub total_solar_kwh: f64,
    pub peak_solar_kw: f64,
    pub solar_efficiency: f64,
    pub net_surplus_kwh: f64,
    pub total_load_kwh: f64,
    pub evening_peak_kw: f64,
    pub overnight_avg_price: f64,
    pub peak_avg_price: f64,
    pub price_spread: f64,
    pub arbitrage_margin_after_losses: f64,
    pub surplus_ratio: f64,
    pub surplus_per_kwh_capacity: f64,
}

impl FeatureVector {
    pub const NAMES: [&'static str; 15] = [
        "soc_start",
        "capacity_kwh",
        "headroom_kwh",
        "total_solar_kwh",
        "peak_solar_kw",
        "solar_efficiency",
        "net_surplus_kwh",
        "total_load_kwh",
        "evening_peak_kw",
        "overnight_avg_price",
        "peak_avg_price",
        "price_spread",
        "arbitrage_margin_after_losses",
        "surplus_ratio",
        "surplus_per_kwh_capacity",
    ];

    pub fn as_array(&self) -> [f64; 15] {
        [
            self.soc_start,
            self.capacity_kwh,
            self.headroom_kwh,
            self.total_solar_kwh,
            self.peak_solar_kw,
            self.solar_efficiency,
            self.net_surplus_kwh,
            self.total_load_kwh,
            self.evening_peak_kw,
            self.overnight_avg_price,
            self.peak_avg_price,
            self.price_spread,
            self.arbitrage_margin_after_losses,
            self.surplus_ratio,
            self.surplus_per_kwh_capacity,
        ]
    }
}

/// The ML model's raw output for one plan request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedInPrediction {
    pub use_feed_in: bool,
    pub feed_in_hours: f64,
    pub confidence: f64,
}

/// Hours considered "evening" for the `evening_peak_kW` feature and the
/// overnight/peak price averages — matches the rule-based planner's own
/// day/night split (`!(6..20).contains(&hour)` for overnight).
fn is_evening_hour(hour: u32) -> bool {
    (17..21).contains(&hour)
}

fn is_overnight_hour(hour: u32) -> bool {
    !(6..20).contains(&hour)
}

/// Extracts the 15-scalar feature vector from a plan request. All sums are
/// over the full horizon except where the spec's feature name implies a
/// sub-window (`evening_peak_kW`, the overnight/peak price averages).
pub fn extract_features(request: &PlanRequest) -> FeatureVector {
    let n = request.n_slots();
    let caps = &request.capabilities;
    let soc_start = request.battery_state.soc_pct;
    let headroom_kwh = caps.headroom_kwh(soc_start, caps.max_soc_relaxed(soc_start));

    let total_solar_kwh: f64 = request.solar.iter().map(|s| s.kw * DT_HOURS).sum();
    let peak_solar_kw = request.solar.iter().map(|s| s.kw).fold(0.0, f64::max);
    let total_load_kwh: f64 = request.load.iter().map(|l| l.kw * DT_HOURS).sum();

    let daylight = daylight_window(request);
    let net_surplus_kwh: f64 = match daylight {
        Some((start, end)) => (start..end)
            .map(|i| (request.solar[i].kw - request.load[i].kw).max(0.0) * DT_HOURS)
            .sum(),
        None => 0.0,
    };
    // Fraction of daylight solar actually usable (not clipped) under pure
    // Self-Use — a proxy for how tight the battery/export headroom is.
    let solar_efficiency = match daylight {
        Some((start, end)) if total_solar_kwh > 1e-9 => {
            let mut soc = soc_start;
            let mut clipped_sum = 0.0;
            for i in start..end {
                let r = simulate_slot(
                    caps,
                    OperatingMode::SelfUse,
                    soc,
                    request.solar[i].kw,
                    request.load[i].kw,
                    Price::pence_per_kwh(request.prices[i].import_pence_per_kwh),
                    Price::pence_per_kwh(request.prices[i].export_pence_per_kwh),
                );
                soc += r.soc_delta_pct;
                clipped_sum += r.clipped_kwh;
            }
            (1.0 - clipped_sum / total_solar_kwh).clamp(0.0, 1.0)
        }
        _ => 1.0,
    };

    let mut evening_peak_kw: f64 = 0.0;
    let mut overnight_sum = 0.0;
    let mut overnight_n = 0usize;
    let mut peak_sum = 0.0;
    let mut peak_n = 0usize;
    for i in 0..n {
        let hour = (i / 2) as u32;
        if is_evening_hour(hour) {
            evening_peak_kw = evening_peak_kw.max(request.load[i].kw);
            peak_sum += request.prices[i].import_pence_per_kwh;
            peak_n += 1;
        }
        if is_overnight_hour(hour) {
            overnight_sum += request.prices[i].import_pence_per_kwh;
            overnight_n += 1;
        }
    }
    let overnight_avg_price = if overnight_n > 0 { overnight_sum / overnight_n as f64 } else { 0.0 };
    let peak_avg_price = if peak_n > 0 { peak_sum / peak_n as f64 } else { overnight_avg_price };
    let price_spread = peak_avg_price - overnight_avg_price;

    let avg_import: f64 = request.prices.iter().map(|p| p.import_pence_per_kwh).sum::<f64>() / n as f64;
    let avg_export: f64 = request.prices.iter().map(|p| p.export_pence_per_kwh).sum::<f64>() / n as f64;
    let round_trip = caps.round_trip_efficiency();
    let arbitrage_margin_after_losses = if round_trip > 1e-9 { avg_export - avg_import / round_trip } else { 0.0 };

    let surplus_ratio = if headroom_kwh > 1e-9 { net_surplus_kwh / headroom_kwh } else { 0.0 };
    let surplus_per_kwh_capacity = if caps.capacity_kwh > 1e-9 { net_surplus_kwh / caps.capacity_kwh } else { 0.0 };

    FeatureVector {
        soc_start,
        capacity_kwh: caps.capacity_kwh,
        headroom_kwh,
        total_solar_kwh,
        peak_solar_kw,
        solar_efficiency,
        net_surplus_kwh,
        total_load_kwh,
        evening_peak_kw,
        overnight_avg_price,
        peak_avg_price,
        price_spread,
        arbitrage_margin_after_losses,
        surplus_ratio,
        surplus_per_kwh_capacity,
    }
}

/// Deterministic fallback used when no trained model artefact is loaded —
/// SPEC_FULL.md §4.5: "When the classifier is untrained or unavailable,
/// fall back to a deterministic heuristic".
pub fn heuristic_predict(features: &FeatureVector) -> FeedInPrediction {
    let use_feed_in = features.net_surplus_kwh > features.headroom_kwh + HEURISTIC_SURPLUS_HEADROOM_MARGIN_KWH
        || features.peak_solar_kw > HEURISTIC_PEAK_SOLAR_GATE_KW;

    let feed_in_hours = if !use_feed_in {
        0.0
    } else if features.surplus_ratio > 10.0 {
        14.0
    } else if features.surplus_ratio >= 10.0 {
        12.0
    } else if features.surplus_ratio >= 5.0 {
        10.0
    } else if features.surplus_ratio >= 2.0 {
        8.0
    } else {
        6.0
    };

    FeedInPrediction { use_feed_in, feed_in_hours, confidence: FALLBACK_CONFIDENCE }
}

/// A frozen, offline-trained model artefact. Training itself
/// (`smartcore::ensemble::random_forest_{classifier,regressor}`, trained on
/// rule-based-planner outputs as pseudo-labels per §4.5) is an offline
/// pipeline outside the core's control path; this type only ever loads and
/// predicts with an artefact produced elsewhere.
#[cfg(feature = "ml")]
pub mod model {
    use super::{FeatureVector, FeedInPrediction, TRAINED_MODEL_CONFIDENCE};
    use crate::planner::PlannerError;
    use serde::{Deserialize, Serialize};
    use smartcore::ensemble::random_forest_classifier::RandomForestClassifier;
    use smartcore::ensemble::random_forest_regressor::RandomForestRegressor;
    use smartcore::linalg::basic::matrix::DenseMatrix;

    #[derive(Serialize, Deserialize)]
    pub struct MlModelArtefact {
        classifier: RandomForestClassifier<f64, i64, DenseMatrix<f64>, Vec<i64>>,
        regressor: RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>,
    }

    impl MlModelArtefact {
        /// Deserialises an artefact written by the offline training
        /// pipeline. Both models are `serde`-enabled in `smartcore`
        /// (mirrors `src/ml/smartcore.rs`'s serialization story, using
        /// `serde_json` rather than `bincode` since this crate never added
        /// the latter as a dependency).
        pub fn load_from_bytes(bytes: &[u8]) -> Result<Self, PlannerError> {
            serde_json::from_slice(bytes)
                .map_err(|e| PlannerError::ModelArtefactMissing(format!("malformed model artefact: {e}")))
        }

        pub fn predict(&self, features: &FeatureVector) -> Result<FeedInPrediction, PlannerError> {
            let row = features.as_array().to_vec();
            let x = DenseMatrix::new(1, row.len(), row, false);

            let class = self
                .classifier
                .predict(&x)
                .map_err(|e| PlannerError::ModelArtefactMissing(format!("classifier inference failed: {e:?}")))?;
            let use_feed_in = class.first().copied().unwrap_or(0) != 0;

            let feed_in_hours = if use_feed_in {
                let hours = self
                    .regressor
                    .predict(&x)
                    .map_err(|e| PlannerError::ModelArtefactMissing(format!("regressor inference failed: {e:?}")))?;
                hours.first().copied().unwrap_or(0.0).clamp(0.0, 16.0)
            } else {
                0.0
            };

            Ok(FeedInPrediction { use_feed_in, feed_in_hours, confidence: TRAINED_MODEL_CONFIDENCE })
        }
    }
}

#[cfg(feature = "ml")]
pub use model::MlModelArtefact;

#[derive(Default)]
pub struct MlPlanner {
    #[cfg(feature = "ml")]
    artefact: Option<MlModelArtefact>,
}

impl MlPlanner {
    /// A planner with no trained model — always uses the deterministic
    /// fallback heuristic and marks plan confidence as `Low`, per the
    /// `ModelArtefactMissing` recovery rule in SPEC_FULL.md §7.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "ml")]
    pub fn with_artefact(artefact: MlModelArtefact) -> Self {
        Self { artefact: Some(artefact) }
    }

    fn predict(&self, features: &FeatureVector) -> FeedInPrediction {
        #[cfg(feature = "ml")]
        {
            if let Some(artefact) = &self.artefact {
                match artefact.predict(features) {
                    Ok(p) => return p,
                    Err(e) => {
                        tracing::warn!(error = %e, "ML model artefact inference failed; falling back to heuristic");
                    }
                }
            }
        }
        heuristic_predict(features)
    }

    fn used_trained_model(&self, prediction: &FeedInPrediction) -> bool {
        prediction.confidence >= TRAINED_MODEL_CONFIDENCE
    }
}

#[async_trait]
impl Planner for MlPlanner {
    async fn create_plan(&self, request: &PlanRequest) -> Result<Plan, PlannerError> {
        validate_inputs(request)?;
        let features = extract_features(request);
        let prediction = self.predict(&features);
        Ok(build_plan(request, &prediction, self.used_trained_model(&prediction)))
    }

    fn info(&self) -> PlannerInfo {
        PlannerInfo { name: "MlPlanner", kind: "ml", version: "1.0" }
    }
}

/// Total clipped energy (kWh) simulating Feed-in-Priority from `start` up
/// to (not including) `transition`, then Self-Use to `end`.
fn clipped_energy_for_transition(request: &PlanRequest, start: usize, end: usize, transition: usize) -> f64 {
    let caps = &request.capabilities;
    let mut soc = request.battery_state.soc_pct;
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
}

/// Physics-guided refinement of the ML hint (SPEC_FULL.md §4.5 point 2):
/// tests the model's own suggested transition against pure Self-Use and
/// only keeps it if it clips at least 2 kWh less. This is what keeps the
/// ML suggestion from ever making clipping worse (testable property #9).
fn refine_feed_in_window(
    request: &PlanRequest,
    daylight: (usize, usize),
    prediction: &FeedInPrediction,
) -> Option<(usize, usize)> {
    if !prediction.use_feed_in {
        return None;
    }
    let (start, end) = daylight;
    let hinted_slots = (prediction.feed_in_hours * 2.0).round() as usize;
    let transition = (start + hinted_slots).clamp(start, end);
    if transition <= start {
        return None;
    }

    let pure_self_use_clipped = clipped_energy_for_transition(request, start, end, start);
    let hinted_clipped = clipped_energy_for_transition(request, start, end, transition);

    if pure_self_use_clipped - hinted_clipped >= MIN_CLIPPING_IMPROVEMENT_KWH {
        Some((start, transition))
    } else {
        None
    }
}

fn build_plan(request: &PlanRequest, prediction: &FeedInPrediction, used_trained_model: bool) -> Plan {
    let n = request.n_slots();
    let caps = &request.capabilities;
    let daylight = daylight_window(request);
    let feed_in = daylight.and_then(|d| refine_feed_in_window(request, d, prediction));
    let pre_sunrise = daylight.and_then(|d| select_pre_sunrise_window(request, d, feed_in));

    let future_solar_surplus = suffix_solar_surplus(request);
    let future_min_price = suffix_min_import_price(request);
    let future_deficit = suffix_load_deficit(request);

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

    // ModelArtefactMissing's recovery marks confidence as low; otherwise the
    // usual predicted-price-count band applies (SPEC_FULL.md §4.2/§7).
    let confidence = if used_trained_model { derive_confidence(request) } else { Confidence::Low };

    Plan {
        timestamp: request.t0,
        slots,
        metadata: PlanMetadata {
            total_cost_pence: cumulative_cost,
            charge_slot_count: charge_count,
            discharge_slot_count: discharge_count,
            feed_in_slot_count: feed_in_count,
            confidence,
            solver_status: None,
            planner: "ml",
        },
    }
}
