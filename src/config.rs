//! Application configuration: planner selection, the battery's physical
//! capabilities, historical-store backend, and log level.
//!
//! Loaded with `figment` (TOML file, overridden by `OEC__`-prefixed
//! environment variables) and checked with `validator`, mirroring the
//! teacher's `config.rs` load-then-validate pattern.

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::domain::BatteryCapabilities;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub planner: PlannerConfig,

    #[validate(nested)]
    pub battery: BatteryConfig,

    #[validate(nested)]
    pub store: StoreConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// Which planner backend to build, and where its artefacts live.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PlannerConfig {
    #[serde(default = "default_planner_kind")]
    pub kind: PlannerKind,

    /// Path to a serialized [`crate::planner::ml::MlModelArtefact`]. Only
    /// consulted when `kind` is `Ml`; absence falls back to the
    /// deterministic heuristic rather than failing config load.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

fn default_planner_kind() -> PlannerKind {
    PlannerKind::RuleBased
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    RuleBased,
    Lp,
    Ml,
}

/// The physical battery parameters fed into every plan request, mirroring
/// [`BatteryCapabilities`]'s own fields one-to-one.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BatteryConfig {
    #[validate(range(min = 0.01))]
    pub capacity_kwh: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc_pct: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub max_soc_pct: f64,

    #[validate(range(min = 0.01))]
    pub max_charge_kw: f64,

    #[validate(range(min = 0.01))]
    pub max_discharge_kw: f64,

    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub charge_efficiency: f64,

    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub discharge_efficiency: f64,

    #[validate(range(min = 0.0))]
    pub export_limit_kw: f64,
}

impl BatteryConfig {
    pub fn to_capabilities(&self) -> BatteryCapabilities {
        BatteryCapabilities {
            capacity_kwh: self.capacity_kwh,
            min_soc_pct: self.min_soc_pct,
            max_soc_pct: self.max_soc_pct,
            max_charge_kw: self.max_charge_kw,
            max_discharge_kw: self.max_discharge_kw,
            charge_efficiency: self.charge_efficiency,
            discharge_efficiency: self.discharge_efficiency,
            export_limit_kw: self.export_limit_kw,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 10.0,
            min_soc_pct: 10.0,
            max_soc_pct: 95.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            export_limit_kw: 5.0,
        }
    }
}

/// Which [`crate::store::HistoricalStore`] backend to construct.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: StoreKind,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_retention_days")]
    #[validate(range(min = 1))]
    pub retention_days: u32,
}

fn default_store_kind() -> StoreKind {
    StoreKind::Memory
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/history")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Filesystem,
}

/// Logging verbosity, passed through to `tracing_subscriber::EnvFilter`
/// when `RUST_LOG` is unset.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1))]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { kind: default_planner_kind(), model_path: None }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { kind: default_store_kind(), path: default_store_path(), retention_days: default_retention_days() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            battery: BatteryConfig::default(),
            store: StoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config/default.toml` if present, then overlays `OEC__`-prefixed
    /// environment variables (`OEC__BATTERY__CAPACITY_KWH` ->
    /// `battery.capacity_kwh`), then validates physical bounds.
    pub fn load() -> Result<Self> {
        let figment = Figment::from(figment::providers::Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OEC__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn per_field_range_validation_ignores_soc_ordering() {
        let mut battery = BatteryConfig::default();
        battery.min_soc_pct = 90.0;
        battery.max_soc_pct = 10.0;
        // validator only checks per-field ranges here; the min<max ordering
        // is checked by BatteryCapabilities' own constructor at plan time.
        assert!(battery.validate().is_ok());
    }

    #[test]
    fn rejects_zero_efficiency() {
        let mut battery = BatteryConfig::default();
        battery.charge_efficiency = 0.0;
        assert!(battery.validate().is_err());
    }

    #[test]
    fn to_capabilities_round_trips_fields() {
        let battery = BatteryConfig::default();
        let caps = battery.to_capabilities();
        assert_eq!(caps.capacity_kwh, battery.capacity_kwh);
        assert_eq!(caps.export_limit_kw, battery.export_limit_kw);
    }
}
