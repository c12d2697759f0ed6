//! Narrow ports consumed by the core. Adapters (HA I/O, Solcast/Octopus
//! clients, the vendor Modbus register layout) implement these; the core
//! never depends on a concrete adapter. Grounded on the teacher's
//! `domain::battery::Battery` trait shape (`async_trait`, `anyhow::Result`
//! returns, mock-friendly).

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("adapter I/O failed: {0}")]
    Io(String),
    #[error("adapter returned no data")]
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct RawPricePoint {
    pub time: DateTime<FixedOffset>,
    pub import_pence_per_kwh: f64,
    pub export_pence_per_kwh: f64,
    pub is_predicted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RawSolarPoint {
    pub time: DateTime<FixedOffset>,
    pub kw: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RawLoadPoint {
    pub time: DateTime<FixedOffset>,
    pub kw: f64,
    pub confidence: crate::domain::Confidence,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_prices(&self, hours: u32) -> Result<Vec<RawPricePoint>, PortError>;
}

#[async_trait]
pub trait SolarForecast: Send + Sync {
    async fn get_forecast(&self, hours: u32) -> Result<Vec<RawSolarPoint>, PortError>;
}

#[async_trait]
pub trait LoadForecast: Send + Sync {
    async fn get_forecast(&self, hours: u32) -> Result<Vec<RawLoadPoint>, PortError>;
}

/// Live inverter state, read once per executor invocation.
#[derive(Debug, Clone)]
pub struct InverterLiveState {
    pub soc_pct: f64,
    pub battery_kw: f64,
    pub pv_kw: f64,
    pub grid_kw: f64,
    pub load_kw: f64,
    pub active_charge_slots: Vec<(DateTime<FixedOffset>, DateTime<FixedOffset>, f64)>,
    pub active_discharge_slots: Vec<(DateTime<FixedOffset>, DateTime<FixedOffset>, f64)>,
    pub mode_switch_value: String,
}

#[async_trait]
pub trait InverterStateReader: Send + Sync {
    async fn read(&self) -> Result<InverterLiveState, PortError>;
}

#[async_trait]
pub trait InverterCommander: Send + Sync {
    async fn force_charge(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        target_soc_pct: f64,
        current_a: Option<f64>,
    ) -> Result<bool, PortError>;

    async fn force_discharge(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        target_soc_pct: f64,
        current_a: Option<f64>,
    ) -> Result<bool, PortError>;

    async fn clear_charge_slots(&self) -> Result<bool, PortError>;
    async fn clear_discharge_slots(&self) -> Result<bool, PortError>;
    async fn set_mode(&self, mode: &str) -> Result<bool, PortError>;
}
