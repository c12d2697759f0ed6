pub mod battery;
pub mod forecast;
pub mod mode;
pub mod plan;

pub use battery::{BatteryCapabilities, BatteryState};
pub use forecast::{Confidence, LoadPoint, PlanRequest, PriceTrace, SolarPoint};
pub use mode::OperatingMode;
pub use plan::{Plan, PlanMetadata, PlanSlot, SlotResult};
