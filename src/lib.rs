//! Home battery planning and execution core: a pure physics model, three
//! interchangeable planners (rule-based, LP, ML), a slot-aligned executor,
//! and the ports/adapters seam that keeps all of it testable without a
//! live inverter.

pub mod config;
pub mod domain;
pub mod executor;
pub mod physics;
pub mod planner;
pub mod ports;
pub mod store;
pub mod telemetry;
pub mod types;
