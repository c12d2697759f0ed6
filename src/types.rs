//! Slot-aligned time indexing and physical-unit newtypes shared by the
//! physics model, the planners and the executor.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Length of one planning slot.
pub const SLOT_MINUTES: i64 = 30;

/// Tolerance used for the AC-side energy balance invariant.
pub const ENERGY_BALANCE_TOLERANCE_KWH: f64 = 1e-6;

/// Index into the half-hour slot grid, `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    pub fn new(i: u32) -> Self {
        Self(i)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot[{}]", self.0)
    }
}

/// Wall-clock time of slot `i` given the plan's start instant `t0`.
pub fn slot_time(t0: DateTime<FixedOffset>, i: SlotIndex) -> DateTime<FixedOffset> {
    t0 + ChronoDuration::minutes(SLOT_MINUTES * i.0 as i64)
}

/// Real power, in kW. Positive means flowing in the direction named by its
/// field (e.g. `battery_charge` is always non-negative).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Power(pub f64);

impl Power {
    pub fn kw(v: f64) -> Self {
        Self(v)
    }

    pub fn as_kw(&self) -> f64 {
        self.0
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kW", self.0)
    }
}

impl Add for Power {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Power {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Energy delivered/consumed over one slot, in kWh.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Energy(pub f64);

impl Energy {
    pub fn kwh(v: f64) -> Self {
        Self(v)
    }

    pub fn as_kwh(&self) -> f64 {
        self.0
    }

    /// Energy drawn by a constant power held for `0.5h`.
    pub fn over_slot(power: Power) -> Self {
        Self(power.0 * (SLOT_MINUTES as f64 / 60.0))
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kWh", self.0)
    }
}

impl Add for Energy {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Energy {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Battery state of charge, a percentage of `capacity_kWh`. Not clamped on
/// construction — callers that need the `[min_soc, max_soc_relaxed]`
/// invariant check it explicitly, since transient out-of-range values are
/// meaningful during backwards simulation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Percentage(pub f64);

impl Percentage {
    pub fn pct(v: f64) -> Self {
        Self(v)
    }

    pub fn as_pct(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

impl Add for Percentage {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Percentage {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Price in pence per kWh. Can be negative (seen on real tariffs overnight).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Price(pub f64);

impl Price {
    pub fn pence_per_kwh(v: f64) -> Self {
        Self(v)
    }

    pub fn as_pence_per_kwh(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}p/kWh", self.0)
    }
}

impl std::ops::Mul<Energy> for Price {
    type Output = f64; // pence
    fn mul(self, rhs: Energy) -> Self::Output {
        self.0 * rhs.0
    }
}
