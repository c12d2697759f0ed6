use serde::{Deserialize, Serialize};
use std::fmt;

/// Inverter operating mode for one slot. Each mode routes the same three
/// energy streams (solar, load, grid, battery) with a different priority
/// order; see [`crate::physics`] for the routing rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Solar serves load first, surplus charges the battery, residual exports.
    SelfUse,
    /// Solar exports to grid first, bypassing the normal export cap.
    FeedInPriority,
    /// Battery charges at a commanded rate, topped up by excess solar.
    ForceCharge { rate_kw: f64 },
    /// Battery discharges at a commanded rate, optionally bounded by a target SOC.
    ForceDischarge { rate_kw: f64, target_soc: Option<f64> },
}

impl OperatingMode {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SelfUse => "self_use",
            Self::FeedInPriority => "feed_in_priority",
            Self::ForceCharge { .. } => "force_charge",
            Self::ForceDischarge { .. } => "force_discharge",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfUse => write!(f, "self-use"),
            Self::FeedInPriority => write!(f, "feed-in-priority"),
            Self::ForceCharge { rate_kw } => write!(f, "force-charge@{rate_kw:.2}kW"),
            Self::ForceDischarge { rate_kw, target_soc } => match target_soc {
                Some(t) => write!(f, "force-discharge@{rate_kw:.2}kW(target {t:.0}%)"),
                None => write!(f, "force-discharge@{rate_kw:.2}kW"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(OperatingMode::SelfUse.kind(), "self_use");
        assert_eq!(OperatingMode::FeedInPriority.kind(), "feed_in_priority");
        assert_eq!(
            OperatingMode::ForceCharge { rate_kw: 2.0 }.kind(),
            "force_charge"
        );
    }
}
