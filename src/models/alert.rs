use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(rename = "ratio")]
    Ratio,
    #[serde(rename = "velocity")]
    Velocity,
    #[serde(rename = "absolute")]
    Absolute,
    #[serde(rename = "zscore")]
    ZScore,
    /// Near-constant baseline and the current count at least triples it.
    #[serde(rename = "flat_baseline")]
    FlatBaseline,
}

/// The strategy a trigger belongs to. Drives suppression in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFamily {
    Heuristic,
    ZScore,
}

impl TriggerType {
    pub fn family(self) -> TriggerFamily {
        match self {
            TriggerType::Ratio | TriggerType::Velocity | TriggerType::Absolute => {
                TriggerFamily::Heuristic
            }
            TriggerType::ZScore | TriggerType::FlatBaseline => TriggerFamily::ZScore,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Ratio => "ratio",
            TriggerType::Velocity => "velocity",
            TriggerType::Absolute => "absolute",
            TriggerType::ZScore => "zscore",
            TriggerType::FlatBaseline => "flat_baseline",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected herd-behavior spike. Immutable once built.
///
/// `mean` is always present: the baseline window count for heuristic alerts,
/// the rolling baseline mean for z-score alerts. Strategy-specific fields are
/// omitted from the JSON form when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub product_id: String,
    pub current_count: u64,
    pub z_score: f64,
    pub mean: f64,

    // heuristic only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_1m: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_5m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    // z-score only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_std: Option<f64>,

    pub trigger_type: TriggerType,
    pub detected_at: DateTime<Utc>,
}

impl Alert {
    pub fn family(&self) -> TriggerFamily {
        self.trigger_type.family()
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings and numbers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
