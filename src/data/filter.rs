use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::Stat;

// ---------------------------------------------------------------------------
// FeatureFilter – a threshold on one numeric feature
// ---------------------------------------------------------------------------

/// Keeps stats whose `feature` is at or above `value` (`is_above`), or at or
/// below it otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    pub feature: String,
    pub value: f64,
    pub is_above: bool,
}

impl FeatureFilter {
    pub fn new(feature: impl Into<String>, value: f64, is_above: bool) -> Self {
        Self {
            feature: feature.into(),
            value,
            is_above,
        }
    }

    /// Whether `stat` passes this filter.
    ///
    /// A stat without a numeric value for the feature never passes.
    pub fn passes(&self, stat: &Stat) -> bool {
        match stat.get_feature(&self.feature).and_then(|v| v.as_f64()) {
            Some(val) if self.is_above => val >= self.value,
            Some(val) => val <= self.value,
            None => false,
        }
    }
}

impl fmt::Display for FeatureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.is_above { ">=" } else { "<=" };
        write!(f, "{} {op} {:.1}", self.feature, self.value)
    }
}

/// Return whether `stat` passes all `filters`.
///
/// An empty filter list keeps everything.
pub fn passes_all(filters: &[FeatureFilter], stat: &Stat) -> bool {
    filters.iter().all(|filter| filter.passes(stat))
}
