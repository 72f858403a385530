use serde::{Deserialize, Serialize};

/// How the document derives its comparison epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TolerancePolicy {
    /// A constant epsilon in drawing units.
    Fixed { epsilon: f64 },
    /// `relative` times the larger side of the drawing extent, never below `floor`.
    ScaleWithExtent { relative: f64, floor: f64 },
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        TolerancePolicy::ScaleWithExtent {
            relative: 1e-9,
            floor: 1e-9,
        }
    }
}

impl TolerancePolicy {
    /// Evaluate the policy for a drawing whose largest extent is `extent`.
    pub fn epsilon_for(&self, extent: f64) -> f64 {
        match *self {
            TolerancePolicy::Fixed { epsilon } => epsilon,
            TolerancePolicy::ScaleWithExtent { relative, floor } => {
                if extent.is_finite() {
                    (extent * relative).max(floor)
                } else {
                    floor
                }
            }
        }
    }
}

/// Caps on the undo stack. `None` means unbounded.
///
/// Commands evicted to honour a cap can never be undone again.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryLimits {
    pub max_depth: Option<usize>,
    pub max_bytes: Option<usize>,
}

/// Per-document configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub tolerance: TolerancePolicy,
    pub history: HistoryLimits,
    /// Maximum number of items a batch call processes per acquisition of the
    /// document's exclusive section.
    pub batch_chunk_size: usize,
    pub allow_self_intersecting_polygons: bool,
    /// Extend distance used when a request does not provide one.
    pub default_extend_distance: f64,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            tolerance: TolerancePolicy::default(),
            history: HistoryLimits::default(),
            batch_chunk_size: 512,
            allow_self_intersecting_polygons: false,
            default_extend_distance: 1.0e6,
        }
    }
}

impl DocumentSettings {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse settings; missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsilon_scales_with_extent() {
        let policy = TolerancePolicy::ScaleWithExtent {
            relative: 1e-6,
            floor: 1e-9,
        };
        assert!((policy.epsilon_for(1000.0) - 1e-3).abs() < 1e-15);
        assert!((policy.epsilon_for(0.0) - 1e-9).abs() < 1e-18);
        assert!((policy.epsilon_for(f64::NAN) - 1e-9).abs() < 1e-18);
    }

    #[test]
    fn test_fixed_epsilon() {
        let policy = TolerancePolicy::Fixed { epsilon: 0.5 };
        assert_eq!(policy.epsilon_for(1e9), 0.5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            DocumentSettings::from_json(r#"{ "batch_chunk_size": 64, "history": { "max_depth": 10 } }"#)
                .unwrap();
        assert_eq!(settings.batch_chunk_size, 64);
        assert_eq!(settings.history.max_depth, Some(10));
        assert_eq!(settings.history.max_bytes, None);
        assert!(!settings.allow_self_intersecting_polygons);
        assert_eq!(settings.tolerance, TolerancePolicy::default());
    }
}
