//! Validation rule parameters.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const fn default_grade_min() -> i32 {
    0
}

const fn default_grade_max() -> i32 {
    12
}

fn default_recognized_zones() -> Vec<String> {
    vec!["local".into(), "partial".into(), "non_local".into()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationConfig {
    /// Lowest accepted grade. Kindergarten (`K`) counts as 0.
    #[serde(default = "default_grade_min")]
    pub grade_min: i32,

    #[serde(default = "default_grade_max")]
    pub grade_max: i32,

    /// Recognized local-status zones (compared case-insensitively).
    #[serde(default = "default_recognized_zones")]
    pub recognized_zones: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            grade_min: default_grade_min(),
            grade_max: default_grade_max(),
            recognized_zones: default_recognized_zones(),
        }
    }
}

impl ValidationConfig {
    pub fn is_recognized_zone(&self, zone: &str) -> bool {
        let zone = zone.trim();
        self.recognized_zones
            .iter()
            .any(|known| known.eq_ignore_ascii_case(zone))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.grade_min > self.grade_max {
            return Err(ConfigError::invalid(
                "validation.grade_min",
                format!(
                    "grade_min ({}) is greater than grade_max ({})",
                    self.grade_min, self.grade_max
                ),
            ));
        }
        if self.recognized_zones.iter().all(|z| z.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "validation.recognized_zones",
                "at least one zone is required",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_k_through_12() {
        let config = ValidationConfig::default();
        assert_eq!(config.grade_min, 0);
        assert_eq!(config.grade_max, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zone_match_ignores_case() {
        let config = ValidationConfig::default();
        assert!(config.is_recognized_zone("Local"));
        assert!(config.is_recognized_zone(" NON_LOCAL "));
        assert!(!config.is_recognized_zone("out_of_state"));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = ValidationConfig {
            grade_min: 9,
            grade_max: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_zone_list_is_rejected() {
        let config = ValidationConfig {
            recognized_zones: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
