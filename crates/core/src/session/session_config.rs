use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be in [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("idle_interval_ms ({idle}) must not be shorter than base_interval_ms ({base})")]
    IdleShorterThanBase { base: u64, idle: u64 },
    #[error(
        "recognition_timeout_ms ({timeout}) must be shorter than recognition_cooldown_ms ({cooldown})"
    )]
    TimeoutNotShorterThanCooldown { timeout: u64, cooldown: u64 },
}

/// Per-stream tuning. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Detections below this confidence are ignored.
    pub min_confidence: f64,
    pub iou_threshold: f64,
    /// A track unseen for longer than this is removed.
    pub expiry_ms: u64,
    pub recognition_cooldown_ms: u64,
    pub log_cooldown_ms: u64,
    pub recognition_timeout_ms: u64,
    pub detection_timeout_ms: u64,
    pub base_interval_ms: u64,
    pub idle_interval_ms: u64,
    pub min_delay_ms: u64,
    /// Empty cycles after which the loop backs off to `idle_interval_ms`.
    pub idle_streak_threshold: u32,
    pub not_ready_delay_ms: u64,
    pub no_frame_delay_ms: u64,
    pub quality_interval_ms: u64,
    pub crop_padding: f64,
    pub crop_max_dimension: u32,
    /// Substitute the synthetic source when no real one can be opened.
    pub allow_fallback: bool,
    pub fallback_width: u32,
    pub fallback_height: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            iou_threshold: 0.4,
            expiry_ms: 1000,
            recognition_cooldown_ms: 3000,
            log_cooldown_ms: 5000,
            recognition_timeout_ms: 2500,
            detection_timeout_ms: 2000,
            base_interval_ms: 200,
            idle_interval_ms: 1000,
            min_delay_ms: 30,
            idle_streak_threshold: 5,
            not_ready_delay_ms: 500,
            no_frame_delay_ms: 200,
            quality_interval_ms: 2000,
            crop_padding: 0.2,
            crop_max_dimension: 320,
            allow_fallback: true,
            fallback_width: 640,
            fallback_height: 480,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_confidence", self.min_confidence),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        if !(0.0..=1.0).contains(&self.crop_padding) {
            return Err(ConfigError::OutOfUnitRange {
                field: "crop_padding",
                value: self.crop_padding,
            });
        }
        for (field, value) in [
            ("expiry_ms", self.expiry_ms),
            ("base_interval_ms", self.base_interval_ms),
            ("recognition_timeout_ms", self.recognition_timeout_ms),
            ("detection_timeout_ms", self.detection_timeout_ms),
            ("crop_max_dimension", self.crop_max_dimension as u64),
            ("fallback_width", self.fallback_width as u64),
            ("fallback_height", self.fallback_height as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.idle_interval_ms < self.base_interval_ms {
            return Err(ConfigError::IdleShorterThanBase {
                base: self.base_interval_ms,
                idle: self.idle_interval_ms,
            });
        }
        // A call must resolve or expire before the track is due again.
        if self.recognition_timeout_ms >= self.recognition_cooldown_ms {
            return Err(ConfigError::TimeoutNotShorterThanCooldown {
                timeout: self.recognition_timeout_ms,
                cooldown: self.recognition_cooldown_ms,
            });
        }
        Ok(())
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn recognition_cooldown(&self) -> Duration {
        Duration::from_millis(self.recognition_cooldown_ms)
    }

    pub fn log_cooldown(&self) -> Duration {
        Duration::from_millis(self.log_cooldown_ms)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_millis(self.not_ready_delay_ms)
    }

    pub fn no_frame_delay(&self) -> Duration {
        Duration::from_millis(self.no_frame_delay_ms)
    }

    pub fn quality_interval(&self) -> Duration {
        Duration::from_millis(self.quality_interval_ms)
    }
}

/// Process-wide settings for the session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of the recent-events log; oldest entries are evicted.
    pub event_capacity: usize,
    /// Recognition worker threads per stream.
    pub recognition_workers: usize,
    /// Pending recognition requests per stream before new ones are rejected.
    pub recognition_queue: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            recognition_workers: 2,
            recognition_queue: 16,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("event_capacity", self.event_capacity),
            ("recognition_workers", self.recognition_workers),
            ("recognition_queue", self.recognition_queue),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrackingConfig::default().validate().is_ok());
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: TrackingConfig =
            serde_json::from_str(r#"{"iou_threshold": 0.5, "allow_fallback": false}"#).unwrap();
        assert_eq!(config.iou_threshold, 0.5);
        assert!(!config.allow_fallback);
        assert_eq!(config.expiry(), Duration::from_millis(1000));
        assert_eq!(config.recognition_cooldown(), Duration::from_millis(3000));
    }

    #[test]
    fn test_roundtrips_through_json() {
        let config = TrackingConfig {
            min_confidence: 0.7,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: TrackingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[rstest]
    #[case(TrackingConfig { min_confidence: 1.5, ..Default::default() })]
    #[case(TrackingConfig { iou_threshold: -0.1, ..Default::default() })]
    #[case(TrackingConfig { crop_padding: 2.0, ..Default::default() })]
    #[case(TrackingConfig { expiry_ms: 0, ..Default::default() })]
    #[case(TrackingConfig { base_interval_ms: 0, ..Default::default() })]
    #[case(TrackingConfig { idle_interval_ms: 100, ..Default::default() })]
    #[case(TrackingConfig { recognition_timeout_ms: 3000, ..Default::default() })]
    fn test_invalid_tracking_config_is_rejected(#[case] config: TrackingConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_must_be_shorter_than_cooldown() {
        let config = TrackingConfig {
            recognition_cooldown_ms: 1000,
            recognition_timeout_ms: 1500,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TimeoutNotShorterThanCooldown {
                timeout: 1500,
                cooldown: 1000
            })
        );

        let config = TrackingConfig {
            recognition_cooldown_ms: 1000,
            recognition_timeout_ms: 999,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = ManagerConfig {
            recognition_workers: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "recognition_workers"
            })
        );
    }
}
