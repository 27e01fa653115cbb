//! Scheduler configuration.
//!
//! [`SchedulerConfig`] carries the runtime knobs and shared handles (logger,
//! metrics, audit). [`OverlaySettings`] is the persisted settings document
//! (`{"overlay": {"frameTargetTime": 32, ...}}`) that can be loaded from disk
//! and applied on top of a config.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SchedulerError;
use crate::logging::{EventQueueSink, Logger};
use crate::metrics::SchedulerMetrics;
use crate::registry::DEFAULT_HANDLER_TABLE_CAPACITY;
use crate::runtime::audit::{NullAudit, SchedulerAudit};

/// Configuration knobs for the scheduler and its frame loop.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Target wall-clock time per visible frame.
    pub frame_target: Duration,
    /// Sleep between iterations while the overlay is hidden and no task is pending.
    pub hidden_sleep: Duration,
    /// Upper bound on resumption passes per visible frame. `None` leaves only the time budget.
    pub max_resume_passes: Option<usize>,
    /// Maximum number of undrained events. `None` keeps the queue unbounded.
    pub queue_capacity: Option<usize>,
    /// Maximum number of distinct event names with subscribers.
    pub handler_table_capacity: usize,
    /// Interval between foreground-window checks made by the focus poller.
    pub focus_check_interval: Duration,
    /// Optional structured logger used by the scheduler.
    pub logger: Option<Logger>,
    /// Metrics accumulator used for periodic snapshots.
    pub metrics: Option<Arc<Mutex<SchedulerMetrics>>>,
    /// Interval between metrics snapshot emissions. Zero disables snapshots.
    pub metrics_interval: Duration,
    /// Target field used when emitting metrics snapshots.
    pub metrics_target: String,
    /// Lifecycle audit sink.
    pub audit: Arc<dyn SchedulerAudit>,
    /// When set, log lines are forwarded to scripts as `log-message` events.
    pub log_forwarding: Option<EventQueueSink>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_target: Duration::from_millis(32),
            hidden_sleep: Duration::from_millis(100),
            max_resume_passes: None,
            queue_capacity: None,
            handler_table_capacity: DEFAULT_HANDLER_TABLE_CAPACITY,
            focus_check_interval: Duration::from_millis(250),
            logger: None,
            metrics: None,
            metrics_interval: Duration::from_secs(5),
            metrics_target: "overlay::metrics".to_string(),
            audit: Arc::new(NullAudit),
            log_forwarding: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn SchedulerAudit>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_frame_target(mut self, frame_target: Duration) -> Self {
        self.frame_target = frame_target;
        self
    }

    pub fn with_max_resume_passes(mut self, passes: usize) -> Self {
        self.max_resume_passes = Some(passes.max(1));
        self
    }

    /// Bound the event queue. Clamped to at least one slot.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    pub fn with_log_forwarding(mut self, sink: EventQueueSink) -> Self {
        self.log_forwarding = Some(sink);
        self
    }

    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(SchedulerMetrics::new())));
        }
    }

    /// Disable metrics collection and prevent further snapshots.
    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    /// Access the shared metrics handle if metrics are enabled.
    pub fn metrics_handle(&self) -> Option<Arc<Mutex<SchedulerMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("setting `{key}` is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<ConfigError> for SchedulerError {
    fn from(err: ConfigError) -> Self {
        SchedulerError::Config(err.to_string())
    }
}

/// Persisted settings document. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub overlay: OverlaySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlaySection {
    /// Milliseconds per visible frame.
    pub frame_target_time: f64,
    /// Milliseconds slept per hidden iteration.
    pub hidden_sleep_time: f64,
    /// Milliseconds between foreground-window checks.
    pub fg_win_check_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resume_passes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_queue_capacity: Option<usize>,
}

impl Default for OverlaySection {
    fn default() -> Self {
        Self {
            frame_target_time: 32.0,
            hidden_sleep_time: 100.0,
            fg_win_check_time: 250.0,
            max_resume_passes: None,
            event_queue_capacity: None,
        }
    }
}

impl OverlaySettings {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load from `path`, or return defaults when the file does not exist yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let section = &self.overlay;
        millis("overlay.frameTargetTime", section.frame_target_time)?;
        millis("overlay.hiddenSleepTime", section.hidden_sleep_time)?;
        millis("overlay.fgWinCheckTime", section.fg_win_check_time)?;
        if section.max_resume_passes == Some(0) {
            return Err(ConfigError::Invalid {
                key: "overlay.maxResumePasses",
                reason: "must be at least 1".to_string(),
            });
        }
        if section.event_queue_capacity == Some(0) {
            return Err(ConfigError::Invalid {
                key: "overlay.eventQueueCapacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut SchedulerConfig) -> ConfigResult<()> {
        self.validate()?;
        let section = &self.overlay;
        config.frame_target = millis("overlay.frameTargetTime", section.frame_target_time)?;
        config.hidden_sleep = millis("overlay.hiddenSleepTime", section.hidden_sleep_time)?;
        config.focus_check_interval = millis("overlay.fgWinCheckTime", section.fg_win_check_time)?;
        config.max_resume_passes = section.max_resume_passes;
        config.queue_capacity = section.event_queue_capacity;
        Ok(())
    }
}

/// A positive millisecond count that fits in a `Duration`.
fn millis(key: &'static str, value: f64) -> ConfigResult<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("expected a positive number of milliseconds, got {value}"),
        });
    }
    Duration::try_from_secs_f64(value / 1000.0).map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("{value} ms is out of range: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let settings = OverlaySettings::from_json_str(r#"{"overlay": {"frameTargetTime": 16}}"#)
            .unwrap();
        assert_eq!(settings.overlay.frame_target_time, 16.0);
        assert_eq!(settings.overlay.fg_win_check_time, 250.0);

        let mut config = SchedulerConfig::default();
        settings.apply_to(&mut config).unwrap();
        assert_eq!(config.frame_target, Duration::from_millis(16));
        assert_eq!(config.hidden_sleep, Duration::from_millis(100));
        assert_eq!(config.max_resume_passes, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = OverlaySettings::from_json_str(r#"{"overlay": {"frameTargetTime": -1}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "overlay.frameTargetTime",
                ..
            }
        ));

        let err = OverlaySettings::from_json_str(r#"{"overlay": {"maxResumePasses": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn durations_too_large_for_the_clock_are_rejected() {
        let err = OverlaySettings::from_json_str(r#"{"overlay": {"frameTargetTime": 1e30}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "overlay.frameTargetTime",
                ..
            }
        ));

        let mut settings = OverlaySettings::default();
        settings.overlay.hidden_sleep_time = 1e30;
        let mut config = SchedulerConfig::default();
        let err = settings.apply_to(&mut config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "overlay.hiddenSleepTime",
                ..
            }
        ));
        assert_eq!(config.hidden_sleep, Duration::from_millis(100));
    }

    #[test]
    fn queue_capacity_needs_one_slot() {
        let err = OverlaySettings::from_json_str(r#"{"overlay": {"eventQueueCapacity": 0}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "overlay.eventQueueCapacity",
                ..
            }
        ));
        let config = SchedulerConfig::default().with_queue_capacity(0);
        assert_eq!(config.queue_capacity, Some(1));
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let path = std::env::temp_dir().join(format!(
            "overlay-scheduler-settings-{}.json",
            std::process::id()
        ));
        let mut settings = OverlaySettings::default();
        settings.overlay.max_resume_passes = Some(4);
        settings.save(&path).unwrap();

        let loaded = OverlaySettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        std::fs::remove_file(&path).ok();

        let fallback = OverlaySettings::load_or_default(&path).unwrap();
        assert_eq!(fallback, OverlaySettings::default());
    }

    #[test]
    fn metrics_toggle() {
        let mut config = SchedulerConfig::default();
        assert!(config.metrics_handle().is_none());
        config.enable_metrics();
        assert!(config.metrics_handle().is_some());
        config.disable_metrics();
        assert!(config.metrics_handle().is_none());
    }
}
