use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Priority, PriorityBand, TaskKind};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the deadline scheduler.
///
/// Parsed from `ddsched.toml`, then overridden by `DDSCHED_*` environment
/// variables, then validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub priorities: PriorityConfig,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Task generators started by the `ddsched` binary.
    #[serde(default = "default_generators")]
    pub generators: Vec<GeneratorConfig>,
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Priority band reserved for deadline tasks.
    pub fn band(&self) -> PriorityBand {
        self.priorities.band()
    }

    /// Convert a tick count into wall time.
    pub fn ticks(&self, ticks: u64) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms.saturating_mul(ticks))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let band = self.band();
        tracing::info!("Config loaded:");
        tracing::info!(
            "  priorities:  minimum={}, band={}..={} ({} levels), generator={}, monitor={}, coordinator={}",
            self.priorities.minimum,
            band.floor,
            band.base,
            band.capacity(),
            self.priorities.generator,
            self.priorities.monitor,
            self.priorities.coordinator,
        );
        tracing::info!(
            "  scheduler:   retention={}, queue_depth={}, tick_ms={}",
            self.scheduler.retention,
            self.scheduler.command_queue_depth,
            self.scheduler.tick_ms,
        );
        tracing::info!(
            "  monitor:     enabled={}, delay={} ticks, interval={} ticks",
            self.monitor.enabled,
            self.monitor.startup_delay_ticks,
            self.monitor.poll_interval_ticks,
        );
        tracing::info!("  generators:  {}", self.generators.len());
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `DDSCHED_SECTION_KEY` overrides `section.key`.
    /// - `DDSCHED_PRIORITIES_MINIMUM` -> `priorities.minimum`
    /// - `DDSCHED_PRIORITIES_EXECUTION_BASE` -> `priorities.execution_base`
    /// - `DDSCHED_SCHEDULER_RETENTION` -> `scheduler.retention`
    /// - `DDSCHED_SCHEDULER_COMMAND_QUEUE_DEPTH` -> `scheduler.command_queue_depth`
    /// - `DDSCHED_SCHEDULER_TICK_MS` -> `scheduler.tick_ms`
    /// - `DDSCHED_MONITOR_ENABLED` -> `monitor.enabled`
    /// - `DDSCHED_MONITOR_POLL_INTERVAL_TICKS` -> `monitor.poll_interval_ticks`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("DDSCHED_PRIORITIES_MINIMUM") {
            self.priorities.minimum = Priority(v);
        }
        if let Some(v) = env_parsed("DDSCHED_PRIORITIES_EXECUTION_BASE") {
            self.priorities.execution_base = Priority(v);
        }
        if let Some(v) = env_parsed("DDSCHED_SCHEDULER_RETENTION") {
            self.scheduler.retention = v;
        }
        if let Some(v) = env_parsed("DDSCHED_SCHEDULER_COMMAND_QUEUE_DEPTH") {
            self.scheduler.command_queue_depth = v;
        }
        if let Some(v) = env_parsed("DDSCHED_SCHEDULER_TICK_MS") {
            self.scheduler.tick_ms = v;
        }
        if let Some(v) = env_parsed("DDSCHED_MONITOR_ENABLED") {
            self.monitor.enabled = v;
        }
        if let Some(v) = env_parsed("DDSCHED_MONITOR_POLL_INTERVAL_TICKS") {
            self.monitor.poll_interval_ticks = v;
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check priority ordering and numeric ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.priorities.validate()?;

        if self.scheduler.retention == 0 {
            return Err(CoreError::Config(
                "scheduler.retention must be at least 1".into(),
            ));
        }
        if self.scheduler.command_queue_depth == 0 {
            return Err(CoreError::Config(
                "scheduler.command_queue_depth must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(CoreError::Config("scheduler.tick_ms must be non-zero".into()));
        }
        if self.monitor.poll_interval_ticks == 0 {
            return Err(CoreError::Config(
                "monitor.poll_interval_ticks must be non-zero".into(),
            ));
        }

        for generator in &self.generators {
            if generator.period_ticks == 0 {
                return Err(CoreError::Config(format!(
                    "generator '{}' has a zero period",
                    generator.name
                )));
            }
            if generator.relative_deadline() == 0 {
                return Err(CoreError::Config(format!(
                    "generator '{}' has a zero relative deadline",
                    generator.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            priorities: PriorityConfig::default(),
            scheduler: SchedulerSection::default(),
            monitor: MonitorConfig::default(),
            generators: default_generators(),
        }
    }
}

// ── Priorities ────────────────────────────────────────────────

/// Executor priority layout.
///
/// New units are parked at `minimum` until the coordinator places them.
/// Deadline tasks occupy `minimum + 1 ..= execution_base`, with the
/// earliest deadline at `execution_base`. Generators, the monitor and the
/// coordinator run above the band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_minimum")]
    pub minimum: Priority,
    #[serde(default = "default_execution_base")]
    pub execution_base: Priority,
    #[serde(default = "default_generator")]
    pub generator: Priority,
    #[serde(default = "default_monitor")]
    pub monitor: Priority,
    #[serde(default = "default_coordinator")]
    pub coordinator: Priority,
}

fn default_minimum() -> Priority {
    Priority(1)
}

fn default_execution_base() -> Priority {
    Priority(20)
}

fn default_generator() -> Priority {
    Priority(21)
}

fn default_monitor() -> Priority {
    Priority(22)
}

fn default_coordinator() -> Priority {
    Priority(23)
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            minimum: default_minimum(),
            execution_base: default_execution_base(),
            generator: default_generator(),
            monitor: default_monitor(),
            coordinator: default_coordinator(),
        }
    }
}

impl PriorityConfig {
    pub fn band(&self) -> PriorityBand {
        PriorityBand::new(self.execution_base, Priority(self.minimum.0 + 1))
    }

    fn validate(&self) -> Result<(), CoreError> {
        let ordered = self.minimum < self.execution_base
            && self.execution_base < self.generator
            && self.generator < self.coordinator
            && self.execution_base < self.monitor
            && self.monitor < self.coordinator;
        if !ordered {
            return Err(CoreError::Config(format!(
                "priorities must satisfy minimum < execution_base < generator < coordinator \
                 and execution_base < monitor < coordinator (got minimum={}, execution_base={}, \
                 generator={}, monitor={}, coordinator={})",
                self.minimum, self.execution_base, self.generator, self.monitor, self.coordinator
            )));
        }
        Ok(())
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Maximum number of overdue records kept for reporting.
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Capacity of the coordinator's command inbox.
    #[serde(default = "default_queue_depth")]
    pub command_queue_depth: usize,
    /// Length of one executor tick in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_retention() -> usize {
    4
}

fn default_queue_depth() -> usize {
    32
}

fn default_tick_ms() -> u64 {
    1
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            command_queue_depth: default_queue_depth(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl SchedulerSection {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

// ── Monitor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ticks: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ticks: u64,
}

fn default_true() -> bool {
    true
}

fn default_startup_delay() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_ticks: default_startup_delay(),
            poll_interval_ticks: default_poll_interval(),
        }
    }
}

// ── Generators ────────────────────────────────────────────────

/// One producer that releases deadline tasks at a fixed period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub name: String,
    #[serde(default)]
    pub kind: TaskKind,
    pub period_ticks: u64,
    /// Deadline relative to release; defaults to the period.
    #[serde(default)]
    pub relative_deadline_ticks: Option<u64>,
    /// Simulated work per release.
    pub execution_ticks: u64,
    /// Stop after this many releases (unbounded when absent).
    #[serde(default)]
    pub count: Option<u32>,
    /// Delay before the first release.
    #[serde(default)]
    pub offset_ticks: u64,
}

impl GeneratorConfig {
    pub fn relative_deadline(&self) -> u64 {
        self.relative_deadline_ticks.unwrap_or(self.period_ticks)
    }
}

fn default_generators() -> Vec<GeneratorConfig> {
    [(1, 95, 500), (2, 150, 500), (3, 250, 750)]
        .into_iter()
        .map(|(n, execution_ticks, period_ticks)| GeneratorConfig {
            name: format!("Task Generator {n}"),
            kind: TaskKind::Periodic,
            period_ticks,
            relative_deadline_ticks: None,
            execution_ticks,
            count: None,
            offset_ticks: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg = SchedulerConfig::from_toml("").unwrap();
        assert_eq!(cfg.scheduler.retention, 4);
        assert_eq!(cfg.priorities.execution_base, Priority(20));
        assert_eq!(cfg.band().capacity(), 19);
        assert_eq!(cfg.generators.len(), 3);
        assert_eq!(cfg.generators[2].period_ticks, 750);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[priorities]
minimum = 1
execution_base = 5
generator = 6
monitor = 7
coordinator = 8

[scheduler]
retention = 2
tick_ms = 10

[monitor]
enabled = false

[[generators]]
name = "sporadic"
kind = "aperiodic"
period_ticks = 1000
relative_deadline_ticks = 300
execution_ticks = 50
count = 3
"#;
        let cfg = SchedulerConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.band().capacity(), 4);
        assert_eq!(cfg.scheduler.retention, 2);
        assert_eq!(cfg.ticks(3), Duration::from_millis(30));
        assert!(!cfg.monitor.enabled);
        assert_eq!(cfg.generators.len(), 1);
        assert_eq!(cfg.generators[0].kind, TaskKind::Aperiodic);
        assert_eq!(cfg.generators[0].relative_deadline(), 300);
        assert_eq!(cfg.generators[0].count, Some(3));
    }

    #[test]
    fn relative_deadline_defaults_to_period() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.generators[0].relative_deadline(), 500);
    }

    #[test]
    fn reject_band_above_generators() {
        let toml = r#"
[priorities]
execution_base = 30
"#;
        let err = SchedulerConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("execution_base"));
    }

    #[test]
    fn reject_zero_retention() {
        let mut cfg = SchedulerConfig::default();
        cfg.scheduler.retention = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reject_zero_period_generator() {
        let toml = r#"
[[generators]]
name = "broken"
period_ticks = 0
execution_ticks = 1
"#;
        let err = SchedulerConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn env_override_poll_interval() {
        std::env::set_var("DDSCHED_MONITOR_POLL_INTERVAL_TICKS", "250");
        let cfg = SchedulerConfig::from_toml("").unwrap();
        std::env::remove_var("DDSCHED_MONITOR_POLL_INTERVAL_TICKS");
        assert_eq!(cfg.monitor.poll_interval_ticks, 250);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = SchedulerConfig::from_toml("[scheduler\nretention = ").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }
}
