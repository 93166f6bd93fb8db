//! Configuration management.
//!
//! Configuration comes from a TOML file, then environment overrides:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `OOBGC_INTERVAL` | interval policy |
//! | `OOBGC_PATH_PATTERN` | path policy |
//! | `OOBGC_MAX_MEMORY` | memory policy limit in bytes |
//! | `OOBGC_FALLBACK_INTERVAL` | fallback interval of the memory policy |
//! | `OOBGC_WORKER_SELECTOR` | instrumented worker (`*` for all), enables instrumentation |
//! | `OOBGC_LOG_DIR` | diagnostic log directory, enables instrumentation |
//! | `OOBGC_IMPLICIT_THRESHOLD` | heap implicit pass threshold in bytes |
//!
//! When several policy variables are set they are combined into a composite
//! in the order path, memory, interval.

mod policy;

pub use policy::{ConfigFilePolicy, DEFAULT_FALLBACK_INTERVAL, PolicyConfig};

use crate::context::WorkerId;
use crate::heap::HeapConfig;
use crate::instrument::{MetricsCollector, WorkerSelector};
use crate::observability::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration for oobgc.
#[derive(Debug, Clone, Default)]
pub struct OobGcConfig {
    /// Trigger policy.
    pub policy: PolicyConfig,
    /// Deferred heap settings.
    pub heap: HeapConfig,
    /// Instrumentation settings.
    pub instrumentation: InstrumentationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Instrumentation configuration.
#[derive(Debug, Clone, Default)]
pub struct InstrumentationConfig {
    /// Whether collectors are created at all.
    pub enabled: bool,
    /// Workers that record samples.
    pub worker_selector: WorkerSelector,
    /// Directory for per-worker diagnostic logs.
    pub log_dir: Option<PathBuf>,
}

impl InstrumentationConfig {
    /// Creates the collector for `worker`, or `None` when disabled.
    #[must_use]
    pub fn collector(&self, worker: WorkerId) -> Option<MetricsCollector> {
        if !self.enabled {
            return None;
        }
        let collector = MetricsCollector::new(&self.worker_selector, worker);
        Some(match &self.log_dir {
            Some(dir) => collector.with_log_dir(dir),
            None => collector,
        })
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Policy section.
    pub policy: Option<ConfigFilePolicy>,
    /// Heap section.
    pub heap: Option<ConfigFileHeap>,
    /// Instrumentation section.
    pub instrumentation: Option<ConfigFileInstrumentation>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Heap section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileHeap {
    /// Implicit pass threshold.
    pub implicit_threshold_bytes: Option<usize>,
    /// Profiler record capacity.
    pub profiler_capacity: Option<usize>,
}

/// Instrumentation section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileInstrumentation {
    /// Enable collectors.
    pub enabled: Option<bool>,
    /// Worker selector.
    pub worker_selector: Option<String>,
    /// Diagnostic log directory.
    pub log_dir: Option<String>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Format: "pretty" or "json".
    pub format: Option<String>,
    /// Filter directives.
    pub filter: Option<String>,
    /// Log file.
    pub file: Option<String>,
}

impl OobGcConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or describes an
    /// invalid policy.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

        Self::parse(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or describes an invalid
    /// policy.
    pub fn parse(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/oobgc/config.toml`.
    /// Returns default configuration if no usable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("oobgc").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("oobgc")
                .join("config.toml"),
        ];

        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `OobGcConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(policy) = file.policy {
            config.policy = PolicyConfig::try_from(policy)?;
        }
        if let Some(heap) = file.heap {
            if let Some(v) = heap.implicit_threshold_bytes {
                config.heap.implicit_threshold_bytes = v;
            }
            if let Some(v) = heap.profiler_capacity {
                config.heap.profiler_capacity = v;
            }
        }
        if let Some(instrumentation) = file.instrumentation {
            if let Some(v) = instrumentation.enabled {
                config.instrumentation.enabled = v;
            }
            if let Some(selector) = instrumentation.worker_selector {
                config.instrumentation.worker_selector = WorkerSelector::parse(&selector);
            }
            config.instrumentation.log_dir = instrumentation.log_dir.map(PathBuf::from);
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
            config.logging.file = logging.file.map(PathBuf::from);
        }

        Ok(config)
    }

    /// Applies `OOBGC_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| -> Option<u64> {
            let value = lookup(key)?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(variable = key, value = %value, "Ignoring non-numeric override");
                    None
                },
            }
        };
        let parsed_u32 = |key: &str| parsed(key).and_then(|v| u32::try_from(v).ok());

        let fallback_interval = parsed_u32("OOBGC_FALLBACK_INTERVAL");
        let mut policies = Vec::new();

        if let Some(pattern) = lookup("OOBGC_PATH_PATTERN") {
            policies.push(PolicyConfig::Path { pattern });
        }
        if let Some(max_bytes) = parsed("OOBGC_MAX_MEMORY") {
            policies.push(PolicyConfig::Memory {
                max_bytes,
                fallback_interval: fallback_interval.unwrap_or(DEFAULT_FALLBACK_INTERVAL),
            });
        } else if let (
            Some(v),
            PolicyConfig::Memory {
                fallback_interval: current,
                ..
            },
        ) = (fallback_interval, &mut self.policy)
        {
            *current = v;
        }
        if let Some(interval) = parsed_u32("OOBGC_INTERVAL") {
            policies.push(PolicyConfig::Interval { interval });
        }

        match policies.len() {
            0 => {},
            1 => self.policy = policies.remove(0),
            _ => self.policy = PolicyConfig::Composite(policies),
        }

        if let Some(selector) = lookup("OOBGC_WORKER_SELECTOR") {
            self.instrumentation.worker_selector = WorkerSelector::parse(&selector);
            self.instrumentation.enabled = true;
        }
        if let Some(dir) = lookup("OOBGC_LOG_DIR") {
            self.instrumentation.log_dir = Some(PathBuf::from(dir));
            self.instrumentation.enabled = true;
        }
        if let Some(threshold) = parsed("OOBGC_IMPLICIT_THRESHOLD") {
            self.heap.implicit_threshold_bytes = usize::try_from(threshold).unwrap_or(usize::MAX);
        }

        self
    }

    /// Sets the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the heap configuration.
    #[must_use]
    pub fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OobGcConfig::new();
        assert_eq!(config.policy, PolicyConfig::Always);
        assert!(!config.instrumentation.enabled);
        assert!(config.instrumentation.collector(WorkerId::new("1")).is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_full_file() {
        let config = OobGcConfig::parse(
            r#"
            [policy]
            kind = "interval"
            interval = 3

            [heap]
            implicit_threshold_bytes = 1024

            [instrumentation]
            enabled = true
            worker_selector = "*"
            log_dir = "log"

            [logging]
            format = "json"
            filter = "oobgc=debug"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.policy, PolicyConfig::Interval { interval: 3 });
        assert_eq!(config.heap.implicit_threshold_bytes, 1024);
        assert_eq!(config.instrumentation.worker_selector, WorkerSelector::All);
        assert_eq!(config.instrumentation.log_dir, Some(PathBuf::from("log")));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter, "oobgc=debug");

        let collector = config
            .instrumentation
            .collector(WorkerId::new("9"))
            .expect("enabled");
        assert!(collector.is_active());
        assert!(collector.sink().is_some());
    }

    #[test]
    fn test_parse_rejects_bad_policy() {
        assert!(OobGcConfig::parse("[policy]\nkind = \"never\"").is_err());
        assert!(OobGcConfig::parse("not toml [").is_err());
    }

    #[test]
    fn test_single_env_policy() {
        let config = OobGcConfig::new().with_overrides_from(env(&[("OOBGC_INTERVAL", "7")]));
        assert_eq!(config.policy, PolicyConfig::Interval { interval: 7 });
    }

    #[test]
    fn test_env_policies_combine() {
        let config = OobGcConfig::new().with_overrides_from(env(&[
            ("OOBGC_INTERVAL", "7"),
            ("OOBGC_PATH_PATTERN", "^/x"),
            ("OOBGC_MAX_MEMORY", "1000"),
            ("OOBGC_FALLBACK_INTERVAL", "4"),
        ]));
        assert_eq!(
            config.policy,
            PolicyConfig::Composite(vec![
                PolicyConfig::Path {
                    pattern: "^/x".to_string()
                },
                PolicyConfig::Memory {
                    max_bytes: 1000,
                    fallback_interval: 4
                },
                PolicyConfig::Interval { interval: 7 },
            ])
        );
    }

    #[test]
    fn test_fallback_override_updates_file_policy() {
        let config = OobGcConfig::new()
            .with_policy(PolicyConfig::Memory {
                max_bytes: 10,
                fallback_interval: 2,
            })
            .with_overrides_from(env(&[("OOBGC_FALLBACK_INTERVAL", "9")]));
        assert_eq!(
            config.policy,
            PolicyConfig::Memory {
                max_bytes: 10,
                fallback_interval: 9
            }
        );
    }

    #[test]
    fn test_env_instrumentation_and_heap() {
        let config = OobGcConfig::new().with_overrides_from(env(&[
            ("OOBGC_WORKER_SELECTOR", "3"),
            ("OOBGC_LOG_DIR", "/var/log/app"),
            ("OOBGC_IMPLICIT_THRESHOLD", "4096"),
            ("OOBGC_INTERVAL", "many"),
        ]));
        assert!(config.instrumentation.enabled);
        assert!(
            config
                .instrumentation
                .worker_selector
                .matches(&WorkerId::new("3"))
        );
        assert_eq!(config.heap.implicit_threshold_bytes, 4096);
        assert_eq!(config.policy, PolicyConfig::Always);
    }
}
