//! Policy configuration.

use crate::policy::{
    CompositePolicy, IntervalTrigger, MemoryThresholdTrigger, PathTrigger, TriggerPolicy,
};
use crate::probe::{MemoryProbe, ProcessMemoryProbe};
use crate::{Error, Result};
use serde::Deserialize;

/// Fallback interval used when a memory policy does not name one.
pub const DEFAULT_FALLBACK_INTERVAL: u32 = 10;

const MIB: u64 = 1024 * 1024;

/// Construction-time description of a [`TriggerPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PolicyConfig {
    /// Reclaim after every request.
    #[default]
    Always,
    /// Reclaim every `interval` requests.
    Interval {
        /// Requests between passes.
        interval: u32,
    },
    /// Reclaim when the path matches `pattern`.
    Path {
        /// Regular expression matched against the request path.
        pattern: String,
    },
    /// Reclaim above `max_bytes` resident memory.
    Memory {
        /// Resident memory limit in bytes.
        max_bytes: u64,
        /// Interval used once the threshold strategy degraded.
        fallback_interval: u32,
    },
    /// Reclaim when any child fires.
    Composite(Vec<PolicyConfig>),
}

impl PolicyConfig {
    /// Builds the policy, probing this process for memory policies.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for zero intervals or invalid patterns.
    pub fn build(&self) -> Result<TriggerPolicy> {
        self.build_with(&mut || Box::new(ProcessMemoryProbe::new()))
    }

    /// Builds the policy, asking `make_probe` for one probe per memory policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for zero intervals or invalid patterns.
    pub fn build_with(
        &self,
        make_probe: &mut dyn FnMut() -> Box<dyn MemoryProbe>,
    ) -> Result<TriggerPolicy> {
        Ok(match self {
            Self::Always => TriggerPolicy::Always,
            Self::Interval { interval } => TriggerPolicy::Interval(IntervalTrigger::new(*interval)?),
            Self::Path { pattern } => TriggerPolicy::Path(PathTrigger::new(pattern)?),
            Self::Memory {
                max_bytes,
                fallback_interval,
            } => TriggerPolicy::MemoryThreshold(MemoryThresholdTrigger::new(
                *max_bytes,
                *fallback_interval,
                make_probe(),
            )?),
            Self::Composite(children) => {
                let policies = children
                    .iter()
                    .map(|child| child.build_with(make_probe))
                    .collect::<Result<Vec<_>>>()?;
                TriggerPolicy::Composite(CompositePolicy::new(policies))
            },
        })
    }
}

/// Policy section in config file.
///
/// ```toml
/// [policy]
/// kind = "composite"
///
/// [[policy.rules]]
/// kind = "path"
/// pattern = "^/reports/"
///
/// [[policy.rules]]
/// kind = "memory"
/// max_memory_mb = 512
/// fallback_interval = 20
/// ```
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePolicy {
    /// Policy kind: "always", "interval", "path", "memory", "composite".
    pub kind: Option<String>,
    /// Interval for `interval`.
    pub interval: Option<u32>,
    /// Pattern for `path`.
    pub pattern: Option<String>,
    /// Limit in bytes for `memory`.
    pub max_bytes: Option<u64>,
    /// Limit in MiB for `memory`.
    pub max_memory_mb: Option<u64>,
    /// Fallback interval for `memory`.
    pub fallback_interval: Option<u32>,
    /// Children for `composite`.
    pub rules: Option<Vec<ConfigFilePolicy>>,
}

fn missing(kind: &str, field: &str) -> Error {
    Error::InvalidInput(format!("policy '{kind}' requires '{field}'"))
}

impl TryFrom<ConfigFilePolicy> for PolicyConfig {
    type Error = Error;

    fn try_from(file: ConfigFilePolicy) -> Result<Self> {
        let kind = file
            .kind
            .ok_or_else(|| Error::InvalidInput("policy section requires 'kind'".to_string()))?
            .to_lowercase();

        match kind.as_str() {
            "always" => Ok(Self::Always),
            "interval" => Ok(Self::Interval {
                interval: file.interval.ok_or_else(|| missing(&kind, "interval"))?,
            }),
            "path" => Ok(Self::Path {
                pattern: file.pattern.ok_or_else(|| missing(&kind, "pattern"))?,
            }),
            "memory" => {
                let max_bytes = file
                    .max_bytes
                    .or_else(|| file.max_memory_mb.map(|mb| mb.saturating_mul(MIB)))
                    .ok_or_else(|| missing(&kind, "max_bytes"))?;
                Ok(Self::Memory {
                    max_bytes,
                    fallback_interval: file.fallback_interval.unwrap_or(DEFAULT_FALLBACK_INTERVAL),
                })
            },
            "composite" | "any" => file
                .rules
                .unwrap_or_default()
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Self::Composite),
            other => Err(Error::InvalidInput(format!("unknown policy kind '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ScriptedProbe;

    fn parse(toml_str: &str) -> Result<PolicyConfig> {
        let file: ConfigFilePolicy = toml::from_str(toml_str).expect("valid toml");
        PolicyConfig::try_from(file)
    }

    #[test]
    fn test_parse_composite() {
        let config = parse(
            r#"
            kind = "composite"
            [[rules]]
            kind = "path"
            pattern = "^/expensive/"
            [[rules]]
            kind = "memory"
            max_memory_mb = 100
            "#,
        )
        .expect("valid policy");

        assert_eq!(
            config,
            PolicyConfig::Composite(vec![
                PolicyConfig::Path {
                    pattern: "^/expensive/".to_string()
                },
                PolicyConfig::Memory {
                    max_bytes: 100 * MIB,
                    fallback_interval: DEFAULT_FALLBACK_INTERVAL,
                },
            ])
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(parse(r#"kind = "interval""#).is_err());
        assert!(parse(r#"kind = "path""#).is_err());
        assert!(parse(r#"kind = "memory""#).is_err());
        assert!(parse(r#"kind = "sometimes""#).is_err());
        assert!(parse("interval = 3").is_err());
    }

    #[test]
    fn test_build_validates() {
        assert!(PolicyConfig::Interval { interval: 0 }.build().is_err());
        assert!(
            PolicyConfig::Path {
                pattern: "(".to_string()
            }
            .build()
            .is_err()
        );
        let nested = PolicyConfig::Composite(vec![PolicyConfig::Interval { interval: 0 }]);
        assert!(nested.build().is_err());
    }

    #[test]
    fn test_build_with_probe_factory() {
        let config = PolicyConfig::Composite(vec![
            PolicyConfig::Memory {
                max_bytes: 10,
                fallback_interval: 2,
            },
            PolicyConfig::Always,
        ]);
        let mut probes = 0;
        let policy = config
            .build_with(&mut || {
                probes += 1;
                Box::new(ScriptedProbe::constant(5))
            })
            .expect("valid policy");

        assert_eq!(probes, 1);
        assert_eq!(policy.describe(), "any[memory(max=10, fallback=2), always]");
    }
}
