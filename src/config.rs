use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::probe::{ProbeClass, ProbeKind};
use crate::table::MergeMode;

/// Largest accepted table or pairing capacity.
pub const MAX_CAPACITY: usize = 1 << 20;

/// Largest accepted staleness ceiling.
pub const MAX_CEILING: Duration = Duration::from_secs(300);

/// Top-level configuration for the probestat engine.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How maximum and minimum fields are merged. Default: relaxed.
    #[serde(default)]
    pub merge_mode: MergeMode,

    /// Per-probe overrides keyed by probe name. Probes not listed run with
    /// their defaults.
    #[serde(default)]
    pub probes: HashMap<String, ProbeConfig>,

    /// Periodic table reader configuration.
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Overrides for a single probe.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Wire the probe into the engine. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Accumulation table capacity.
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Pairing table capacity. Watchdog probes only.
    #[serde(default)]
    pub pairing_capacity: Option<usize>,

    /// Begin-to-end durations above this are discarded. Watchdog probes only.
    #[serde(default, with = "humantime_serde")]
    pub staleness_ceiling: Option<Duration>,
}

/// Periodic table reader configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Time between table reads. Default: 1s.
    #[serde(default = "default_reader_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Number of busiest keys logged per table. Default: 10.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Prometheus metric namespace. Default: "probestat".
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
}

/// Effective settings of one probe after defaults and overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub kind: ProbeKind,
    pub enabled: bool,
    pub capacity: usize,
    /// `None` for sentinel probes.
    pub pairing_capacity: Option<usize>,
    /// `None` for sentinel probes.
    pub staleness_ceiling: Option<Duration>,
}

// --- Default value functions for serde ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reader_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_top_n() -> usize {
    10
}

fn default_metrics_namespace() -> String {
    "probestat".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            merge_mode: MergeMode::default(),
            probes: HashMap::new(),
            reader: ReaderConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: None,
            pairing_capacity: None,
            staleness_ceiling: None,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            interval: default_reader_interval(),
            top_n: default_top_n(),
            metrics_namespace: default_metrics_namespace(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for known probe names and sane limits.
    pub fn validate(&self) -> Result<()> {
        for (name, probe) in &self.probes {
            let Some(kind) = ProbeKind::from_name(name) else {
                bail!("unknown probe in probes: {name}");
            };

            if let Some(capacity) = probe.capacity {
                validate_capacity(&format!("probes.{name}.capacity"), capacity)?;
            }

            let watchdog = kind.class() == ProbeClass::Watchdog;

            if let Some(capacity) = probe.pairing_capacity {
                if !watchdog {
                    bail!("probes.{name}.pairing_capacity is only valid for pairing probes");
                }
                validate_capacity(&format!("probes.{name}.pairing_capacity"), capacity)?;
            }

            if let Some(ceiling) = probe.staleness_ceiling {
                if !watchdog {
                    bail!("probes.{name}.staleness_ceiling is only valid for pairing probes");
                }
                if ceiling.is_zero() {
                    bail!("probes.{name}.staleness_ceiling must be positive");
                }
                if ceiling > MAX_CEILING {
                    bail!(
                        "probes.{name}.staleness_ceiling must be at most {}s, got {:?}",
                        MAX_CEILING.as_secs(),
                        ceiling,
                    );
                }
            }
        }

        if self.reader.interval.is_zero() {
            bail!("reader.interval must be positive");
        }

        if self.reader.top_n == 0 {
            bail!("reader.top_n must be positive");
        }

        if self.reader.metrics_namespace.is_empty() {
            bail!("reader.metrics_namespace is required");
        }

        Ok(())
    }

    /// Effective settings of `kind`.
    pub fn probe(&self, kind: ProbeKind) -> ProbeSettings {
        let overrides = self.probes.get(kind.as_str());
        let enabled = overrides.map_or(true, |p| p.enabled);
        let capacity = overrides
            .and_then(|p| p.capacity)
            .unwrap_or_else(|| kind.default_capacity());
        let pairing_capacity = kind
            .default_pairing_capacity()
            .map(|default| overrides.and_then(|p| p.pairing_capacity).unwrap_or(default));
        let staleness_ceiling = kind
            .default_ceiling()
            .map(|default| overrides.and_then(|p| p.staleness_ceiling).unwrap_or(default));

        ProbeSettings {
            kind,
            enabled,
            capacity,
            pairing_capacity,
            staleness_ceiling,
        }
    }
}

fn validate_capacity(key: &str, capacity: usize) -> Result<()> {
    if capacity == 0 {
        bail!("{key} must be positive");
    }
    if capacity > MAX_CAPACITY {
        bail!("{key} must be at most {MAX_CAPACITY}, got {capacity}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load_str(yaml: &str) -> Result<Config> {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(yaml.as_bytes()).expect("write config");
        Config::load(file.path())
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.merge_mode, MergeMode::Relaxed);
        assert_eq!(cfg.reader.interval, Duration::from_secs(1));
        assert_eq!(cfg.reader.top_n, 10);
        assert_eq!(cfg.reader.metrics_namespace, "probestat");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = load_str("{}").expect("empty config is valid");
        assert!(cfg.probes.is_empty());
        assert!(cfg.probe(ProbeKind::SockIo).enabled);
    }

    #[test]
    fn test_load_overrides() {
        let cfg = load_str(
            r#"
log_level: debug
merge_mode: strict
probes:
  runqlat:
    capacity: 2048
    pairing_capacity: 4096
    staleness_ceiling: 2s
  execsnoop:
    enabled: false
reader:
  interval: 250ms
  top_n: 3
"#,
        )
        .expect("valid config");

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.merge_mode, MergeMode::Strict);
        assert_eq!(cfg.reader.interval, Duration::from_millis(250));
        assert_eq!(cfg.reader.top_n, 3);

        let runqlat = cfg.probe(ProbeKind::RunqLat);
        assert!(runqlat.enabled);
        assert_eq!(runqlat.capacity, 2048);
        assert_eq!(runqlat.pairing_capacity, Some(4096));
        assert_eq!(runqlat.staleness_ceiling, Some(Duration::from_secs(2)));

        assert!(!cfg.probe(ProbeKind::ExecSnoop).enabled);
    }

    #[test]
    fn test_probe_defaults() {
        let cfg = Config::default();

        let pgfault = cfg.probe(ProbeKind::PgFault);
        assert_eq!(pgfault.capacity, 10_240);
        assert_eq!(pgfault.pairing_capacity, Some(10_240));
        assert_eq!(pgfault.staleness_ceiling, Some(Duration::from_secs(5)));

        let kfreeskb = cfg.probe(ProbeKind::KfreeSkb);
        assert_eq!(kfreeskb.capacity, 256);
        assert_eq!(kfreeskb.pairing_capacity, None);
        assert_eq!(kfreeskb.staleness_ceiling, None);

        assert_eq!(cfg.probe(ProbeKind::SyscallDissect).capacity, 32_768);
    }

    #[test]
    fn test_rejects_unknown_probe() {
        let err = load_str("probes:\n  bogus: {}\n").unwrap_err();
        assert!(format!("{err:#}").contains("unknown probe in probes: bogus"));
    }

    #[test]
    fn test_rejects_capacity_limits() {
        let mut cfg = Config::default();
        cfg.probes.insert(
            "offcpu".to_string(),
            ProbeConfig {
                capacity: Some(0),
                ..Default::default()
            },
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("probes.offcpu.capacity must be positive"), "{err}");

        cfg.probes.insert(
            "offcpu".to_string(),
            ProbeConfig {
                pairing_capacity: Some(MAX_CAPACITY + 1),
                ..Default::default()
            },
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("probes.offcpu.pairing_capacity"), "{err}");
    }

    #[test]
    fn test_rejects_ceiling_limits() {
        let mut cfg = Config::default();
        cfg.probes.insert(
            "lockwait".to_string(),
            ProbeConfig {
                staleness_ceiling: Some(Duration::from_secs(301)),
                ..Default::default()
            },
        );
        assert!(cfg.validate().is_err());

        cfg.probes.insert(
            "lockwait".to_string(),
            ProbeConfig {
                staleness_ceiling: Some(Duration::ZERO),
                ..Default::default()
            },
        );
        assert!(cfg.validate().is_err());

        cfg.probes.insert(
            "lockwait".to_string(),
            ProbeConfig {
                staleness_ceiling: Some(Duration::from_secs(300)),
                ..Default::default()
            },
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_pairing_settings_on_counting_probe() {
        let mut cfg = Config::default();
        cfg.probes.insert(
            "tcprtt".to_string(),
            ProbeConfig {
                staleness_ceiling: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("only valid for pairing probes"), "{err}");
    }

    #[test]
    fn test_rejects_reader_limits() {
        let mut cfg = Config::default();
        cfg.reader.interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.reader.top_n = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_merge_mode() {
        assert!(load_str("merge_mode: eventual\n").is_err());
    }
}
