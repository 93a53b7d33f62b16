use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ProfilerConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Try to open perf_event counters before falling back to cycle estimates.
    #[serde(default = "defaults::enabled")]
    pub hw_counters: bool,
    /// Run latency calibration during init.
    #[serde(default = "defaults::enabled")]
    pub calibrate: bool,
    #[serde(default)]
    pub report_format: ReportFormat,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Scratch buffer size and pointer-chase hop count for each memory tier.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CalibrationConfig {
    #[serde(default = "defaults::l1")]
    pub l1: TierProbe,
    #[serde(default = "defaults::l2")]
    pub l2: TierProbe,
    #[serde(default = "defaults::l3")]
    pub l3: TierProbe,
    #[serde(default = "defaults::dram")]
    pub dram: TierProbe,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierProbe {
    pub bytes: usize,
    pub hops: u64,
}

impl TierProbe {
    pub const fn new(bytes: usize, hops: u64) -> Self {
        Self { bytes, hops }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    use super::TierProbe;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn l1() -> TierProbe {
        TierProbe::new(16 * 1024, 10_000)
    }

    pub fn l2() -> TierProbe {
        TierProbe::new(512 * 1024, 5_000)
    }

    pub fn l3() -> TierProbe {
        TierProbe::new(32 * 1024 * 1024, 2_000)
    }

    pub fn dram() -> TierProbe {
        TierProbe::new(128 * 1024 * 1024, 1_000)
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            l1: defaults::l1(),
            l2: defaults::l2(),
            l3: defaults::l3(),
            dram: defaults::dram(),
        }
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            hw_counters: defaults::enabled(),
            calibrate: defaults::enabled(),
            report_format: ReportFormat::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl ProfilerConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ProfilerConfig = toml::from_str(toml_str)?;
        Ok(config)
    }
}
