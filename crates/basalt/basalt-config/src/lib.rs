mod config;

pub use config::{CalibrationConfig, ConfigError, ProfilerConfig, ReportFormat, TierProbe};
