//! ---
//! chaos_section: "01-core-functionality"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Shared configuration and logging primitives."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

fn default_target_kind() -> String {
    "pod".to_owned()
}

fn default_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_status_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_abort_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_affected_percentage() -> PercentageTunable {
    PercentageTunable::Fixed(0)
}

fn default_shell() -> String {
    "/bin/sh".to_owned()
}

fn default_faulted_output() -> String {
    "faulted".to_owned()
}

fn default_nominal_output() -> String {
    "nominal".to_owned()
}

fn default_attempts() -> u32 {
    1
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_http_method() -> String {
    "get".to_owned()
}

fn default_http_criteria() -> String {
    "==".to_owned()
}

fn default_response_code() -> String {
    "200".to_owned()
}

fn default_comparator_type() -> String {
    "string".to_owned()
}

fn default_expected_state() -> String {
    "nominal".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for a chaos run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_CHAOS_CONFIG";

    /// Load configuration from disk, respecting the `R_CHAOS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.experiment.validate()?;
        let mut names = HashSet::new();
        for probe in &self.probes {
            probe.validate()?;
            if !names.insert(probe.name.as_str()) {
                return Err(anyhow!("probe '{}' is declared more than once", probe.name));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Experiment tunables as written by the operator.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default = "default_target_kind")]
    pub target_kind: String,
    #[serde(default)]
    pub candidates: Vec<String>,
    #[serde(default = "default_duration")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub duration: Duration,
    #[serde(default = "default_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub interval: Duration,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub interval_max: Option<Duration>,
    #[serde(default)]
    pub randomness: bool,
    #[serde(default)]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub ramp_time: Duration,
    #[serde(default)]
    pub sequence: SequenceSetting,
    #[serde(
        default = "default_affected_percentage",
        deserialize_with = "deserialize_percentage"
    )]
    pub affected_percentage: PercentageTunable,
    #[serde(default)]
    pub randomize_order: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_status_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub status_timeout: Duration,
    #[serde(default = "default_status_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub status_delay: Duration,
    #[serde(default = "default_abort_grace")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub abort_grace: Duration,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("experiment name cannot be empty"));
        }
        if self.status_delay.is_zero() {
            return Err(anyhow!(
                "experiment '{}' must use a non-zero status_delay",
                self.name
            ));
        }
        if let Some(max) = self.interval_max {
            if max < self.interval {
                return Err(anyhow!(
                    "experiment '{}' interval_max ({:?}) is below interval ({:?})",
                    self.name,
                    max,
                    self.interval
                ));
            }
        }
        if let PercentageTunable::Range { low, high } = self.affected_percentage {
            if low > high {
                return Err(anyhow!(
                    "experiment '{}' affected_percentage range {}-{} is inverted",
                    self.name,
                    low,
                    high
                ));
            }
        }
        Ok(())
    }
}

/// Execution order requested for the target set.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SequenceSetting {
    Serial,
    #[default]
    Parallel,
    Random,
}

impl std::str::FromStr for SequenceSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" => Ok(SequenceSetting::Serial),
            "parallel" => Ok(SequenceSetting::Parallel),
            "random" => Ok(SequenceSetting::Random),
            other => Err(format!("'{}' sequence is not supported", other)),
        }
    }
}

/// Affected percentage given either as a single value or an inclusive `low-high` range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PercentageTunable {
    Fixed(u32),
    Range { low: u32, high: u32 },
}

impl std::str::FromStr for PercentageTunable {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(PercentageTunable::Fixed(0));
        }
        let parse = |raw: &str| {
            raw.trim()
                .parse::<u32>()
                .map_err(|err| format!("invalid percentage '{}': {}", raw.trim(), err))
        };
        match trimmed.split_once('-') {
            Some((low, high)) => Ok(PercentageTunable::Range {
                low: parse(low)?,
                high: parse(high)?,
            }),
            None => Ok(PercentageTunable::Fixed(parse(trimmed)?)),
        }
    }
}

impl fmt::Display for PercentageTunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PercentageTunable::Fixed(value) => write!(f, "{}", value),
            PercentageTunable::Range { low, high } => write!(f, "{}-{}", low, high),
        }
    }
}

fn deserialize_percentage<'de, D>(deserializer: D) -> Result<PercentageTunable, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = PercentageTunable;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("integer percentage or \"low-high\" range string")
        }

        fn visit_str<E>(self, value: &str) -> Result<PercentageTunable, E>
        where
            E: serde::de::Error,
        {
            value.parse().map_err(E::custom)
        }

        fn visit_u64<E>(self, value: u64) -> Result<PercentageTunable, E>
        where
            E: serde::de::Error,
        {
            u32::try_from(value)
                .map(PercentageTunable::Fixed)
                .map_err(E::custom)
        }

        fn visit_i64<E>(self, value: i64) -> Result<PercentageTunable, E>
        where
            E: serde::de::Error,
        {
            u32::try_from(value.max(0))
                .map(PercentageTunable::Fixed)
                .map_err(E::custom)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Shell commands backing the command-driven platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub inject: Option<String>,
    #[serde(default)]
    pub revert: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default = "default_faulted_output")]
    pub faulted_output: String,
    #[serde(default = "default_nominal_output")]
    pub nominal_output: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            inject: None,
            revert: None,
            state: None,
            faulted_output: default_faulted_output(),
            nominal_output: default_nominal_output(),
        }
    }
}

/// Raw probe declaration. Strings are validated into typed descriptors by the core crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    #[serde(default)]
    pub run: RunPropertiesConfig,
    #[serde(default)]
    pub http: Option<HttpProbeConfig>,
    #[serde(default)]
    pub cmd: Option<CmdProbeConfig>,
    #[serde(default)]
    pub state: Option<StateProbeConfig>,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("probe name cannot be empty"));
        }
        let inputs_present = match self.kind.to_lowercase().as_str() {
            "http" | "httpprobe" => self.http.is_some(),
            "cmd" | "cmdprobe" => self.cmd.is_some(),
            "state" | "stateprobe" => self.state.is_some(),
            other => {
                return Err(anyhow!(
                    "probe '{}' has unsupported type '{}'",
                    self.name,
                    other
                ))
            }
        };
        if !inputs_present {
            return Err(anyhow!(
                "probe '{}' of type '{}' is missing its [{}] inputs",
                self.name,
                self.kind,
                self.kind.to_lowercase()
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPropertiesConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub probe_timeout: Duration,
    #[serde(default = "default_probe_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub interval: Duration,
    #[serde(default = "default_probe_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub polling_interval: Duration,
    #[serde(default)]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub initial_delay: Duration,
    #[serde(default)]
    pub stop_on_failure: bool,
}

impl Default for RunPropertiesConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            probe_timeout: default_probe_timeout(),
            interval: default_probe_interval(),
            polling_interval: default_probe_interval(),
            initial_delay: Duration::ZERO,
            stop_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProbeConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default = "default_http_criteria")]
    pub criteria: String,
    #[serde(default = "default_response_code")]
    pub response_code: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_path: Option<PathBuf>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdProbeConfig {
    pub command: String,
    pub comparator: ComparatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparatorConfig {
    #[serde(rename = "type", default = "default_comparator_type")]
    pub kind: String,
    pub criteria: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateProbeConfig {
    pub target: String,
    #[serde(default = "default_expected_state")]
    pub expected: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
