//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Typed probe declarations."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use r_chaos_common::config::{ProbeConfig, RunPropertiesConfig};
use serde::Serialize;
use url::Url;

use super::comparator::{Comparator, ComparatorKind};
use super::retry::RetryPolicy;
use crate::error::ChaosError;
use crate::model::{ChaosPhase, ResourceState, TargetId};

/// When a probe is evaluated relative to the chaos window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProbeMode {
    /// Once, before injection.
    #[serde(rename = "SOT")]
    Sot,
    /// Once, after the final revert.
    #[serde(rename = "EOT")]
    Eot,
    /// Once before and once after.
    Edge,
    /// Repeatedly from registration until the chaos window closes or it fails.
    Continuous,
    /// Repeatedly for the chaos duration, starting at the first settled injection.
    OnChaos,
}

impl ProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Sot => "SOT",
            ProbeMode::Eot => "EOT",
            ProbeMode::Edge => "Edge",
            ProbeMode::Continuous => "Continuous",
            ProbeMode::OnChaos => "OnChaos",
        }
    }

    /// Phase whose evaluation first touches probes of this mode.
    pub fn first_phase(&self) -> ChaosPhase {
        match self {
            ProbeMode::Sot | ProbeMode::Edge | ProbeMode::Continuous => ChaosPhase::PreChaos,
            ProbeMode::OnChaos => ChaosPhase::ChaosInject,
            ProbeMode::Eot => ChaosPhase::PostChaos,
        }
    }

    pub fn runs_pre_chaos(&self) -> bool {
        matches!(self, ProbeMode::Sot | ProbeMode::Edge)
    }

    pub fn runs_post_chaos(&self) -> bool {
        matches!(self, ProbeMode::Eot | ProbeMode::Edge)
    }

    pub fn runs_during_chaos(&self) -> bool {
        matches!(self, ProbeMode::Continuous | ProbeMode::OnChaos)
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProbeMode {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sot" => Ok(ProbeMode::Sot),
            "eot" => Ok(ProbeMode::Eot),
            "edge" => Ok(ProbeMode::Edge),
            "continuous" => Ok(ProbeMode::Continuous),
            "onchaos" => Ok(ProbeMode::OnChaos),
            other => Err(ChaosError::Config(format!("probe mode '{}' is not supported", other))),
        }
    }
}

/// Retry, timing and stop behaviour of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunProperties {
    pub attempts: u32,
    pub timeout: Duration,
    /// Wait between failed attempts.
    pub interval: Duration,
    /// Wait between evaluations of Continuous/OnChaos probes.
    pub polling_interval: Duration,
    pub initial_delay: Duration,
    pub stop_on_failure: bool,
}

impl Default for RunProperties {
    fn default() -> Self {
        Self {
            attempts: 1,
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(2),
            polling_interval: Duration::from_secs(2),
            initial_delay: Duration::ZERO,
            stop_on_failure: false,
        }
    }
}

impl RunProperties {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_polling_interval(mut self, polling: Duration) -> Self {
        self.polling_interval = polling;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, self.timeout, self.interval)
    }
}

impl From<&RunPropertiesConfig> for RunProperties {
    fn from(config: &RunPropertiesConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            timeout: config.probe_timeout,
            interval: config.interval,
            polling_interval: config.polling_interval,
            initial_delay: config.initial_delay,
            stop_on_failure: config.stop_on_failure,
        }
    }
}

/// HTTP request method with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HttpMethod {
    Get,
    Post {
        body: Option<String>,
        body_path: Option<PathBuf>,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpProbe {
    pub url: Url,
    pub method: HttpMethod,
    /// Compared against the response status code.
    pub status: Comparator,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmdProbe {
    /// Run through `sh -c`.
    pub command: String,
    /// Compared against trimmed stdout.
    pub comparator: Comparator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateProbe {
    pub target: TargetId,
    pub expected: ResourceState,
}

/// What a probe checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProbeKind {
    Http(HttpProbe),
    Cmd(CmdProbe),
    State(StateProbe),
}

impl ProbeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::Http(_) => "httpProbe",
            ProbeKind::Cmd(_) => "cmdProbe",
            ProbeKind::State(_) => "stateProbe",
        }
    }
}

/// Immutable declaration of one health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeDescriptor {
    pub name: String,
    pub kind: ProbeKind,
    pub mode: ProbeMode,
    pub run: RunProperties,
}

impl ProbeDescriptor {
    /// HTTP GET probe expecting an exact status code.
    pub fn http_get(
        name: impl Into<String>,
        mode: ProbeMode,
        url: &str,
        expected_status: i64,
    ) -> Result<Self, ChaosError> {
        let url = Url::parse(url)
            .map_err(|err| ChaosError::Config(format!("invalid probe url '{}': {}", url, err)))?;
        Ok(Self {
            name: name.into(),
            kind: ProbeKind::Http(HttpProbe {
                url,
                method: HttpMethod::Get,
                status: Comparator::int_equal(expected_status),
                insecure_skip_verify: false,
            }),
            mode,
            run: RunProperties::default(),
        })
    }

    pub fn cmd(
        name: impl Into<String>,
        mode: ProbeMode,
        command: impl Into<String>,
        comparator: Comparator,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::Cmd(CmdProbe {
                command: command.into(),
                comparator,
            }),
            mode,
            run: RunProperties::default(),
        }
    }

    pub fn state(
        name: impl Into<String>,
        mode: ProbeMode,
        target: TargetId,
        expected: ResourceState,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::State(StateProbe { target, expected }),
            mode,
            run: RunProperties::default(),
        }
    }

    pub fn with_run(mut self, run: RunProperties) -> Self {
        self.run = run;
        self
    }

    /// Comparison applied to the transport outcome.
    pub fn comparator(&self) -> Comparator {
        match &self.kind {
            ProbeKind::Http(http) => http.status.clone(),
            ProbeKind::Cmd(cmd) => cmd.comparator.clone(),
            ProbeKind::State(state) => Comparator::string_equal(state.expected.as_str()),
        }
    }
}

impl TryFrom<&ProbeConfig> for ProbeDescriptor {
    type Error = ChaosError;

    fn try_from(config: &ProbeConfig) -> Result<Self, Self::Error> {
        let mode: ProbeMode = config.mode.parse()?;
        let missing = |section: &str| {
            ChaosError::Config(format!(
                "probe '{}' is missing its [{}] inputs",
                config.name, section
            ))
        };
        let kind = match config.kind.to_lowercase().as_str() {
            "http" | "httpprobe" => {
                let http = config.http.as_ref().ok_or_else(|| missing("http"))?;
                let url = Url::parse(&http.url).map_err(|err| {
                    ChaosError::Config(format!("probe '{}' has invalid url: {}", config.name, err))
                })?;
                let method = match http.method.to_lowercase().as_str() {
                    "get" => HttpMethod::Get,
                    "post" => {
                        if http.body.is_some() && http.body_path.is_some() {
                            return Err(ChaosError::Config(format!(
                                "probe '{}' sets both body and body_path",
                                config.name
                            )));
                        }
                        HttpMethod::Post {
                            body: http.body.clone(),
                            body_path: http.body_path.clone(),
                            content_type: http.content_type.clone(),
                        }
                    }
                    other => {
                        return Err(ChaosError::Config(format!(
                            "probe '{}' uses unsupported method '{}'",
                            config.name, other
                        )))
                    }
                };
                ProbeKind::Http(HttpProbe {
                    url,
                    method,
                    status: Comparator::new(ComparatorKind::Int, &http.criteria, &http.response_code)?,
                    insecure_skip_verify: http.insecure_skip_verify,
                })
            }
            "cmd" | "cmdprobe" => {
                let cmd = config.cmd.as_ref().ok_or_else(|| missing("cmd"))?;
                let kind: ComparatorKind = cmd.comparator.kind.parse()?;
                ProbeKind::Cmd(CmdProbe {
                    command: cmd.command.clone(),
                    comparator: Comparator::new(kind, &cmd.comparator.criteria, &cmd.comparator.value)?,
                })
            }
            "state" | "stateprobe" => {
                let state = config.state.as_ref().ok_or_else(|| missing("state"))?;
                ProbeKind::State(StateProbe {
                    target: state.target.parse().map_err(ChaosError::Config)?,
                    expected: state.expected.parse().map_err(ChaosError::Config)?,
                })
            }
            other => {
                return Err(ChaosError::Config(format!(
                    "probe '{}' has unsupported type '{}'",
                    config.name, other
                )))
            }
        };
        Ok(Self {
            name: config.name.clone(),
            kind,
            mode,
            run: RunProperties::from(&config.run),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_chaos_common::AppConfig;

    #[test]
    fn converts_configured_probes() {
        let config: AppConfig = r#"
            [experiment]
            name = "probes"

            [[probes]]
            name = "frontend"
            type = "httpProbe"
            mode = "Edge"
            [probes.run]
            attempts = 3
            stop_on_failure = true
            [probes.http]
            url = "http://127.0.0.1:9/health"
            method = "post"
            body = "{}"
            content_type = "application/json"
            criteria = "oneOf"
            response_code = "[200,201]"

            [[probes]]
            name = "cart-state"
            type = "state"
            mode = "OnChaos"
            [probes.state]
            target = "shop/cart-0"
            expected = "faulted"
        "#
        .parse()
        .unwrap();

        let http = ProbeDescriptor::try_from(&config.probes[0]).unwrap();
        assert_eq!(http.mode, ProbeMode::Edge);
        assert_eq!(http.run.attempts, 3);
        assert!(http.run.stop_on_failure);
        assert!(http.comparator().compare("201").is_ok());
        assert!(matches!(
            http.kind,
            ProbeKind::Http(HttpProbe {
                method: HttpMethod::Post { .. },
                ..
            })
        ));

        let state = ProbeDescriptor::try_from(&config.probes[1]).unwrap();
        assert_eq!(state.mode.first_phase(), ChaosPhase::ChaosInject);
        assert!(state.comparator().compare("faulted").is_ok());
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!("Sometimes".parse::<ProbeMode>().is_err());
        assert_eq!("onchaos".parse::<ProbeMode>().unwrap(), ProbeMode::OnChaos);
    }
}
