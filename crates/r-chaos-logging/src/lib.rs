//! ---
//! chaos_section: "03-observability"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Structured logging adapters and sinks."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-carrying log helpers shared by the coordinator components.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Experiment name associated with the log event.
    pub experiment: Option<&'a str>,
    /// Target identifier the event refers to.
    pub target: Option<&'a str>,
    /// Chaos phase label in effect when the event was emitted.
    pub phase: Option<&'a str>,
    /// Probe name, for probe engine events.
    pub probe: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an experiment name.
    pub fn with_experiment(mut self, experiment: &'a str) -> Self {
        self.experiment = Some(experiment);
        self
    }

    /// Attach a target identifier.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a chaos phase label.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach a probe name.
    pub fn with_probe(mut self, probe: &'a str) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            experiment = ctx.experiment.unwrap_or(""),
            target = ctx.target.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            probe = ctx.probe.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            experiment = ctx.experiment.unwrap_or(""),
            target = ctx.target.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            probe = ctx.probe.unwrap_or(""),
            message = %message
        ),
    }
}
