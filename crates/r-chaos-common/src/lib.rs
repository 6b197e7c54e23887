//! ---
//! chaos_section: "01-core-functionality"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Shared configuration and logging primitives."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Shared primitives for the R-Chaos workspace.
//! This crate exposes the on-disk experiment configuration and the tracing
//! bootstrap consumed by the CLI and the coordinator.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ComparatorConfig, CmdProbeConfig, ExperimentConfig, HttpProbeConfig,
    LoadedAppConfig, LoggingConfig, MetricsConfig, PercentageTunable, PlatformConfig, ProbeConfig,
    RunPropertiesConfig, SequenceSetting, StateProbeConfig,
};
pub use logging::{init_tracing, LogFormat};
