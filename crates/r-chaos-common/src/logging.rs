//! ---
//! chaos_section: "01-core-functionality"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Per-experiment tracing subscriber setup."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "R_CHAOS_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Filter used when neither `R_CHAOS_LOG` nor `RUST_LOG` is set: abort, probe
/// and platform traffic at debug, HTTP client internals at warn.
pub const DEFAULT_DIRECTIVES: &str =
    "info,r_chaos::abort=debug,r_chaos::probe=debug,r_chaos::platform=debug,hyper=warn,reqwest=warn";

/// Install the coordinator subscriber for one experiment run.
///
/// * `R_CHAOS_LOG` replaces the filter (e.g. `debug,r_chaos::probe=trace`), then
///   `RUST_LOG`, then [`DEFAULT_DIRECTIVES`].
/// * Stdout carries structured JSON or pretty output.
/// * Each experiment gets its own daily rolling JSON file,
///   `<prefix>-<experiment>.log`, with the experiment name on every line's span.
pub fn init_tracing(service_name: &str, experiment: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let file_appender = daily(&config.directory, log_file_name(prefix, experiment));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_current_span(false)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(run_filter(std::env::var(LOG_ENV).ok()))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        experiment = %experiment,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "chaos run logging initialised"
    );
    Ok(())
}

fn run_filter(override_directive: Option<String>) -> EnvFilter {
    if let Some(directive) = override_directive {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!(
                "ignoring invalid {} directive '{}': {}",
                LOG_ENV, directive, err
            ),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// `<prefix>-<experiment>.log`, with path separators and whitespace in the
/// experiment name replaced so the file stays inside the log directory.
pub fn log_file_name(prefix: &str, experiment: &str) -> String {
    let experiment: String = experiment
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let experiment = experiment.trim_matches('.');
    if experiment.is_empty() {
        format!("{}.log", prefix)
    } else {
        format!("{}-{}.log", prefix, experiment)
    }
}
