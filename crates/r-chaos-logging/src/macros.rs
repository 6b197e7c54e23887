//! ---
//! chaos_section: "03-observability"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Context-aware logging macros."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
//! Logging macros that stamp experiment/target/phase/probe fields on every event.

/// Shared expansion for the level-specific macros. Not part of the public API.
#[doc(hidden)]
#[macro_export]
macro_rules! __chaos_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            experiment = ctx.experiment.unwrap_or(""),
            target = ctx.target.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            probe = ctx.probe.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with chaos context.
#[macro_export]
macro_rules! chaos_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with chaos context.
#[macro_export]
macro_rules! chaos_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with chaos context.
#[macro_export]
macro_rules! chaos_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with chaos context.
#[macro_export]
macro_rules! chaos_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__chaos_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
