//! ---
//! vigil_section: "03-persistence-logging"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Structured logging adapters and sinks."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros below.
#[doc(hidden)]
#[macro_export]
macro_rules! __vigil_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            service = ctx.service.unwrap_or(""),
            unit = ctx.unit.unwrap_or(""),
            pid = ctx.pid.unwrap_or_default(),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with service context.
#[macro_export]
macro_rules! vigil_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with service context.
#[macro_export]
macro_rules! vigil_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with service context.
#[macro_export]
macro_rules! vigil_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vigil_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
