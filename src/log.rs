//! Logging shims over `tracing`.
//!
//! With the `tracing` feature disabled every call compiles to nothing.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        tracing::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        tracing::debug!($($arg)*);
    }};
}

macro_rules! warning {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        tracing::warn!($($arg)*);
    }};
}

/// Logs a programmer error together with a freshly captured backtrace.
///
/// Contract violations are surfaced loudly but never abort the process.
macro_rules! contract_violation {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!(backtrace = %backtrace, $($arg)*);
        }
    }};
}

pub(crate) use {contract_violation, debug, trace, warning};
