// src/macros.rs

//
// Logging macros
//
// `logging` feature enabled  → forwarded to tracing
// `logging` feature disabled → errors go to stderr, everything else is
//                              type-checked and discarded
//
// Call sites use plain format strings only (no structured fields) so both
// expansions accept the same input.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
mod imp {
    macro_rules! log_error {
        ($($arg:tt)*) => { tracing::error!($($arg)*) };
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => { tracing::warn!($($arg)*) };
    }
    macro_rules! log_info {
        ($($arg:tt)*) => { tracing::info!($($arg)*) };
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => { tracing::debug!($($arg)*) };
    }
    macro_rules! log_trace {
        ($($arg:tt)*) => { tracing::trace!($($arg)*) };
    }

    pub(crate) use {log_debug, log_error, log_info, log_trace, log_warn};
}

#[cfg(not(feature = "logging"))]
mod imp {
    macro_rules! log_error {
        ($($arg:tt)*) => { eprintln!("framed-rpc: {}", format_args!($($arg)*)) };
    }
    macro_rules! log_discard {
        ($($arg:tt)*) => {{
            let _ = format_args!($($arg)*);
        }};
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => { $crate::macros::log_discard!($($arg)*) };
    }
    macro_rules! log_info {
        ($($arg:tt)*) => { $crate::macros::log_discard!($($arg)*) };
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => { $crate::macros::log_discard!($($arg)*) };
    }
    macro_rules! log_trace {
        ($($arg:tt)*) => { $crate::macros::log_discard!($($arg)*) };
    }

    pub(crate) use {log_debug, log_discard, log_error, log_info, log_trace, log_warn};
}

#[cfg(not(feature = "logging"))]
pub(crate) use imp::log_discard;
pub(crate) use imp::{log_debug, log_error, log_info, log_trace, log_warn};
