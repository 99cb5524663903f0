#![allow(unused_macros)]

/// Terminate on unrecoverable metadata corruption.
///
/// Emits a `tracing` error event with the formatted diagnostic and then panics. Release
/// builds are compiled with `panic = "abort"`, which turns this into immediate process
/// termination; continuing would mean dispatching through a corrupted function table.
///
/// ```rust, ignore
/// fatal!("Method cache corrupted. class={} sel={}", name, sel);
/// ```
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(target: "objcore::fatal", %message, "fatal runtime error");
        panic!("objcore fatal: {}", message)
    }};
}

/// Helper macro for debug-only contract checks which log before asserting.
///
/// Contract violations (calling an operation without the lock it requires, double
/// realization, ...) are only checked in debug builds.
///
/// ```rust, ignore
/// debug_contract!(self.is_realized(), "class {} must be realized", name);
/// ```
macro_rules! debug_contract {
    ($cond:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) && !$cond {
            let message = format!($($arg)*);
            tracing::error!(target: "objcore::contract", %message, "contract violation");
            panic!("objcore contract violation: {}", message);
        }
    };
}
