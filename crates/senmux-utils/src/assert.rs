/// In debug builds, panics like `panic!`. In release, logs an error via
/// `tracing::error!` and continues — a single malformed sentence or a stray
/// filter shouldn't take the whole multiplexer down.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => (if cfg!(debug_assertions) { panic!($($arg)*); } else { tracing::error!($($arg)*); })
}

/// In debug builds, panics on failure like `debug_assert!`. In release, logs
/// at `error` level prefixed with "invariant violated: " instead of panicking.
#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(,)?) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                tracing::error!("invariant violated: {}", stringify!($cond));
            }
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond, $($arg)+);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                tracing::error!("invariant violated: {}", format!($($arg)+));
            }
        }
    };
}
