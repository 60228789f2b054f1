//! Contract checks that fail loud in debug builds and soft in release builds.

/// Report a violated precondition.
///
/// Panics with the location when `debug_assertions` are enabled, otherwise the
/// violation is logged and the caller carries on with its fallback value.
#[track_caller]
pub fn contract_violation(condition: &str, file: &str, line: u32) {
    if cfg!(debug_assertions) {
        panic!("{file}:{line}: assertion failed: {condition}");
    }
    tracing::error!("{file}:{line}: assertion failed: {condition}");
}

/// Return early from the enclosing function when `$cond` does not hold.
///
/// `assert_return!(cond)` returns `()`, `assert_return!(cond, value)` returns
/// `value`. See [`contract_violation`] for the debug/release behaviour.
#[macro_export]
macro_rules! assert_return {
    ($cond:expr) => {
        $crate::assert_return!($cond, ())
    };
    ($cond:expr, $ret:expr) => {
        if !($cond) {
            $crate::check::contract_violation(stringify!($cond), file!(), line!());
            return $ret;
        }
    };
}

#[cfg(test)]
mod tests {
    fn checked_half(value: u32) -> u32 {
        assert_return!(value % 2 == 0, 0);
        value / 2
    }

    #[test]
    fn test_assert_return_passes_through() {
        assert_eq!(checked_half(8), 4);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "value % 2 == 0")]
    fn test_assert_return_panics_in_debug() {
        checked_half(3);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_assert_return_falls_back_in_release() {
        assert_eq!(checked_half(3), 0);
    }
}
