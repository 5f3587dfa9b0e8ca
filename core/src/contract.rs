//! Contract violation reporting.
//!
//! Misuse of an allocator or queue (double free, out-of-order fences,
//! unknown handles) is a programmer error. It is logged first so the message
//! reaches the log sink even when the panic unwinds through FFI, then the
//! thread panics.

use std::fmt;

/// Log a contract violation and panic with the same message.
#[cold]
#[track_caller]
pub fn violation(args: fmt::Arguments<'_>) -> ! {
    log::error!("contract violation: {args}");
    panic!("contract violation: {args}");
}

/// Report a contract violation with `format!`-style arguments.
///
/// ```should_panic
/// kiln_core::contract_violation!("block {} released twice", 512);
/// ```
#[macro_export]
macro_rules! contract_violation {
    ($($arg:tt)*) => {
        $crate::contract::violation(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "contract violation: bad index 7")]
    fn test_violation_panics_with_message() {
        crate::contract_violation!("bad index {}", 7);
    }
}
