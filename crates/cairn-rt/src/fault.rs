//! Fault handler for unrecoverable dispatch errors.
//!
//! Every [`DispatchError`] means the loaded modules are mutually
//! incompatible, so there is no safe continuation. The error is reported
//! through `tracing` and on stderr, then the process aborts (or panics,
//! under [`FaultPolicy::Panic`]).

use cairn_common::DispatchError;

use crate::config::{config, FaultPolicy};

/// Report `err` and stop, according to the installed fault policy.
#[cold]
pub fn fatal(err: DispatchError) -> ! {
    fatal_with(config().fault_policy, &err)
}

#[cold]
fn fatal_with(policy: FaultPolicy, err: &DispatchError) -> ! {
    tracing::error!(target: "cairn::fault", error = %err, "unrecoverable dispatch fault");
    eprintln!("[cairn-rt] fatal: {err}");
    match policy {
        FaultPolicy::Abort => std::process::abort(),
        FaultPolicy::Panic => panic!("cairn-rt fatal: {err}"),
    }
}

/// Unwrap a dispatch result, routing errors to [`fatal`].
pub trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, DispatchError> {
    #[inline]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The abort policy cannot be exercised in-process.

    #[test]
    #[should_panic(expected = "cairn-rt fatal: `Widget` has no dispatch table for `Printable`")]
    fn test_panic_policy_unwinds() {
        fatal_with(
            FaultPolicy::Panic,
            &DispatchError::MissingTable {
                target: "Widget".into(),
                interface: "Printable".into(),
            },
        );
    }

    #[test]
    fn test_or_fatal_passes_values_through() {
        let ok: Result<u32, DispatchError> = Ok(7);
        assert_eq!(ok.or_fatal(), 7);
    }
}
