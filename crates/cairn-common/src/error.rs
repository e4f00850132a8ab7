use serde::Serialize;
use thiserror::Error;

use crate::module_graph::CycleError;

/// An unrecoverable inconsistency detected while resolving or growing
/// dispatch tables.
///
/// Every variant describes a corrupted or version-skewed binary rather than
/// a transient condition. The runtime's public entry points route these
/// through its fault handler; the `try_*` entry points hand them back to
/// the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum DispatchError {
    /// An interface shrank relative to a declaration compiled against it.
    #[error(
        "incompatible module: `{interface}` has {current} slot(s) but the declaration on `{target}` already holds {cached}"
    )]
    IncompatibleModule {
        target: String,
        interface: String,
        cached: usize,
        current: usize,
    },
    /// No direct ancestor supplies the slots an interface gained.
    #[error("no direct ancestor of `{target}` provides the {missing} new slot(s) of `{interface}`")]
    MissingProvider {
        target: String,
        interface: String,
        missing: usize,
    },
    /// A dispatch table was requested for an interface the type does not satisfy.
    #[error("`{target}` has no dispatch table for `{interface}`")]
    MissingTable { target: String, interface: String },
    /// An interface or class carries no declaration describing its own table.
    #[error("`{interface}` has no self declaration")]
    MissingSelfDeclaration { interface: String },
    /// A null descriptor was passed across the runtime ABI.
    #[error("null type descriptor passed as `{param}`")]
    NullDescriptor { param: &'static str },
    /// The metadata arena could not satisfy a request.
    #[error("allocation of {bytes} byte(s) of runtime metadata failed")]
    AllocationFailed { bytes: usize },
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    /// A template was instantiated with the wrong number of type arguments.
    #[error("template `{template}` expects {expected} type argument(s), found {found}")]
    ArityMismatch {
        template: String,
        expected: usize,
        found: usize,
    },
    /// `grow_table` was called without holding the declaration lock.
    #[error("table of `{target}` for `{interface}` grown without holding its lock")]
    TableNotLocked { target: String, interface: String },
    /// `grow_table` was called twice on one declaration.
    #[error("table of `{target}` for `{interface}` was already grown")]
    TableAlreadyGrown { target: String, interface: String },
    #[error("table of `{target}` for `{interface}` cannot shrink from {from} to {to} slot(s)")]
    TableShrink {
        target: String,
        interface: String,
        from: usize,
        to: usize,
    },
    /// A grown table no longer matches its original prefix.
    #[error("grown table of `{target}` for `{interface}` diverges at slot {slot}")]
    GrowthMismatch {
        target: String,
        interface: String,
        slot: usize,
    },
}

/// An error raised while loading module images.
///
/// Unlike [`DispatchError`], these are reported before any declaration
/// becomes visible, so the embedder may recover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("module dependency cycle: {0}")]
    Cycle(#[from] CycleError),
    #[error("module `{module}` depends on `{dependency}`, which is not loaded")]
    UnknownDependency { module: String, dependency: String },
    #[error("module `{0}` is already loaded")]
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::IncompatibleModule {
            target: "Widget".into(),
            interface: "Printable".into(),
            cached: 3,
            current: 2,
        };
        assert_eq!(
            err.to_string(),
            "incompatible module: `Printable` has 2 slot(s) but the declaration on `Widget` already holds 3"
        );
    }

    #[test]
    fn dispatch_error_display_other_variants() {
        assert_eq!(
            DispatchError::MissingProvider {
                target: "Leaf".into(),
                interface: "Shape".into(),
                missing: 2,
            }
            .to_string(),
            "no direct ancestor of `Leaf` provides the 2 new slot(s) of `Shape`"
        );
        assert_eq!(
            DispatchError::IndexOutOfRange {
                what: "field",
                index: 4,
                len: 2,
            }
            .to_string(),
            "field index 4 out of range (len 2)"
        );
        assert_eq!(
            DispatchError::NullDescriptor { param: "itf" }.to_string(),
            "null type descriptor passed as `itf`"
        );
    }

    #[test]
    fn load_error_from_cycle() {
        let cycle = CycleError {
            cycle_path: vec!["A".into(), "B".into(), "A".into()],
        };
        let err: LoadError = cycle.into();
        assert_eq!(err.to_string(), "module dependency cycle: A -> B -> A");
    }
}
