//! Function-table growth.
//!
//! A declaration compiled against an older version of an interface has a
//! table shorter than the interface's current method count `S`. Before the
//! table is handed out it is grown to `S`: the existing prefix is kept and
//! the missing tail is copied from a provider, a direct ancestor's table
//! for the same interface (ultimately the interface's own defaults).
//!
//! Exactly one thread grows a given declaration. Others spin with
//! [`Backoff`] until it publishes `Updated`.

use std::ptr;
use std::sync::Arc;

use cairn_common::DispatchError;
use crossbeam_utils::Backoff;

use super::{ensure_resolved, find_record, Resolution};
use crate::arena;
use crate::config::config;
use crate::extension::{ExtRef, FnPtr, TableState};
use crate::types::TypeRef;

/// The up-to-date table by which `ty` implements `interface`.
pub(crate) fn table_for(
    ty: TypeRef,
    interface: TypeRef,
) -> Result<&'static [FnPtr], DispatchError> {
    if ty.is_temp_enum() {
        if let Some(base) = ty.super_type() {
            return table_for(base, interface);
        }
    }
    let record = find_record(ty, interface, true)?.ok_or_else(|| DispatchError::MissingTable {
        target: ty.name().to_string(),
        interface: interface.name().to_string(),
    })?;
    if !record.extension().is_updated() {
        try_update(&record, interface)?;
    }
    Ok(record.extension().table())
}

/// Bring `record`'s declaration up to `interface`'s current length.
pub(crate) fn try_update(record: &Resolution, interface: TypeRef) -> Result<(), DispatchError> {
    // An interface's own declaration defines the length.
    if record.supplier().uuid() == interface.uuid() {
        return Ok(());
    }
    let ext = record.extension();
    let backoff = Backoff::new();
    loop {
        if ext.state() == TableState::Updated {
            return Ok(());
        }
        let required = interface.self_declaration()?.len();
        let current = ext.len();
        if current == required {
            ext.mark_updated();
            return Ok(());
        }
        if current > required {
            return Err(DispatchError::IncompatibleModule {
                target: record.supplier().name().to_string(),
                interface: interface.name().to_string(),
                cached: current,
                current: required,
            });
        }
        if !ext.try_lock() {
            backoff.snooze();
            continue;
        }
        let grown = grow(record, interface, current, required);
        if grown.is_err() {
            ext.unlock();
        }
        return grown;
    }
}

/// Runs with `record`'s declaration locked. On success the declaration
/// is `Updated`; on error the caller releases the lock.
fn grow(
    record: &Resolution,
    interface: TypeRef,
    current: usize,
    required: usize,
) -> Result<(), DispatchError> {
    let ext = record.extension();
    let supplier = record.supplier();
    let provider = find_provider(supplier, interface, ext, required)?.ok_or_else(|| {
        DispatchError::MissingProvider {
            target: supplier.name().to_string(),
            interface: interface.name().to_string(),
            missing: required - current,
        }
    })?;

    let old = ext.table();
    let grown = arena::alloc_table(&old[..current], &provider[current..required])?;
    if config().verify_growth {
        verify_prefix(ext, old, grown)?;
    }
    ext.grow_table(grown)?;
    ext.mark_updated();

    tracing::info!(
        target: "cairn::update",
        ty = %supplier,
        interface = %interface,
        from = current,
        to = required,
        "grew dispatch table"
    );
    Ok(())
}

/// A table of at least `required` slots for `interface`, taken from a
/// direct supertype of `supplier`.
fn find_provider(
    supplier: TypeRef,
    interface: TypeRef,
    ext: ExtRef,
    required: usize,
) -> Result<Option<&'static [FnPtr]>, DispatchError> {
    let map = ensure_resolved(supplier)?;
    let candidates: Vec<Arc<Resolution>> = map
        .snapshot()
        .into_iter()
        .filter(|r| r.extension().is_direct() && r.interface().uuid() != supplier.uuid())
        .collect();

    for via in candidates {
        let Some(candidate) = find_record(via.interface(), interface, false)? else {
            continue;
        };
        if ptr::eq(candidate.extension(), ext) {
            continue;
        }
        if candidate.extension().len() != required {
            try_update(&candidate, interface)?;
        }
        let table = candidate.extension().table();
        if table.len() >= required {
            return Ok(Some(table));
        }
    }
    Ok(None)
}

fn verify_prefix(
    ext: ExtRef,
    old: &[FnPtr],
    grown: &[FnPtr],
) -> Result<(), DispatchError> {
    match old.iter().zip(grown).position(|(a, b)| a != b) {
        None => Ok(()),
        Some(slot) => Err(DispatchError::GrowthMismatch {
            target: ext.target().name().to_string(),
            interface: ext.interface_name(),
            slot,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeBuilder;

    fn f(addr: usize) -> FnPtr {
        FnPtr::new(addr)
    }

    #[test]
    fn test_short_table_grows_from_interface_defaults() {
        let printable = TypeBuilder::interface("up.Printable")
            .methods(vec![FnPtr::NULL, f(0xd0)])
            .build()
            .unwrap();
        let widget = TypeBuilder::class("up.Widget")
            .implements(printable, vec![f(0xa0)])
            .build()
            .unwrap();

        let table = table_for(widget, printable).unwrap();
        assert_eq!(table, &[f(0xa0), f(0xd0)]);
        let record = find_record(widget, printable, false).unwrap().unwrap();
        assert_eq!(record.extension().state(), TableState::Updated);
        assert_eq!(record.extension().len(), 2);
        // Stable across calls.
        assert!(ptr::eq(table, table_for(widget, printable).unwrap()));
    }

    #[test]
    fn test_current_table_is_marked_without_copy() {
        let itf = TypeBuilder::interface("up.Current")
            .methods(vec![FnPtr::NULL])
            .build()
            .unwrap();
        let ty = TypeBuilder::class("up.Impl").implements(itf, vec![f(1)]).build().unwrap();
        let record = find_record(ty, itf, false).unwrap().unwrap();
        let before = record.extension().table();

        assert!(ptr::eq(table_for(ty, itf).unwrap(), before));
        assert!(record.extension().is_updated());
    }

    #[test]
    fn test_longer_table_is_incompatible() {
        let itf = TypeBuilder::interface("up.Shrunk")
            .methods(vec![FnPtr::NULL])
            .build()
            .unwrap();
        let ty = TypeBuilder::class("up.Newer")
            .implements(itf, vec![f(1), f(2)])
            .build()
            .unwrap();
        assert_eq!(
            table_for(ty, itf).unwrap_err(),
            DispatchError::IncompatibleModule {
                target: "up.Newer".into(),
                interface: "up.Shrunk".into(),
                cached: 2,
                current: 1,
            }
        );
    }

    #[test]
    fn test_missing_table() {
        let itf = TypeBuilder::interface("up.Unrelated").build().unwrap();
        let ty = TypeBuilder::class("up.Plain").build().unwrap();
        assert!(matches!(
            table_for(ty, itf),
            Err(DispatchError::MissingTable { .. })
        ));
    }

    #[test]
    fn test_inherited_declaration_grows_through_ancestor() {
        let itf = TypeBuilder::interface("up.Sized")
            .methods(vec![FnPtr::NULL, f(0xd1), f(0xd2)])
            .build()
            .unwrap();
        let base = TypeBuilder::class("up.Base")
            .implements(itf, vec![f(0xb0), f(0xb1)])
            .build()
            .unwrap();
        // Recompiled against the old interface and re-declared.
        let derived = TypeBuilder::class("up.Derived")
            .extends(base)
            .implements(itf, vec![f(0xc0)])
            .build()
            .unwrap();

        assert_eq!(table_for(derived, itf).unwrap(), &[f(0xc0), f(0xb1), f(0xd2)]);
        assert_eq!(table_for(base, itf).unwrap(), &[f(0xb0), f(0xb1), f(0xd2)]);
    }

    #[test]
    fn test_temp_enum_uses_base_table() {
        let itf = TypeBuilder::interface("up.Hash")
            .methods(vec![FnPtr::NULL])
            .build()
            .unwrap();
        let base = TypeBuilder::class("up.Color").implements(itf, vec![f(7)]).build().unwrap();
        let temp = TypeBuilder::temp_enum("up.Color$tmp", base).build().unwrap();
        assert_eq!(table_for(temp, itf).unwrap(), &[f(7)]);
    }

    #[test]
    fn test_verify_prefix_reports_slot() {
        let itf = TypeBuilder::interface("up.Verify").build().unwrap();
        let ty = TypeBuilder::class("up.Verified").implements(itf, vec![]).build().unwrap();
        let ext = find_record(ty, itf, false).unwrap().unwrap().extension();
        assert!(verify_prefix(ext, &[f(1), f(2)], &[f(1), f(2), f(3)]).is_ok());
        assert!(matches!(
            verify_prefix(ext, &[f(1), f(2)], &[f(1), f(9)]),
            Err(DispatchError::GrowthMismatch { slot: 1, .. })
        ));
    }
}
