//! Slot owners for default-method dispatch.
//!
//! A default interface method must run with the receiver context of the
//! type that actually supplied the implementation, which may be several
//! ancestors up from the dynamic type. The answer is computed once per
//! `(type, interface, slot)` and cached in the record's
//! [`SlotOwnerCache`](super::SlotOwnerCache).

use cairn_common::DispatchError;

use super::update::table_for;
use super::{find_record, Resolution};
use crate::extension::FnPtr;
use crate::types::TypeRef;

pub(crate) fn owner_of(
    ty: TypeRef,
    interface: TypeRef,
    slot: usize,
) -> Result<Option<TypeRef>, DispatchError> {
    if ty.uuid() == interface.uuid() {
        return Ok(Some(ty));
    }
    if ty.is_temp_enum() {
        if let Some(base) = ty.super_type() {
            return owner_of(base, interface, slot);
        }
    }
    let map = ty.dispatch_map();
    if !map.is_resolved() {
        return Ok(None);
    }
    if let Some(cached) = map.get(interface.uuid()).and_then(|r| r.owners().get(slot)) {
        return Ok(Some(cached));
    }

    let table = table_for(ty, interface)?;
    let Some(&own) = table.get(slot) else {
        return Err(DispatchError::IndexOutOfRange {
            what: "dispatch slot",
            index: slot,
            len: table.len(),
        });
    };
    let Some(record) = map.get(interface.uuid()) else {
        return Ok(Some(ty));
    };

    tracing::trace!(
        target: "cairn::owner",
        ty = %ty,
        interface = %interface,
        slot,
        "scanning for slot owner"
    );
    let mut owner = ty;
    for entry in map.snapshot() {
        let via = entry.interface();
        if via.uuid() == ty.uuid() {
            continue;
        }
        let Some(inherited) = find_record(via, interface, false)? else {
            continue;
        };
        let Some(&theirs) = table_for_record(via, interface, &inherited)?.get(slot) else {
            continue;
        };
        if theirs.is_null() {
            continue;
        }
        if theirs == own {
            if let Some(found) = owner_of(via, interface, slot)? {
                owner = found;
            }
            break;
        }
        if entry.extension().is_direct() {
            break;
        }
    }

    Ok(Some(record.owners().publish(slot, owner, table.len())))
}

/// `via`'s table for `interface`, grown unless it is the interface's own.
fn table_for_record(
    via: TypeRef,
    interface: TypeRef,
    record: &Resolution,
) -> Result<&'static [FnPtr], DispatchError> {
    if via.uuid() == interface.uuid() {
        return Ok(record.extension().table());
    }
    table_for(via, interface)
}
