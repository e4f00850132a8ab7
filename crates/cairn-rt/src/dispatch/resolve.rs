//! Lazy dispatch map resolution.
//!
//! A map moves `Uninitialized -> Initializing -> Resolved` under its
//! re-entrant lock. Resolution has two passes:
//!
//! - **inner**: declarations compiled with the type and its superclass
//!   chain. A fully resolved ancestor map is merged wholesale and ends the
//!   walk.
//! - **outer**: declarations from loaded modules targeting the type, an
//!   ancestor, or their templates. Only modules loaded since the previous
//!   pass are visited.
//!
//! Predicates and generic interface functions may ask about the type being
//! resolved (`class C <: I<C>`). Such re-entrant requests on the same
//! thread are answered from the partial map instead of recursing.

use std::cell::RefCell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cairn_common::DispatchError;

use super::{DispatchMap, Resolution};
use crate::extension::ExtRef;
use crate::loader::global_loader;
use crate::registry::global_registry;
use crate::types::{Parent, TypeRef};

thread_local! {
    /// Types whose resolution is running on this thread.
    static IN_PROGRESS: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

fn in_progress(uuid: u32) -> bool {
    IN_PROGRESS.with(|stack| stack.borrow().contains(&uuid))
}

/// Marks a type in progress on this thread until dropped.
struct ResolutionScope {
    uuid: u32,
}

impl ResolutionScope {
    fn enter(uuid: u32) -> Self {
        IN_PROGRESS.with(|stack| stack.borrow_mut().push(uuid));
        ResolutionScope { uuid }
    }
}

impl Drop for ResolutionScope {
    fn drop(&mut self) {
        IN_PROGRESS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|&uuid| uuid == self.uuid) {
                stack.remove(pos);
            }
        });
    }
}

/// Resolve `ty`'s dispatch map if needed and return it.
///
/// While `ty` is being resolved on the calling thread this returns the
/// partially filled map.
pub(crate) fn ensure_resolved(ty: TypeRef) -> Result<&'static DispatchMap, DispatchError> {
    let map = ty.dispatch_map();
    if map.is_fully_handled() {
        return Ok(map);
    }
    let _guard = map.resolve_lock.lock();
    if map.is_fully_handled() || in_progress(ty.uuid()) {
        return Ok(map);
    }
    resolve_locked(ty, map)?;
    Ok(map)
}

fn resolve_locked(ty: TypeRef, map: &'static DispatchMap) -> Result<(), DispatchError> {
    let _scope = ResolutionScope::enter(ty.uuid());
    let generation = global_loader().generation();
    let seen = map.modules_seen.load(Ordering::Acquire);
    map.begin();

    if map.needs_resolve_inner.load(Ordering::Acquire) {
        traverse_inner(ty, map)?;
        map.needs_resolve_inner.store(false, Ordering::Release);
    }
    if seen < generation {
        traverse_outer(ty, map, seen, generation)?;
    }
    map.publish_resolved(generation);

    tracing::debug!(
        target: "cairn::resolve",
        ty = %ty,
        interfaces = map.len(),
        modules = generation,
        "dispatch map resolved"
    );
    Ok(())
}

/// `ty` followed by its superclasses. Array-like kinds end the walk.
fn ancestry(ty: TypeRef) -> impl Iterator<Item = TypeRef> {
    std::iter::successors(Some(ty), |&current| match current.parent() {
        Parent::Super(sup) if !current.kind().is_array_like() => Some(sup),
        _ => None,
    })
}

fn traverse_inner(ty: TypeRef, map: &DispatchMap) -> Result<(), DispatchError> {
    for ancestor in ancestry(ty) {
        if ancestor.uuid() != ty.uuid() {
            if let Some(resolved) = ancestor
                .existing_dispatch_map()
                .filter(|m| m.is_fully_handled())
            {
                map.merge_from(resolved);
                break;
            }
        }
        resolve_local(ty, ancestor, map)?;
    }
    Ok(())
}

/// Insert the inner declarations of `ancestor` that hold for it.
fn resolve_local(ty: TypeRef, ancestor: TypeRef, map: &DispatchMap) -> Result<(), DispatchError> {
    let Some(inner) = ancestor.inner_extensions() else {
        return Ok(());
    };
    let args = ancestor.resolution_args();

    if ancestor.uuid() == ty.uuid() {
        for &ext in inner.chain() {
            insert_checked(ancestor, &args, ext, map)?;
        }
    }
    let local = inner.local();
    match &inner.bitmap {
        Some(bitmap) => {
            for idx in bitmap.iter() {
                let Some(&ext) = local.get(idx) else {
                    break;
                };
                insert_holding(ancestor, &args, ext, map)?;
            }
        }
        None => {
            for &ext in local {
                insert_checked(ancestor, &args, ext, map)?;
            }
        }
    }
    Ok(())
}

fn insert_checked(
    supplier: TypeRef,
    args: &[TypeRef],
    ext: ExtRef,
    map: &DispatchMap,
) -> Result<(), DispatchError> {
    if ext.applies_to(supplier) {
        insert_holding(supplier, args, ext, map)?;
    }
    Ok(())
}

/// Insert `ext` if its where-clause holds for `args`.
fn insert_holding(
    supplier: TypeRef,
    args: &[TypeRef],
    ext: ExtRef,
    map: &DispatchMap,
) -> Result<(), DispatchError> {
    if !ext.predicate_holds(args) {
        return Ok(());
    }
    let interface = ext.interface_type(args)?;
    map.insert(interface, ext, supplier);
    Ok(())
}

fn traverse_outer(
    ty: TypeRef,
    map: &DispatchMap,
    from: usize,
    to: usize,
) -> Result<(), DispatchError> {
    let loader = global_loader();
    for ancestor in ancestry(ty) {
        let args = ancestor.resolution_args();
        loader.visit_extension_data(ancestor, from..to, |ext| {
            if !ext.predicate_holds(&args) {
                return Ok(());
            }
            let interface = global_registry().intern_type(ext.interface_type(&args)?);
            map.insert(interface, ext, ancestor);
            Ok(())
        })?;
    }
    Ok(())
}

/// The record by which `ty` satisfies `interface`.
///
/// With `recursive`, an interface reached only through another entry's
/// own map is found and memoised here.
pub(crate) fn find_record(
    ty: TypeRef,
    interface: TypeRef,
    recursive: bool,
) -> Result<Option<Arc<Resolution>>, DispatchError> {
    let map = ensure_resolved(ty)?;
    if let Some(record) = map.get(interface.uuid()) {
        return Ok(Some(record));
    }
    if !recursive || !interface.is_interface() || ty.uuid() == interface.uuid() {
        return Ok(None);
    }

    for record in map.snapshot() {
        let via = record.interface();
        if via.uuid() == ty.uuid() {
            continue;
        }
        if let Some(found) = find_record(via, interface, true)? {
            tracing::trace!(
                target: "cairn::resolve",
                ty = %ty,
                interface = %interface,
                via = %via,
                "memoised transitive interface"
            );
            return Ok(Some(map.insert(interface, found.extension(), found.supplier())));
        }
    }
    Ok(None)
}
