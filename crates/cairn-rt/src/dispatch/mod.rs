//! Interface dispatch.
//!
//! Every type owns a [`DispatchMap`] from interface uuid to the
//! [`Resolution`] that satisfies it. Maps are filled lazily on first use
//! (see [`resolve`]), declaration tables are grown when an interface gained
//! methods in a newer module (see [`update`]), and default-method receivers
//! are located per slot (see [`owner`]).
//!
//! ## Semantics
//!
//! - A resolved map holds every interface the type satisfies, directly or
//!   through an ancestor. Interfaces reached only through other interfaces
//!   are found by a recursive search and memoised on first hit.
//! - Records are only ever added. The first record inserted for an
//!   interface wins: the type's own declarations come first, then its
//!   ancestors nearest first, then outer declarations in module load order.
//! - The entries lock is held only for reads and single inserts, never
//!   across a predicate or a generic interface function.

mod owner;
mod resolve;
mod subtype;
mod update;

pub(crate) use resolve::{ensure_resolved, find_record};

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use cairn_common::DispatchError;
use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::extension::{ExtRef, FnPtr};
use crate::fault::OrFatal;
use crate::loader::global_loader;
use crate::types::{TypeInfo, TypeRef};

// ---------------------------------------------------------------------------
// Slot owner cache
// ---------------------------------------------------------------------------

/// Per-slot cache of the type supplying the implementation behind a table
/// slot. The cells are allocated once, on the first publish, sized to the
/// up-to-date table; an `Updated` table never changes length again. Each
/// cell is written at most once (release) and read without a lock
/// (acquire).
pub struct SlotOwnerCache(OnceLock<Box<[AtomicPtr<TypeInfo>]>>);

impl SlotOwnerCache {
    fn new() -> Self {
        SlotOwnerCache(OnceLock::new())
    }

    /// Zero until the first owner has been published.
    pub fn len(&self) -> usize {
        self.0.get().map_or(0, |cells| cells.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, slot: usize) -> Option<TypeRef> {
        let owner = self.0.get()?.get(slot)?.load(Ordering::Acquire);
        // SAFETY: only `publish` stores non-null pointers, and it stores
        // descriptors with process lifetime.
        unsafe { owner.cast_const().as_ref() }
    }

    /// Record `owner` for `slot` of a `len`-slot table unless a value is
    /// already present. Returns the value that ends up cached.
    pub fn publish(&self, slot: usize, owner: TypeRef, len: usize) -> TypeRef {
        let cells = self
            .0
            .get_or_init(|| (0..len).map(|_| AtomicPtr::new(ptr::null_mut())).collect());
        let Some(cell) = cells.get(slot) else {
            return owner;
        };
        let new = ptr::from_ref(owner).cast_mut();
        match cell.compare_exchange(ptr::null_mut(), new, Ordering::Release, Ordering::Acquire) {
            Ok(_) => owner,
            // SAFETY: as in `get`.
            Err(existing) => unsafe { &*existing },
        }
    }
}

impl std::fmt::Debug for SlotOwnerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries((0..self.len()).map(|slot| self.get(slot).map(|ty| ty.name().to_string())))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// How a type satisfies one interface.
#[derive(Debug)]
pub struct Resolution {
    extension: ExtRef,
    interface: TypeRef,
    supplier: TypeRef,
    owners: SlotOwnerCache,
}

impl Resolution {
    fn new(interface: TypeRef, extension: ExtRef, supplier: TypeRef) -> Self {
        Resolution {
            extension,
            interface,
            supplier,
            owners: SlotOwnerCache::new(),
        }
    }

    /// The declaration whose table implements the interface.
    pub fn extension(&self) -> ExtRef {
        self.extension
    }

    /// The satisfied interface (or superclass).
    pub fn interface(&self) -> TypeRef {
        self.interface
    }

    /// The type whose declaration this is: the resolved type or one of its
    /// ancestors.
    pub fn supplier(&self) -> TypeRef {
        self.supplier
    }

    pub fn owners(&self) -> &SlotOwnerCache {
        &self.owners
    }
}

// ---------------------------------------------------------------------------
// DispatchMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Uninitialized = 0,
    Initializing = 1,
    Resolved = 2,
}

#[derive(Default)]
struct Entries {
    index: FxHashMap<u32, usize>,
    records: Vec<Arc<Resolution>>,
}

pub struct DispatchMap {
    owner_uuid: u32,
    resolve_lock: ReentrantMutex<()>,
    phase: AtomicU8,
    needs_resolve_inner: AtomicBool,
    /// Loader generation covered by the last outer traversal.
    modules_seen: AtomicUsize,
    entries: RwLock<Entries>,
}

impl DispatchMap {
    pub fn new(owner_uuid: u32) -> Self {
        DispatchMap {
            owner_uuid,
            resolve_lock: ReentrantMutex::new(()),
            phase: AtomicU8::new(Phase::Uninitialized as u8),
            needs_resolve_inner: AtomicBool::new(true),
            modules_seen: AtomicUsize::new(0),
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn owner_uuid(&self) -> u32 {
        self.owner_uuid
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            0 => Phase::Uninitialized,
            1 => Phase::Initializing,
            _ => Phase::Resolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.phase() == Phase::Resolved
    }

    /// Resolved, and no module has been loaded since.
    pub fn is_fully_handled(&self) -> bool {
        self.is_resolved()
            && self.modules_seen.load(Ordering::Acquire) >= global_loader().generation()
    }

    pub fn len(&self) -> usize {
        self.entries.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, interface_uuid: u32) -> Option<Arc<Resolution>> {
        let entries = self.entries.read();
        entries
            .index
            .get(&interface_uuid)
            .map(|&idx| entries.records[idx].clone())
    }

    /// Every record, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Resolution>> {
        self.entries.read().records.clone()
    }

    /// Insert a record unless `interface` already has one; returns the
    /// record now present.
    pub(crate) fn insert(
        &self,
        interface: TypeRef,
        extension: ExtRef,
        supplier: TypeRef,
    ) -> Arc<Resolution> {
        let mut entries = self.entries.write();
        if let Some(&idx) = entries.index.get(&interface.uuid()) {
            return entries.records[idx].clone();
        }
        let record = Arc::new(Resolution::new(interface, extension, supplier));
        let idx = entries.records.len();
        entries.records.push(record.clone());
        entries.index.insert(interface.uuid(), idx);
        record
    }

    /// Copy every record of `other` that this map lacks, with fresh caches.
    pub(crate) fn merge_from(&self, other: &DispatchMap) {
        for record in other.snapshot() {
            self.insert(record.interface, record.extension, record.supplier);
        }
    }

    fn begin(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Uninitialized as u8,
            Phase::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn publish_resolved(&self, modules_seen: usize) {
        self.modules_seen.store(modules_seen, Ordering::Release);
        self.phase.store(Phase::Resolved as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for DispatchMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("DispatchMap")
            .field("owner", &self.owner_uuid)
            .field("phase", &self.phase())
            .field(
                "interfaces",
                &entries
                    .records
                    .iter()
                    .map(|r| r.interface.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Public queries on descriptors
// ---------------------------------------------------------------------------

impl TypeInfo {
    /// The function table implementing `interface` for this type, grown
    /// to the interface's current method count.
    pub fn try_dispatch_table(
        &'static self,
        interface: TypeRef,
    ) -> Result<&'static [FnPtr], DispatchError> {
        update::table_for(self, interface)
    }

    /// As [`TypeInfo::try_dispatch_table`]; any error is fatal.
    pub fn dispatch_table(&'static self, interface: TypeRef) -> &'static [FnPtr] {
        self.try_dispatch_table(interface).or_fatal()
    }

    pub fn try_is_subtype(&'static self, other: TypeRef) -> Result<bool, DispatchError> {
        subtype::is_subtype(self, other)
    }

    pub fn is_subtype(&'static self, other: TypeRef) -> bool {
        self.try_is_subtype(other).or_fatal()
    }

    /// The ancestor supplying the implementation behind `slot` of this
    /// type's table for `interface`. `None` until this type is resolved.
    pub fn try_owner_of(
        &'static self,
        interface: TypeRef,
        slot: usize,
    ) -> Result<Option<TypeRef>, DispatchError> {
        owner::owner_of(self, interface, slot)
    }

    pub fn owner_of(&'static self, interface: TypeRef, slot: usize) -> Option<TypeRef> {
        self.try_owner_of(interface, slot).or_fatal()
    }

    /// Every interface this type satisfies through its own or inherited
    /// declarations, in resolution order.
    pub fn try_satisfied_interfaces(&'static self) -> Result<Vec<TypeRef>, DispatchError> {
        let map = ensure_resolved(self)?;
        Ok(map
            .snapshot()
            .iter()
            .map(|record| record.interface)
            .filter(|itf| itf.is_interface())
            .collect())
    }

    pub fn satisfied_interfaces(&'static self) -> Vec<TypeRef> {
        self.try_satisfied_interfaces().or_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{ExtensionData, ExtensionTarget, InterfaceRef};
    use crate::types::TypeBuilder;

    fn decl(target: TypeRef, itf: TypeRef, len: usize) -> ExtRef {
        let table: Vec<FnPtr> = (1..=len).map(FnPtr::new).collect();
        ExtensionData::new(ExtensionTarget::Type(target), InterfaceRef::Fixed(itf), &table)
            .unwrap()
            .leak()
    }

    #[test]
    fn test_insert_keeps_first_record() {
        let ty = TypeBuilder::class("dm.Type").build().unwrap();
        let itf = TypeBuilder::interface("dm.Itf").build().unwrap();
        let map = DispatchMap::new(ty.uuid());
        let first = decl(ty, itf, 1);
        let second = decl(ty, itf, 2);

        map.insert(itf, first, ty);
        let kept = map.insert(itf, second, ty);
        assert!(ptr::eq(kept.extension(), first));
        assert_eq!(map.len(), 1);
        assert_eq!(map.phase(), Phase::Uninitialized);
    }

    #[test]
    fn test_merge_preserves_order_and_skips_present() {
        let ty = TypeBuilder::class("dm.Merge").build().unwrap();
        let a = TypeBuilder::interface("dm.A").build().unwrap();
        let b = TypeBuilder::interface("dm.B").build().unwrap();
        let source = DispatchMap::new(1);
        source.insert(a, decl(ty, a, 1), ty);
        source.insert(b, decl(ty, b, 1), ty);

        let target = DispatchMap::new(2);
        let own_b = decl(ty, b, 3);
        target.insert(b, own_b, ty);
        target.merge_from(&source);

        let order: Vec<&str> = target.snapshot().iter().map(|r| r.interface().name()).collect();
        assert_eq!(order, vec!["dm.B", "dm.A"]);
        assert!(ptr::eq(target.get(b.uuid()).unwrap().extension(), own_b));
    }

    #[test]
    fn test_slot_owner_cache_publishes_once() {
        let first = TypeBuilder::class("dm.First").build().unwrap();
        let second = TypeBuilder::class("dm.Second").build().unwrap();
        let cache = SlotOwnerCache::new();
        assert!(cache.get(0).is_none());
        assert!(cache.is_empty());
        assert!(ptr::eq(cache.publish(0, first, 2), first));
        assert!(ptr::eq(cache.publish(0, second, 2), first));
        assert!(ptr::eq(cache.get(0).unwrap(), first));
        assert_eq!(cache.len(), 2);
        // Out of range is a no-op.
        assert!(cache.get(5).is_none());
        assert!(ptr::eq(cache.publish(5, second, 2), second));
    }

    #[test]
    fn test_cache_length_fixed_by_first_publish() {
        let ty = TypeBuilder::class("dm.Fixed").build().unwrap();
        let cache = SlotOwnerCache::new();
        cache.publish(1, ty, 3);
        // A later caller with a different length sees the same cells.
        cache.publish(0, ty, 5);
        assert_eq!(cache.len(), 3);
        assert!(ptr::eq(cache.get(0).unwrap(), ty));
        assert!(ptr::eq(cache.get(1).unwrap(), ty));
        assert!(cache.get(2).is_none());
    }
}
