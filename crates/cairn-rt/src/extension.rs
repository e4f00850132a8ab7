//! Extension declarations.
//!
//! An [`ExtensionData`] records "this type (or every instantiation of this
//! template) satisfies interface `I`, provided the where-clause holds",
//! together with the function table implementing `I`'s virtual methods.
//!
//! ## Table lifecycle
//!
//! A declaration's table can grow when the interface gains methods in a
//! newer module. Growth is coordinated through [`TableState`]:
//!
//! | from       | to         | by                                   |
//! |------------|------------|--------------------------------------|
//! | `Unlocked` | `Locked`   | [`ExtensionData::try_lock`]          |
//! | `Locked`   | `Updated`  | [`ExtensionData::mark_updated`]      |
//! | `Unlocked` | `Updated`  | [`ExtensionData::mark_updated`]      |
//! | `Locked`   | `Unlocked` | [`ExtensionData::unlock`]            |
//!
//! The only backward move is `Locked -> Unlocked`, taken by an updater
//! whose growth failed so the next caller can retry and see the same
//! error. Nothing leaves `Updated`. Once a reader observes `Updated`
//! (acquire), every write made by the updater before publishing it
//! (release) is visible, including the grown table.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use cairn_common::DispatchError;

use crate::arena;
use crate::types::{TypeRef, TypeTemplate};

/// An opaque code address stored in a function table.
///
/// The null address marks a slot with no implementation (an abstract
/// interface method).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FnPtr(usize);

impl FnPtr {
    pub const NULL: FnPtr = FnPtr(0);

    pub const fn new(addr: usize) -> Self {
        FnPtr(addr)
    }

    pub fn from_fn(f: extern "C" fn()) -> Self {
        FnPtr(f as usize)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for FnPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// A declaration with process lifetime.
pub type ExtRef = &'static ExtensionData;

/// A generic resolution function: computes a type from type arguments.
pub type TypeFn = Box<dyn Fn(&[TypeRef]) -> Result<TypeRef, DispatchError> + Send + Sync>;

/// A where-clause. Only the lowest bit of the result is significant.
pub type WhereFn = Box<dyn Fn(&[TypeRef]) -> usize + Send + Sync>;

// ---------------------------------------------------------------------------
// Table state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TableState {
    Unlocked = 0,
    Locked = 1,
    Updated = 2,
}

impl TableState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TableState::Unlocked,
            1 => TableState::Locked,
            _ => TableState::Updated,
        }
    }
}

/// Atomic cell holding a [`TableState`]. Only forward transitions succeed,
/// apart from [`AtomicTableState::release`].
#[derive(Debug)]
pub struct AtomicTableState(AtomicU8);

impl AtomicTableState {
    pub const fn new() -> Self {
        AtomicTableState(AtomicU8::new(TableState::Unlocked as u8))
    }

    pub fn load(&self) -> TableState {
        TableState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Attempt `from -> to`. Fails if the state is not `from` or the move
    /// would go backwards.
    pub fn transition(&self, from: TableState, to: TableState) -> bool {
        if (to as u8) <= (from as u8) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Locked -> Unlocked`. Fails in any other state.
    pub fn release(&self) -> bool {
        self.0
            .compare_exchange(
                TableState::Locked as u8,
                TableState::Unlocked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for AtomicTableState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Targets and interface references
// ---------------------------------------------------------------------------

/// What a declaration is written against.
#[derive(Clone, Copy)]
pub enum ExtensionTarget {
    /// A concrete type, matched by identity.
    Type(TypeRef),
    /// Every instantiation of a template.
    Template(&'static TypeTemplate),
}

impl ExtensionTarget {
    pub fn name(&self) -> &str {
        match self {
            ExtensionTarget::Type(ty) => ty.name(),
            ExtensionTarget::Template(template) => template.name(),
        }
    }

    /// Whether `ty` is this target: the same type, or an instantiation of
    /// the same template.
    pub fn matches(&self, ty: TypeRef) -> bool {
        match self {
            ExtensionTarget::Type(target) => target.uuid() == ty.uuid(),
            ExtensionTarget::Template(template) => ty
                .template()
                .is_some_and(|origin| origin.uuid() == template.uuid()),
        }
    }
}

/// The interface a declaration satisfies.
pub enum InterfaceRef {
    Fixed(TypeRef),
    /// Computed from the type arguments of the type being resolved.
    Generic(TypeFn),
}

// ---------------------------------------------------------------------------
// ExtensionData
// ---------------------------------------------------------------------------

pub struct ExtensionData {
    target: ExtensionTarget,
    interface: InterfaceRef,
    predicate: Option<WhereFn>,
    /// Declared against a direct supertype of the target.
    direct: bool,
    table: &'static [FnPtr],
    grown: OnceLock<&'static [FnPtr]>,
    state: AtomicTableState,
}

impl ExtensionData {
    /// Create a declaration; `table` is copied into the metadata arena.
    pub fn new(
        target: ExtensionTarget,
        interface: InterfaceRef,
        table: &[FnPtr],
    ) -> Result<Self, DispatchError> {
        Ok(ExtensionData {
            target,
            interface,
            predicate: None,
            direct: false,
            table: arena::alloc_table(table, &[])?,
            grown: OnceLock::new(),
            state: AtomicTableState::new(),
        })
    }

    pub fn where_clause(mut self, predicate: WhereFn) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    pub fn leak(self) -> ExtRef {
        arena::alloc(self)
    }

    pub fn target(&self) -> ExtensionTarget {
        self.target
    }

    pub fn interface_ref(&self) -> &InterfaceRef {
        &self.interface
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// The satisfied interface for an instantiation with `args`.
    pub fn interface_type(&self, args: &[TypeRef]) -> Result<TypeRef, DispatchError> {
        match &self.interface {
            InterfaceRef::Fixed(itf) => Ok(*itf),
            InterfaceRef::Generic(resolve) => resolve(args),
        }
    }

    pub fn predicate_holds(&self, args: &[TypeRef]) -> bool {
        match &self.predicate {
            None => true,
            Some(predicate) => predicate(args) & 0x1 != 0,
        }
    }

    /// The current function table. Pointer and length always change together.
    pub fn table(&self) -> &'static [FnPtr] {
        self.grown.get().copied().unwrap_or(self.table)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn state(&self) -> TableState {
        self.state.load()
    }

    pub fn is_updated(&self) -> bool {
        self.state.load() == TableState::Updated
    }

    /// Claim the right to grow this table. Fails if another thread holds
    /// the lock or the table is already up to date.
    pub fn try_lock(&self) -> bool {
        self.state.transition(TableState::Unlocked, TableState::Locked)
    }

    /// Give up a lock taken with [`ExtensionData::try_lock`] without
    /// publishing a table.
    pub fn unlock(&self) {
        self.state.release();
    }

    pub fn mark_updated(&self) {
        loop {
            let current = self.state.load();
            if current == TableState::Updated
                || self.state.transition(current, TableState::Updated)
            {
                return;
            }
        }
    }

    /// Replace the table. Valid only while locked, at most once, and never
    /// to a shorter table.
    pub fn grow_table(&self, table: &'static [FnPtr]) -> Result<(), DispatchError> {
        if self.state.load() != TableState::Locked {
            return Err(DispatchError::TableNotLocked {
                target: self.target.name().to_string(),
                interface: self.interface_name(),
            });
        }
        if table.len() < self.table.len() {
            return Err(DispatchError::TableShrink {
                target: self.target.name().to_string(),
                interface: self.interface_name(),
                from: self.table.len(),
                to: table.len(),
            });
        }
        self.grown
            .set(table)
            .map_err(|_| DispatchError::TableAlreadyGrown {
                target: self.target.name().to_string(),
                interface: self.interface_name(),
            })
    }

    /// Whether this declaration is written against `ty`.
    pub fn applies_to(&self, ty: TypeRef) -> bool {
        self.target.matches(ty)
    }

    pub fn interface_name(&self) -> String {
        match &self.interface {
            InterfaceRef::Fixed(itf) => itf.name().to_string(),
            InterfaceRef::Generic(_) => format!("<interface of {}>", self.target.name()),
        }
    }
}

impl fmt::Debug for ExtensionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionData")
            .field("target", &self.target.name())
            .field("interface", &self.interface_name())
            .field("direct", &self.direct)
            .field("where", &self.predicate.is_some())
            .field("table", &self.table())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeBuilder;

    fn ptrs(addrs: &[usize]) -> Vec<FnPtr> {
        addrs.iter().copied().map(FnPtr::new).collect()
    }

    fn sample(table: &[usize]) -> ExtensionData {
        let widget = TypeBuilder::class("ext.Widget").build().unwrap();
        let printable = TypeBuilder::interface("ext.Printable").build().unwrap();
        ExtensionData::new(
            ExtensionTarget::Type(widget),
            InterfaceRef::Fixed(printable),
            &ptrs(table),
        )
        .unwrap()
    }

    #[test]
    fn test_state_transitions_only_move_forward() {
        let state = AtomicTableState::new();
        assert_eq!(state.load(), TableState::Unlocked);
        assert!(state.transition(TableState::Unlocked, TableState::Locked));
        assert!(!state.transition(TableState::Unlocked, TableState::Locked));
        assert!(!state.transition(TableState::Locked, TableState::Unlocked));
        assert!(state.transition(TableState::Locked, TableState::Updated));
        assert!(!state.transition(TableState::Updated, TableState::Locked));
        assert!(!state.release());
        assert_eq!(state.load(), TableState::Updated);
    }

    #[test]
    fn test_unlock_returns_to_unlocked() {
        let ext = sample(&[1]);
        ext.unlock();
        assert_eq!(ext.state(), TableState::Unlocked);
        assert!(ext.try_lock());
        ext.unlock();
        assert_eq!(ext.state(), TableState::Unlocked);
        assert!(ext.try_lock());
    }

    #[test]
    fn test_try_lock_fails_once_taken() {
        let ext = sample(&[1]);
        assert!(ext.try_lock());
        assert!(!ext.try_lock());
        ext.mark_updated();
        assert!(ext.is_updated());
        assert!(!ext.try_lock());
    }

    #[test]
    fn test_mark_updated_from_unlocked() {
        let ext = sample(&[1]);
        ext.mark_updated();
        assert_eq!(ext.state(), TableState::Updated);
    }

    #[test]
    fn test_grow_table_requires_lock() {
        let ext = sample(&[1]);
        let bigger = arena::alloc_table(&ptrs(&[1, 2]), &[]).unwrap();
        assert!(matches!(
            ext.grow_table(bigger),
            Err(DispatchError::TableNotLocked { .. })
        ));

        assert!(ext.try_lock());
        ext.grow_table(bigger).unwrap();
        assert_eq!(ext.table(), ptrs(&[1, 2]).as_slice());
        assert!(matches!(
            ext.grow_table(bigger),
            Err(DispatchError::TableAlreadyGrown { .. })
        ));
    }

    #[test]
    fn test_grow_table_never_shrinks() {
        let ext = sample(&[1, 2]);
        assert!(ext.try_lock());
        let smaller = arena::alloc_table(&ptrs(&[1]), &[]).unwrap();
        assert!(matches!(
            ext.grow_table(smaller),
            Err(DispatchError::TableShrink { from: 2, to: 1, .. })
        ));
        assert_eq!(ext.len(), 2);
    }

    #[test]
    fn test_predicate_uses_lowest_bit() {
        let ext = sample(&[]).where_clause(Box::new(|_| 0x100));
        assert!(!ext.predicate_holds(&[]));
        let ext = sample(&[]).where_clause(Box::new(|_| 0x101));
        assert!(ext.predicate_holds(&[]));
        assert!(sample(&[]).predicate_holds(&[]));
    }

    #[test]
    fn test_generic_interface_reference() {
        let int = TypeBuilder::primitive("ext.Int").build().unwrap();
        let ext = ExtensionData::new(
            ExtensionTarget::Type(int),
            InterfaceRef::Generic(Box::new(|args| Ok(args[0]))),
            &[],
        )
        .unwrap();
        assert_eq!(ext.interface_type(&[int]).unwrap().uuid(), int.uuid());
        assert!(ext.applies_to(int));
    }

    #[test]
    fn test_fn_ptr_debug() {
        assert_eq!(format!("{:?}", FnPtr::NULL), "null");
        assert_eq!(format!("{:?}", FnPtr::new(0x10)), "0x10");
    }
}
