//! Process-lifetime arena for runtime metadata.
//!
//! Type descriptors, extension declarations, dispatch maps and function
//! tables are never freed or moved: compiled code holds raw pointers to
//! them for the rest of the program. Function tables are bump-allocated
//! from leaked pages; everything else is leaked individually.
//!
//! Allocation failure is reported as [`DispatchError::AllocationFailed`].

use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use cairn_common::DispatchError;
use parking_lot::Mutex;

use crate::extension::FnPtr;

/// Slots per table page: 4 KiB worth of code pointers.
const PAGE_SLOTS: usize = 512;

struct TableArena {
    /// Unused tail of the current page.
    free: &'static mut [FnPtr],
}

impl TableArena {
    fn new() -> Self {
        TableArena {
            free: Default::default(),
        }
    }

    fn alloc(&mut self, len: usize) -> Result<&'static mut [FnPtr], DispatchError> {
        if len > self.free.len() {
            let page_len = len.max(PAGE_SLOTS);
            self.free = new_page(page_len)?;
            STATS.pages.fetch_add(1, Ordering::Relaxed);
        }
        let free = std::mem::take(&mut self.free);
        let (table, rest) = free.split_at_mut(len);
        self.free = rest;
        Ok(table)
    }
}

fn new_page(slots: usize) -> Result<&'static mut [FnPtr], DispatchError> {
    let failed = || DispatchError::AllocationFailed {
        bytes: slots.saturating_mul(size_of::<FnPtr>()),
    };
    let mut page: Vec<FnPtr> = Vec::new();
    page.try_reserve_exact(slots).map_err(|_| failed())?;
    page.resize(slots, FnPtr::NULL);
    Ok(Box::leak(page.into_boxed_slice()))
}

static TABLES: Mutex<Option<TableArena>> = parking_lot::const_mutex(None);

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

struct Stats {
    pages: AtomicUsize,
    tables: AtomicUsize,
    table_slots: AtomicUsize,
    objects: AtomicUsize,
}

static STATS: Stats = Stats {
    pages: AtomicUsize::new(0),
    tables: AtomicUsize::new(0),
    table_slots: AtomicUsize::new(0),
    objects: AtomicUsize::new(0),
};

/// A snapshot of arena usage since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub pages: usize,
    pub tables: usize,
    pub table_slots: usize,
    pub objects: usize,
}

pub fn stats() -> ArenaStats {
    ArenaStats {
        pages: STATS.pages.load(Ordering::Relaxed),
        tables: STATS.tables.load(Ordering::Relaxed),
        table_slots: STATS.table_slots.load(Ordering::Relaxed),
        objects: STATS.objects.load(Ordering::Relaxed),
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Allocate a table holding `prefix` followed by `tail`.
pub fn alloc_table(prefix: &[FnPtr], tail: &[FnPtr]) -> Result<&'static [FnPtr], DispatchError> {
    let len = prefix
        .len()
        .checked_add(tail.len())
        .ok_or(DispatchError::AllocationFailed { bytes: usize::MAX })?;
    let table = TABLES
        .lock()
        .get_or_insert_with(TableArena::new)
        .alloc(len)?;
    table[..prefix.len()].copy_from_slice(prefix);
    table[prefix.len()..].copy_from_slice(tail);
    STATS.tables.fetch_add(1, Ordering::Relaxed);
    STATS.table_slots.fetch_add(len, Ordering::Relaxed);
    Ok(table)
}

/// Move `value` into process-lifetime storage.
pub fn alloc<T: Send + Sync + 'static>(value: T) -> &'static T {
    STATS.objects.fetch_add(1, Ordering::Relaxed);
    Box::leak(Box::new(value))
}
