//! Global type registry.
//!
//! Owns type identity for the whole process: it hands out uuids, interns
//! descriptors and template instantiations by identity, interns dispatch
//! map shells per source uuid, and holds the well-known types.
//!
//! ## Semantics
//!
//! - A uuid is never reused; 0 is never allocated.
//! - Interning is first-use: the first descriptor registered under a uuid
//!   (or instantiation key) is canonical, later ones resolve to it.
//! - Descriptors sharing a uuid share one dispatch map.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::arena;
use crate::dispatch::DispatchMap;
use crate::fault::OrFatal;
use crate::types::{TypeBuilder, TypeRef, TypeTemplate};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    template: u32,
    args: Vec<u32>,
}

impl InstanceKey {
    fn new(template: u32, args: &[TypeRef]) -> Self {
        InstanceKey {
            template,
            args: args.iter().map(|arg| arg.uuid()).collect(),
        }
    }
}

/// The universal top class, top interface and bottom type.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownTypes {
    pub object: TypeRef,
    pub any: TypeRef,
    pub nothing: TypeRef,
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

pub struct TypeRegistry {
    next_uuid: AtomicU32,
    types: RwLock<FxHashMap<u32, TypeRef>>,
    templates: RwLock<FxHashMap<u32, &'static TypeTemplate>>,
    instances: RwLock<FxHashMap<InstanceKey, TypeRef>>,
    maps: RwLock<FxHashMap<u32, &'static DispatchMap>>,
    well_known: OnceLock<WellKnownTypes>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            next_uuid: AtomicU32::new(1),
            types: RwLock::new(FxHashMap::default()),
            templates: RwLock::new(FxHashMap::default()),
            instances: RwLock::new(FxHashMap::default()),
            maps: RwLock::new(FxHashMap::default()),
            well_known: OnceLock::new(),
        }
    }

    pub fn next_uuid(&self) -> u32 {
        self.next_uuid.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `ty`, returning the canonical descriptor for its uuid.
    pub fn intern_type(&self, ty: TypeRef) -> TypeRef {
        if let Some(&existing) = self.types.read().get(&ty.uuid()) {
            return existing;
        }
        *self.types.write().entry(ty.uuid()).or_insert(ty)
    }

    pub fn lookup(&self, uuid: u32) -> Option<TypeRef> {
        self.types.read().get(&uuid).copied()
    }

    pub fn register_template(&self, template: &'static TypeTemplate) {
        self.templates.write().entry(template.uuid()).or_insert(template);
    }

    pub fn lookup_template(&self, uuid: u32) -> Option<&'static TypeTemplate> {
        self.templates.read().get(&uuid).copied()
    }

    pub fn instance(&self, template: u32, args: &[TypeRef]) -> Option<TypeRef> {
        self.instances
            .read()
            .get(&InstanceKey::new(template, args))
            .copied()
    }

    /// Register an instantiation; the first registration for a key wins.
    pub fn intern_instance(&self, template: u32, args: &[TypeRef], ty: TypeRef) -> TypeRef {
        let canonical = *self
            .instances
            .write()
            .entry(InstanceKey::new(template, args))
            .or_insert(ty);
        self.intern_type(canonical)
    }

    /// The dispatch map shell for `uuid`, created on first request.
    pub fn dispatch_map_for(&self, uuid: u32) -> &'static DispatchMap {
        if let Some(&map) = self.maps.read().get(&uuid) {
            return map;
        }
        *self
            .maps
            .write()
            .entry(uuid)
            .or_insert_with(|| arena::alloc(DispatchMap::new(uuid)))
    }

    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }

    pub fn well_known(&self) -> WellKnownTypes {
        *self.well_known.get_or_init(|| WellKnownTypes {
            object: TypeBuilder::class("Object").build().or_fatal(),
            any: TypeBuilder::interface("Any").build().or_fatal(),
            nothing: TypeBuilder::nothing("Nothing").build().or_fatal(),
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global registry instance
// ---------------------------------------------------------------------------

static GLOBAL_REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

pub fn global_registry() -> &'static TypeRegistry {
    GLOBAL_REGISTRY.get_or_init(TypeRegistry::new)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
