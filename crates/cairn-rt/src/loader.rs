//! Module loader.
//!
//! Compiled modules contribute *outer* extension declarations: ones written
//! against a type from another module, or against a generic template and
//! evaluated per instantiation. The loader keeps every loaded image and
//! answers "which declarations target this type?" for the resolver.
//!
//! ## Semantics
//!
//! - Modules are loaded after all of their dependencies; a batch is ordered
//!   by [`cairn_common::topological_sort`].
//! - The generation counter equals the number of loaded modules. A dispatch
//!   map records the generation it has seen, so declarations from modules
//!   loaded later are picked up on the next lookup.
//! - Visitors run without any loader lock held: predicates may themselves
//!   trigger resolution.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use cairn_common::{topological_sort, DispatchError, LoadError, ModuleGraph, ModuleId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::extension::ExtRef;
use crate::types::TypeRef;

/// A compiled module as handed to the runtime.
#[derive(Debug, Default)]
pub struct ModuleImage {
    pub name: String,
    pub dependencies: Vec<String>,
    pub extensions: Vec<ExtRef>,
    /// Type-extension blobs, keyed by type uuid.
    pub type_exts: Vec<(u32, Vec<u8>)>,
}

impl ModuleImage {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleImage {
            name: name.into(),
            ..ModuleImage::default()
        }
    }

    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    pub fn extension(mut self, ext: ExtRef) -> Self {
        self.extensions.push(ext);
        self
    }

    pub fn type_ext(mut self, ty: TypeRef, blob: Vec<u8>) -> Self {
        self.type_exts.push((ty.uuid(), blob));
        self
    }
}

struct LoadedModule {
    name: String,
    extensions: Vec<ExtRef>,
    type_exts: FxHashMap<u32, Vec<u8>>,
}

// ---------------------------------------------------------------------------
// ModuleLoader
// ---------------------------------------------------------------------------

pub struct ModuleLoader {
    modules: RwLock<Vec<LoadedModule>>,
    generation: AtomicUsize,
}

impl ModuleLoader {
    pub fn new() -> Self {
        ModuleLoader {
            modules: RwLock::new(Vec::new()),
            generation: AtomicUsize::new(0),
        }
    }

    /// Load one module whose dependencies are already loaded.
    pub fn load(&self, image: ModuleImage) -> Result<ModuleId, LoadError> {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.name == image.name) {
            return Err(LoadError::Duplicate(image.name));
        }
        if let Some(missing) = image
            .dependencies
            .iter()
            .find(|dep| !modules.iter().any(|m| &m.name == *dep))
        {
            return Err(LoadError::UnknownDependency {
                module: image.name.clone(),
                dependency: missing.clone(),
            });
        }

        let id = ModuleId(modules.len() as u32);
        tracing::debug!(
            target: "cairn::loader",
            module = %image.name,
            extensions = image.extensions.len(),
            "module loaded"
        );
        modules.push(LoadedModule {
            name: image.name,
            extensions: image.extensions,
            type_exts: image.type_exts.into_iter().collect(),
        });
        self.generation.store(modules.len(), Ordering::Release);
        Ok(id)
    }

    /// Load a batch in dependency order. Dependencies may be satisfied by
    /// the batch itself or by modules loaded earlier.
    pub fn load_all(&self, images: Vec<ModuleImage>) -> Result<Vec<ModuleId>, LoadError> {
        let mut graph = ModuleGraph::new();
        for image in &images {
            if graph.resolve(&image.name).is_some() || self.is_loaded(&image.name) {
                return Err(LoadError::Duplicate(image.name.clone()));
            }
            graph.add_module(image.name.clone());
        }
        for (idx, image) in images.iter().enumerate() {
            let from = ModuleId(idx as u32);
            for dep in &image.dependencies {
                match graph.resolve(dep) {
                    Some(to) => graph.add_dependency(from, to),
                    None if self.is_loaded(dep) => {}
                    None => {
                        return Err(LoadError::UnknownDependency {
                            module: image.name.clone(),
                            dependency: dep.clone(),
                        })
                    }
                }
            }
        }

        let order = topological_sort(&graph)?;
        let mut slots: Vec<Option<ModuleImage>> = images.into_iter().map(Some).collect();
        let mut loaded = Vec::with_capacity(order.len());
        for id in order {
            if let Some(image) = slots[id.0 as usize].take() {
                loaded.push(self.load(image)?);
            }
        }
        Ok(loaded)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.read().iter().any(|m| m.name == name)
    }

    /// Number of modules loaded so far.
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    /// Visit declarations targeting `ty` (or its template) in the modules
    /// whose load index falls in `modules`, in load order.
    pub fn visit_extension_data(
        &self,
        ty: TypeRef,
        modules: Range<usize>,
        mut visitor: impl FnMut(ExtRef) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        let matching: Vec<ExtRef> = {
            let loaded = self.modules.read();
            let end = modules.end.min(loaded.len());
            let start = modules.start.min(end);
            loaded[start..end]
                .iter()
                .flat_map(|m| m.extensions.iter().copied())
                .filter(|ext| ext.applies_to(ty))
                .collect()
        };
        for ext in matching {
            visitor(ext)?;
        }
        Ok(())
    }

    /// The type-extension blob for `uuid`, from the most recently loaded
    /// module that carries one.
    pub fn type_ext(&self, uuid: u32) -> Option<Vec<u8>> {
        self.modules
            .read()
            .iter()
            .rev()
            .find_map(|m| m.type_exts.get(&uuid).cloned())
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_LOADER: OnceLock<ModuleLoader> = OnceLock::new();

pub fn global_loader() -> &'static ModuleLoader {
    GLOBAL_LOADER.get_or_init(ModuleLoader::new)
}
