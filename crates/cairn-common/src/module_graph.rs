//! Dependency graph of compiled module images.
//!
//! The runtime loads a batch of modules in dependency order so that a
//! module's extension declarations never become visible before the
//! declarations of the modules it was compiled against. [`ModuleGraph`]
//! records the batch and [`topological_sort`] produces the load order.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Index of a module within a [`ModuleGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ModuleId(pub u32);

/// A single module image awaiting load.
#[derive(Debug)]
pub struct ModuleNode {
    pub id: ModuleId,
    /// Fully qualified module name, e.g. `"std.collections"`.
    pub name: String,
    /// Modules in the same batch that must be loaded first.
    pub dependencies: Vec<ModuleId>,
}

/// Error returned when module dependencies form a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// The module names forming the cycle, e.g. `["a", "b", "a"]`.
    pub cycle_path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cycle_path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// A directed graph of module images and their dependencies.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    pub modules: Vec<ModuleNode>,
    name_to_id: FxHashMap<String, ModuleId>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module and return its sequentially assigned [`ModuleId`].
    pub fn add_module(&mut self, name: impl Into<String>) -> ModuleId {
        let name = name.into();
        let id = ModuleId(self.modules.len() as u32);
        self.name_to_id.insert(name.clone(), id);
        self.modules.push(ModuleNode {
            id,
            name,
            dependencies: Vec::new(),
        });
        id
    }

    pub fn resolve(&self, name: &str) -> Option<ModuleId> {
        self.name_to_id.get(name).copied()
    }

    /// Record that `from` must be loaded after `to`. Duplicates are ignored.
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        let deps = &mut self.modules[from.0 as usize].dependencies;
        if !deps.contains(&to) {
            deps.push(to);
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn get(&self, id: ModuleId) -> &ModuleNode {
        &self.modules[id.0 as usize]
    }
}

/// Order modules so every module follows its dependencies (Kahn's algorithm).
///
/// Ties are broken by module name so the load order, and with it the
/// insertion order of outer declarations, is deterministic.
pub fn topological_sort(graph: &ModuleGraph) -> Result<Vec<ModuleId>, CycleError> {
    let n = graph.modules.len();
    let mut pending: Vec<u32> = graph
        .modules
        .iter()
        .map(|m| m.dependencies.len() as u32)
        .collect();

    let mut ready: Vec<ModuleId> = (0..n)
        .filter(|&i| pending[i] == 0)
        .map(|i| ModuleId(i as u32))
        .collect();
    sort_by_name(graph, &mut ready);

    let mut queue = VecDeque::from(ready);
    let mut order = Vec::with_capacity(n);

    while let Some(id) = queue.pop_front() {
        order.push(id);
        let mut unblocked = Vec::new();
        for (i, module) in graph.modules.iter().enumerate() {
            if pending[i] > 0 && module.dependencies.contains(&id) {
                pending[i] -= 1;
                if pending[i] == 0 {
                    unblocked.push(ModuleId(i as u32));
                }
            }
        }
        sort_by_name(graph, &mut unblocked);
        queue.extend(unblocked);
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err(CycleError {
            cycle_path: extract_cycle_path(graph, &pending),
        })
    }
}

fn sort_by_name(graph: &ModuleGraph, ids: &mut [ModuleId]) {
    ids.sort_by(|a, b| graph.get(*a).name.cmp(&graph.get(*b).name));
}

/// Follow dependency edges among blocked modules until one repeats.
fn extract_cycle_path(graph: &ModuleGraph, pending: &[u32]) -> Vec<String> {
    let Some(start) = (0..graph.modules.len()).find(|&i| pending[i] > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut visited = vec![false; graph.modules.len()];
    let mut current = start;

    while !visited[current] {
        visited[current] = true;
        path.push(current);
        match graph.modules[current]
            .dependencies
            .iter()
            .find(|dep| pending[dep.0 as usize] > 0)
        {
            Some(dep) => current = dep.0 as usize,
            None => break,
        }
    }

    let begin = path.iter().position(|&i| i == current).unwrap_or(0);
    let mut cycle: Vec<String> = path[begin..]
        .iter()
        .map(|&i| graph.modules[i].name.clone())
        .collect();
    cycle.push(graph.modules[current].name.clone());
    cycle
}
