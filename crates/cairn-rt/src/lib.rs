//! Cairn runtime library: type descriptors and interface dispatch.
//!
//! This crate provides the runtime metadata support that compiled Cairn
//! programs call into. It is compiled as both:
//!
//! - A static library (`libcairn_rt.a`) for linking into Cairn binaries
//! - A Rust library (`lib`) for embedding and unit testing
//!
//! ## Modules
//!
//! - [`types`]: type descriptors, generic templates and their builders
//! - [`extension`]: extension declarations and their function tables
//! - [`dispatch`]: lazy dispatch maps, table growth, slot owners, subtyping
//! - [`registry`]: global type identity and instantiation interning
//! - [`loader`]: module images and their outer declarations
//! - [`arena`]: process-lifetime metadata allocation
//! - [`config`], [`logging`], [`fault`]: runtime configuration, tracing
//!   setup and the fatal-error handler
//! - [`abi`]: `extern "C"` entry points
//!
//! ## ABI Contract
//!
//! All public `extern "C"` functions in this crate form the runtime ABI.
//! Descriptors and tables they return are never freed or moved.

pub mod abi;
pub mod arena;
pub mod config;
pub mod dispatch;
pub mod extension;
pub mod fault;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod types;

pub use abi::{
    cairn_enumerate_interfaces, cairn_get_dispatch_table, cairn_is_subtype, cairn_method_owner,
    cairn_rt_init,
};
pub use cairn_common::{DispatchError, LoadError};
pub use config::{FaultPolicy, LogStyle, RuntimeConfig};
pub use dispatch::{DispatchMap, Resolution};
pub use extension::{ExtRef, ExtensionData, ExtensionTarget, FnPtr, InterfaceRef, TableState};
pub use loader::{global_loader, ModuleImage, ModuleLoader};
pub use registry::{global_registry, TypeRegistry, WellKnownTypes};
pub use types::{TemplateBuilder, TypeBuilder, TypeFlags, TypeInfo, TypeKind, TypeRef, TypeTemplate};
