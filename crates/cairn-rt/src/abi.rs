//! Entry points called by compiled code.
//!
//! Descriptors cross the boundary as `*const TypeInfo`. A null descriptor,
//! like every other dispatch error, is fatal.

use std::ptr;

use cairn_common::DispatchError;

use crate::config::config;
use crate::extension::FnPtr;
use crate::fault::OrFatal;
use crate::logging::init_logging;
use crate::registry::global_registry;
use crate::types::{TypeInfo, TypeRef};

fn try_descriptor(ty: *const TypeInfo, param: &'static str) -> Result<TypeRef, DispatchError> {
    // SAFETY: compiled code only passes descriptors produced by this
    // runtime, which live for the rest of the process.
    unsafe { ty.as_ref() }.ok_or(DispatchError::NullDescriptor { param })
}

fn descriptor(ty: *const TypeInfo, param: &'static str) -> TypeRef {
    try_descriptor(ty, param).or_fatal()
}

/// Initialize logging and the well-known types.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[no_mangle]
pub extern "C" fn cairn_rt_init() {
    init_logging(config());
    global_registry().well_known();
}

/// The table implementing `itf` for `ty`, grown to `itf`'s current length.
#[no_mangle]
pub extern "C" fn cairn_get_dispatch_table(
    ty: *const TypeInfo,
    itf: *const TypeInfo,
) -> *const FnPtr {
    let ty = descriptor(ty, "ty");
    let itf = descriptor(itf, "itf");
    ty.dispatch_table(itf).as_ptr()
}

#[no_mangle]
pub extern "C" fn cairn_is_subtype(a: *const TypeInfo, b: *const TypeInfo) -> bool {
    descriptor(a, "a").is_subtype(descriptor(b, "b"))
}

/// The type supplying slot `slot` of `ty`'s table for `itf`, or null if
/// `ty` has not been resolved yet.
#[no_mangle]
pub extern "C" fn cairn_method_owner(
    ty: *const TypeInfo,
    itf: *const TypeInfo,
    slot: u64,
) -> *const TypeInfo {
    let ty = descriptor(ty, "ty");
    let itf = descriptor(itf, "itf");
    match ty.owner_of(itf, slot as usize) {
        Some(owner) => ptr::from_ref(owner),
        None => ptr::null(),
    }
}

/// Write up to `cap` interfaces satisfied by `ty` to `out` and return the
/// total count. Call with `cap == 0` to size the buffer.
#[no_mangle]
pub extern "C" fn cairn_enumerate_interfaces(
    ty: *const TypeInfo,
    out: *mut *const TypeInfo,
    cap: u64,
) -> u64 {
    let interfaces = descriptor(ty, "ty").satisfied_interfaces();
    if !out.is_null() {
        for (idx, itf) in interfaces.iter().take(cap as usize).enumerate() {
            // SAFETY: the caller provides room for `cap` entries.
            unsafe { *out.add(idx) = ptr::from_ref(*itf) };
        }
    }
    interfaces.len() as u64
}
