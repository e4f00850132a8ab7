//! Runtime subtype checks.

use cairn_common::DispatchError;

use super::find_record;
use crate::registry::global_registry;
use crate::types::TypeRef;

pub(crate) fn is_subtype(a: TypeRef, b: TypeRef) -> Result<bool, DispatchError> {
    if a.uuid() == b.uuid() || a.is_nothing() {
        return Ok(true);
    }
    if a.is_tuple() && b.is_tuple() {
        return tuple_subtype(a, b);
    }
    if b.is_function() {
        return function_subtype(a, b);
    }
    if a.is_class() && b.is_class() {
        return class_subtype(a, b);
    }
    if b.is_interface() {
        return interface_subtype(a, b);
    }
    Ok(false)
}

fn tuple_subtype(a: TypeRef, b: TypeRef) -> Result<bool, DispatchError> {
    if a.field_count() != b.field_count() {
        return Ok(false);
    }
    for idx in 0..a.field_count() {
        if !is_subtype(a.try_field_type(idx)?, b.try_field_type(idx)?)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Function types are covariant in the return type (argument 0) and
/// contravariant in the parameters. A closure class is viewed through its
/// function-typed supertype.
fn function_subtype(a: TypeRef, b: TypeRef) -> Result<bool, DispatchError> {
    let func = if a.is_function() {
        a
    } else {
        match a.super_type() {
            Some(sup) if a.is_class() && sup.is_function() => sup,
            _ => return Ok(false),
        }
    };
    let (Some((a_ret, a_params)), Some((b_ret, b_params))) =
        (func.type_args().split_first(), b.type_args().split_first())
    else {
        return Ok(false);
    };
    if a_params.len() != b_params.len() || !is_subtype(a_ret, b_ret)? {
        return Ok(false);
    }
    for (&a_param, &b_param) in a_params.iter().zip(b_params) {
        if !is_subtype(b_param, a_param)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn class_subtype(a: TypeRef, b: TypeRef) -> Result<bool, DispatchError> {
    if a.super_type().is_some_and(|sup| sup.is_function()) {
        return Ok(false);
    }
    if b.uuid() == global_registry().well_known().object.uuid() {
        return Ok(true);
    }
    let mut current = a.super_type();
    while let Some(ty) = current {
        if ty.uuid() == b.uuid() {
            return Ok(true);
        }
        current = ty.super_type();
    }
    Ok(false)
}

fn interface_subtype(a: TypeRef, b: TypeRef) -> Result<bool, DispatchError> {
    if a.is_temp_enum() {
        if let Some(base) = a.super_type() {
            return is_subtype(base, b);
        }
    }
    if b.uuid() == global_registry().well_known().any.uuid() {
        return Ok(true);
    }
    Ok(find_record(a, b, true)?.is_some())
}
