use std::fmt;

use cairn_common::DispatchError;

use super::info::{Field, Finalizer, InnerExtensions, Parent, TypeInfo, TypeOrigin, TypeRef, TypeShape};
use super::{TypeFlags, TypeKind};
use crate::arena;
use crate::extension::{ExtensionData, ExtensionTarget, InterfaceRef, TypeFn};
use crate::registry::global_registry;

/// Every field of an instantiation occupies one word.
const FIELD_SLOT: u32 = 8;

/// Blueprint for a family of types.
///
/// Field types and the supertype depend on the type arguments, so they are
/// stored as functions and evaluated per instantiation.
pub struct TypeTemplate {
    uuid: u32,
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    param_count: usize,
    finalizer: Option<Finalizer>,
    field_fns: Vec<TypeFn>,
    super_fn: Option<TypeFn>,
}

impl TypeTemplate {
    pub fn uuid(&self) -> u32 {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn field_count(&self) -> usize {
        self.field_fns.len()
    }

    pub fn finalizer(&self) -> Option<Finalizer> {
        self.finalizer
    }

    pub fn field_type(&self, idx: usize, args: &[TypeRef]) -> Result<TypeRef, DispatchError> {
        let resolve = self.field_fns.get(idx).ok_or(DispatchError::IndexOutOfRange {
            what: "template field",
            index: idx,
            len: self.field_fns.len(),
        })?;
        resolve(args)
    }

    pub fn super_type(&self, args: &[TypeRef]) -> Result<Option<TypeRef>, DispatchError> {
        self.super_fn.as_ref().map(|resolve| resolve(args)).transpose()
    }

    /// Display name of the instantiation with `args`: `Name<A, B>`, or
    /// `(P1, P2)->R` for C function types whose first argument is the
    /// return type.
    pub fn type_info_name(&self, args: &[TypeRef]) -> String {
        let names = |args: &[TypeRef]| {
            args.iter()
                .map(|arg| arg.name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match (self.kind, args.split_first()) {
            (TypeKind::CFunc, Some((ret, params))) => {
                format!("({})->{}", names(params), ret.name())
            }
            _ => format!("{}<{}>", self.name, names(args)),
        }
    }

    /// Intern the instantiation of this template with `args`.
    ///
    /// Concurrent first instantiations may both build a descriptor; the
    /// first one registered wins and the other is discarded.
    pub fn instantiate(&'static self, args: &[TypeRef]) -> Result<TypeRef, DispatchError> {
        if args.len() != self.param_count {
            return Err(DispatchError::ArityMismatch {
                template: self.name.clone(),
                expected: self.param_count,
                found: args.len(),
            });
        }
        let registry = global_registry();
        if let Some(existing) = registry.instance(self.uuid, args) {
            return Ok(existing);
        }

        let parent = match self.super_type(args)? {
            Some(super_type) => Parent::Super(super_type),
            None => Parent::None,
        };
        let fields = (0..self.field_fns.len())
            .map(|idx| {
                Ok(Field {
                    offset: idx as u32 * FIELD_SLOT,
                    ty: self.field_type(idx, args)?,
                })
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;
        let shape = TypeShape {
            name: self.type_info_name(args),
            kind: self.kind,
            flags: self.flags,
            size: fields.len() as u32 * FIELD_SLOT,
            fields,
            type_args: args.to_vec(),
            origin: TypeOrigin::Instantiated { template: self },
        };
        let ty: TypeRef = arena::alloc(TypeInfo::new(registry.next_uuid(), shape));
        ty.link_parent(parent);
        if self.kind == TypeKind::Class {
            ty.link_extensions(class_chain(ty, parent)?);
        }

        let interned = registry.intern_instance(self.uuid, args, ty);
        if std::ptr::eq(interned, ty) {
            tracing::trace!(target: "cairn::resolve", ty = %ty, uuid = ty.uuid(), "instantiated");
        }
        Ok(interned)
    }
}

/// Instantiated classes carry no vtable of their own; their chain only
/// records the superclass link and an empty own table.
fn class_chain(ty: TypeRef, parent: Parent) -> Result<InnerExtensions, DispatchError> {
    let mut decls = Vec::with_capacity(2);
    if let Parent::Super(sup) = parent {
        let chain = ExtensionData::new(ExtensionTarget::Type(ty), InterfaceRef::Fixed(sup), &[])?;
        decls.push(chain.direct(true).leak());
    }
    decls.push(ExtensionData::new(ExtensionTarget::Type(ty), InterfaceRef::Fixed(ty), &[])?.leak());
    Ok(InnerExtensions {
        inherit_count: decls.len(),
        decls,
        bitmap: None,
    })
}

impl fmt::Debug for TypeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>#{}", self.name, self.param_count, self.uuid)
    }
}

// ---------------------------------------------------------------------------
// TemplateBuilder
// ---------------------------------------------------------------------------

pub struct TemplateBuilder {
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    param_count: usize,
    finalizer: Option<Finalizer>,
    field_fns: Vec<TypeFn>,
    super_fn: Option<TypeFn>,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>, kind: TypeKind, param_count: usize) -> Self {
        TemplateBuilder {
            name: name.into(),
            kind,
            flags: TypeFlags::NONE,
            param_count,
            finalizer: None,
            field_fns: Vec::new(),
            super_fn: None,
        }
    }

    pub fn class(name: impl Into<String>, param_count: usize) -> Self {
        Self::new(name, TypeKind::Class, param_count)
    }

    pub fn interface(name: impl Into<String>, param_count: usize) -> Self {
        Self::new(name, TypeKind::Interface, param_count)
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn field(
        mut self,
        resolve: impl Fn(&[TypeRef]) -> Result<TypeRef, DispatchError> + Send + Sync + 'static,
    ) -> Self {
        self.field_fns.push(Box::new(resolve));
        self
    }

    pub fn extends(
        mut self,
        resolve: impl Fn(&[TypeRef]) -> Result<TypeRef, DispatchError> + Send + Sync + 'static,
    ) -> Self {
        self.super_fn = Some(Box::new(resolve));
        self
    }

    pub fn build(self) -> &'static TypeTemplate {
        let registry = global_registry();
        let template = arena::alloc(TypeTemplate {
            uuid: registry.next_uuid(),
            name: self.name,
            kind: self.kind,
            flags: self.flags,
            param_count: self.param_count,
            finalizer: self.finalizer,
            field_fns: self.field_fns,
            super_fn: self.super_fn,
        });
        registry.register_template(template);
        template
    }
}
