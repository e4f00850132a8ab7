use cairn_common::DispatchError;

use super::bitmap::ResolveBitmap;
use super::info::{Field, Finalizer, InnerExtensions, Parent, TypeInfo, TypeOrigin, TypeRef, TypeShape};
use super::template::TypeTemplate;
use super::{TypeFlags, TypeKind};
use crate::arena;
use crate::extension::{ExtRef, ExtensionData, ExtensionTarget, FnPtr, InterfaceRef, TypeFn, WhereFn};
use crate::registry::global_registry;

/// Every field added through [`TypeBuilder::field`] occupies one word.
const FIELD_SLOT: u32 = 8;

type SuperFn = Box<dyn FnOnce(TypeRef) -> Result<TypeRef, DispatchError>>;

enum ParentSpec {
    None,
    Super(TypeRef),
    /// Superclass that mentions the type being built, e.g. `C <: Base<C>`.
    SuperOf(SuperFn),
    Component(TypeRef),
}

struct Declaration {
    interface: InterfaceRef,
    table: Vec<FnPtr>,
    predicate: Option<WhereFn>,
}

/// Builds and links a concrete type descriptor together with the
/// declarations compiled alongside it.
///
/// Classes get their class-chain declarations generated: a direct
/// declaration against the superclass holding the overridden prefix of
/// the vtable, followed by the class's own full vtable. Interfaces get a
/// leading self declaration holding their default methods.
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    fields: Vec<Field>,
    type_args: Vec<TypeRef>,
    parent: ParentSpec,
    origin: TypeOrigin,
    methods: Vec<FnPtr>,
    overrides: Vec<(usize, FnPtr)>,
    declarations: Vec<Declaration>,
    bitmap: bool,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeBuilder {
            name: name.into(),
            kind,
            flags: TypeFlags::NONE,
            fields: Vec::new(),
            type_args: Vec::new(),
            parent: ParentSpec::None,
            origin: TypeOrigin::Concrete { finalizer: None },
            methods: Vec::new(),
            overrides: Vec::new(),
            declarations: Vec::new(),
            bitmap: true,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Primitive)
    }

    pub fn nothing(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Nothing)
    }

    /// A compiler-generated enum that dispatches through `base`.
    pub fn temp_enum(name: impl Into<String>, base: TypeRef) -> Self {
        Self::new(name, TypeKind::TempEnum).extends(base)
    }

    pub fn tuple(name: impl Into<String>, elements: &[TypeRef]) -> Self {
        elements
            .iter()
            .fold(Self::new(name, TypeKind::Tuple), |builder, &ty| builder.field(ty))
    }

    /// A function type; the first type argument is the return type.
    pub fn function(name: impl Into<String>, ret: TypeRef, params: &[TypeRef]) -> Self {
        let mut args = Vec::with_capacity(params.len() + 1);
        args.push(ret);
        args.extend_from_slice(params);
        Self::new(name, TypeKind::Function).type_args(args)
    }

    pub fn array(name: impl Into<String>, component: TypeRef) -> Self {
        let mut builder = Self::new(name, TypeKind::RawArray);
        builder.parent = ParentSpec::Component(component);
        builder
    }

    pub fn cpointer(name: impl Into<String>, pointee: TypeRef) -> Self {
        let mut builder = Self::new(name, TypeKind::CPointer);
        builder.parent = ParentSpec::Component(pointee);
        builder
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn field(mut self, ty: TypeRef) -> Self {
        let offset = self.fields.len() as u32 * FIELD_SLOT;
        self.fields.push(Field { offset, ty });
        self
    }

    pub fn type_args(mut self, args: Vec<TypeRef>) -> Self {
        self.type_args = args;
        self
    }

    pub fn extends(mut self, parent: TypeRef) -> Self {
        self.parent = ParentSpec::Super(parent);
        self
    }

    /// Use a superclass computed from the descriptor under construction.
    pub fn extends_with(
        mut self,
        parent: impl FnOnce(TypeRef) -> Result<TypeRef, DispatchError> + 'static,
    ) -> Self {
        self.parent = ParentSpec::SuperOf(Box::new(parent));
        self
    }

    pub fn finalizer(mut self, finalizer: Finalizer) -> Self {
        self.origin = TypeOrigin::Concrete {
            finalizer: Some(finalizer),
        };
        self
    }

    /// Mark the descriptor as a compiler-emitted instantiation of `template`.
    pub fn instance_of(mut self, template: &'static TypeTemplate, args: Vec<TypeRef>) -> Self {
        self.origin = TypeOrigin::Instantiated { template };
        self.type_args = args;
        self
    }

    /// New virtual slots (classes) or default methods (interfaces).
    pub fn methods(mut self, table: Vec<FnPtr>) -> Self {
        self.methods.extend(table);
        self
    }

    /// Replace an inherited vtable slot.
    pub fn override_method(mut self, slot: usize, f: FnPtr) -> Self {
        self.overrides.push((slot, f));
        self
    }

    pub fn implements(self, interface: TypeRef, table: Vec<FnPtr>) -> Self {
        self.declare(InterfaceRef::Fixed(interface), table, None)
    }

    /// Declare an interface computed from this type's resolution arguments.
    pub fn implements_generic(
        self,
        interface: impl Fn(&[TypeRef]) -> Result<TypeRef, DispatchError> + Send + Sync + 'static,
        table: Vec<FnPtr>,
    ) -> Self {
        let interface: TypeFn = Box::new(interface);
        self.declare(InterfaceRef::Generic(interface), table, None)
    }

    pub fn implements_where(
        self,
        interface: TypeRef,
        table: Vec<FnPtr>,
        predicate: impl Fn(&[TypeRef]) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.declare(InterfaceRef::Fixed(interface), table, Some(Box::new(predicate)))
    }

    fn declare(mut self, interface: InterfaceRef, table: Vec<FnPtr>, predicate: Option<WhereFn>) -> Self {
        self.declarations.push(Declaration {
            interface,
            table,
            predicate,
        });
        self
    }

    /// Omit the resolve bitmap so every declaration takes the checked path.
    pub fn checked_resolution(mut self) -> Self {
        self.bitmap = false;
        self
    }

    pub fn build(self) -> Result<TypeRef, DispatchError> {
        let registry = global_registry();
        let shape = TypeShape {
            name: self.name,
            kind: self.kind,
            flags: self.flags,
            size: self.fields.len() as u32 * FIELD_SLOT,
            fields: self.fields,
            type_args: self.type_args,
            origin: self.origin,
        };
        let ty: TypeRef = arena::alloc(TypeInfo::new(registry.next_uuid(), shape));

        let parent = match self.parent {
            ParentSpec::None => Parent::None,
            ParentSpec::Super(parent) => Parent::Super(parent),
            ParentSpec::SuperOf(compute) => Parent::Super(compute(ty)?),
            ParentSpec::Component(component) => Parent::Component(component),
        };
        ty.link_parent(parent);

        let mut decls: Vec<ExtRef> = Vec::new();
        match ty.kind() {
            TypeKind::Interface => {
                decls.push(own_declaration(ty, &self.methods)?);
            }
            TypeKind::Class => {
                // Instantiated superclasses carry no inner vtable; their
                // slots come from outer declarations.
                let mut vtable = match parent {
                    Parent::Super(sup) => sup
                        .inner_extensions()
                        .filter(|_| sup.is_class())
                        .and_then(|inner| inner.chain().last())
                        .map(|own| own.table().to_vec())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                let inherited = vtable.len();
                for (slot, f) in self.overrides {
                    let entry = vtable.get_mut(slot).ok_or(DispatchError::IndexOutOfRange {
                        what: "vtable slot",
                        index: slot,
                        len: inherited,
                    })?;
                    *entry = f;
                }
                vtable.extend(self.methods);
                if let Parent::Super(sup) = parent {
                    let chain = ExtensionData::new(
                        ExtensionTarget::Type(ty),
                        InterfaceRef::Fixed(sup),
                        &vtable[..inherited],
                    )?
                    .direct(true);
                    decls.push(chain.leak());
                }
                decls.push(own_declaration(ty, &vtable)?);
            }
            _ => {}
        }
        let inherit_count = decls.len();

        for declaration in self.declarations {
            let mut ext = ExtensionData::new(
                ExtensionTarget::Type(ty),
                declaration.interface,
                &declaration.table,
            )?
            .direct(true);
            if let Some(predicate) = declaration.predicate {
                ext = ext.where_clause(predicate);
            }
            decls.push(ext.leak());
        }

        let bitmap = self.bitmap.then(|| {
            let flags: Vec<bool> = decls[inherit_count..]
                .iter()
                .map(|ext| ext.applies_to(ty))
                .collect();
            ResolveBitmap::from_flags(&flags)
        });
        ty.link_extensions(InnerExtensions {
            decls,
            inherit_count,
            bitmap,
        });

        let ty = registry.intern_type(ty);
        tracing::trace!(target: "cairn::loader", ty = %ty, uuid = ty.uuid(), "type linked");
        Ok(ty)
    }
}

fn own_declaration(ty: TypeRef, table: &[FnPtr]) -> Result<ExtRef, DispatchError> {
    Ok(ExtensionData::new(ExtensionTarget::Type(ty), InterfaceRef::Fixed(ty), table)?.leak())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TemplateBuilder;

    fn f(addr: usize) -> FnPtr {
        FnPtr::new(addr)
    }

    #[test]
    fn test_class_chain_declarations() {
        let base = TypeBuilder::class("b.Base")
            .methods(vec![f(1), f(2)])
            .build()
            .unwrap();
        let derived = TypeBuilder::class("b.Derived")
            .extends(base)
            .override_method(1, f(20))
            .methods(vec![f(3)])
            .build()
            .unwrap();

        let inner = derived.inner_extensions().unwrap();
        assert_eq!(inner.inherit_count, 2);
        let chain = inner.chain();
        assert!(chain[0].is_direct());
        assert_eq!(chain[0].table(), &[f(1), f(20)]);
        assert_eq!(chain[1].table(), &[f(1), f(20), f(3)]);
        assert_eq!(derived.self_declaration().unwrap().table(), &[f(1), f(20), f(3)]);
        assert_eq!(derived.super_type().unwrap().uuid(), base.uuid());
    }

    #[test]
    fn test_override_out_of_range() {
        let base = TypeBuilder::class("b.Small").methods(vec![f(1)]).build().unwrap();
        let err = TypeBuilder::class("b.Bad")
            .extends(base)
            .override_method(3, f(9))
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::IndexOutOfRange { what: "vtable slot", .. }));
    }

    #[test]
    fn test_interface_self_declaration_holds_defaults() {
        let shape = TypeBuilder::interface("b.Shape")
            .methods(vec![FnPtr::NULL, f(5)])
            .build()
            .unwrap();
        let own = shape.self_declaration().unwrap();
        assert_eq!(own.table(), &[FnPtr::NULL, f(5)]);
        assert!(!own.is_direct());
    }

    #[test]
    fn test_declarations_follow_chain_with_bitmap() {
        let shape = TypeBuilder::interface("b.Drawable").build().unwrap();
        let circle = TypeBuilder::class("b.Circle")
            .implements(shape, vec![])
            .build()
            .unwrap();
        let inner = circle.inner_extensions().unwrap();
        assert_eq!(inner.inherit_count, 1);
        assert_eq!(inner.local().len(), 1);
        assert_eq!(inner.bitmap, Some(ResolveBitmap::Short(0b1)));

        let checked = TypeBuilder::class("b.Square")
            .implements(shape, vec![])
            .checked_resolution()
            .build()
            .unwrap();
        assert!(checked.inner_extensions().unwrap().bitmap.is_none());
    }

    #[test]
    fn test_self_referential_superclass() {
        let base = TemplateBuilder::class("b.Comparable", 1).build();
        let node = TypeBuilder::class("b.Node")
            .extends_with(move |this| base.instantiate(&[this]))
            .build()
            .unwrap();
        let sup = node.super_type().unwrap();
        assert_eq!(sup.type_args()[0].uuid(), node.uuid());
        assert_eq!(sup.name(), "b.Comparable<b.Node>");
    }

    #[test]
    fn test_tuple_and_array_shapes() {
        let int = TypeBuilder::primitive("b.Int").build().unwrap();
        let pair = TypeBuilder::tuple("(b.Int, b.Int)", &[int, int]).build().unwrap();
        assert_eq!(pair.field_count(), 2);
        assert_eq!(pair.field_offset(1), 8);
        assert!(pair.try_field_offset(2).is_err());

        let array = TypeBuilder::array("RawArray<b.Int>", int).build().unwrap();
        assert!(array.super_type().is_none());
        assert_eq!(array.component_type().unwrap().uuid(), int.uuid());
        assert_eq!(array.resolution_args()[0].uuid(), int.uuid());
    }
}
