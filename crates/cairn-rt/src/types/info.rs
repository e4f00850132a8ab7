use std::fmt;
use std::sync::OnceLock;

use cairn_common::DispatchError;

use super::bitmap::ResolveBitmap;
use super::template::TypeTemplate;
use super::{TypeFlags, TypeKind};
use crate::dispatch::DispatchMap;
use crate::extension::ExtRef;
use crate::fault::OrFatal;
use crate::loader::global_loader;
use crate::registry::global_registry;

/// A descriptor with process lifetime.
pub type TypeRef = &'static TypeInfo;

pub type Finalizer = extern "C" fn(*mut u8);

/// The type a descriptor derives from.
#[derive(Clone, Copy)]
pub enum Parent {
    None,
    Super(TypeRef),
    /// Element type of an array or pointee of a pointer.
    Component(TypeRef),
}

/// Where a descriptor came from.
#[derive(Clone, Copy)]
pub enum TypeOrigin {
    Concrete { finalizer: Option<Finalizer> },
    Instantiated { template: &'static TypeTemplate },
}

#[derive(Clone, Copy)]
pub struct Field {
    pub offset: u32,
    pub ty: TypeRef,
}

/// The declarations compiled together with a type.
///
/// The first `inherit_count` entries describe the class chain: a direct
/// declaration against the superclass, then the type's own table. They are
/// followed by the type's interface declarations.
pub struct InnerExtensions {
    pub decls: Vec<ExtRef>,
    pub inherit_count: usize,
    pub bitmap: Option<ResolveBitmap>,
}

impl InnerExtensions {
    pub fn chain(&self) -> &[ExtRef] {
        &self.decls[..self.inherit_count.min(self.decls.len())]
    }

    pub fn local(&self) -> &[ExtRef] {
        &self.decls[self.inherit_count.min(self.decls.len())..]
    }
}

/// Shape information fixed at construction.
pub(crate) struct TypeShape {
    pub name: String,
    pub kind: TypeKind,
    pub flags: TypeFlags,
    pub size: u32,
    pub fields: Vec<Field>,
    pub type_args: Vec<TypeRef>,
    pub origin: TypeOrigin,
}

pub struct TypeInfo {
    uuid: u32,
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    size: u32,
    fields: Vec<Field>,
    type_args: Vec<TypeRef>,
    origin: TypeOrigin,
    // Set once while the descriptor is linked.
    parent: OnceLock<Parent>,
    extensions: OnceLock<InnerExtensions>,
    dispatch: OnceLock<&'static DispatchMap>,
}

impl TypeInfo {
    pub(crate) fn new(uuid: u32, shape: TypeShape) -> Self {
        TypeInfo {
            uuid,
            name: shape.name,
            kind: shape.kind,
            flags: shape.flags,
            size: shape.size,
            fields: shape.fields,
            type_args: shape.type_args,
            origin: shape.origin,
            parent: OnceLock::new(),
            extensions: OnceLock::new(),
            dispatch: OnceLock::new(),
        }
    }

    pub(crate) fn link_parent(&self, parent: Parent) {
        let _ = self.parent.set(parent);
    }

    pub(crate) fn link_extensions(&self, extensions: InnerExtensions) {
        let _ = self.extensions.set(extensions);
    }

    // ---- Identity and kind ----

    pub fn uuid(&self) -> u32 {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_struct(&self) -> bool {
        self.kind == TypeKind::Struct
    }

    pub fn is_tuple(&self) -> bool {
        self.kind == TypeKind::Tuple
    }

    pub fn is_function(&self) -> bool {
        self.kind == TypeKind::Function
    }

    pub fn is_nothing(&self) -> bool {
        self.kind == TypeKind::Nothing
    }

    pub fn is_temp_enum(&self) -> bool {
        self.kind == TypeKind::TempEnum
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::RawArray | TypeKind::VArray)
    }

    pub fn is_cpointer(&self) -> bool {
        self.kind == TypeKind::CPointer
    }

    // ---- Fields ----

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn try_field_offset(&self, idx: usize) -> Result<u32, DispatchError> {
        self.field(idx).map(|f| f.offset)
    }

    pub fn try_field_type(&self, idx: usize) -> Result<TypeRef, DispatchError> {
        self.field(idx).map(|f| f.ty)
    }

    /// Offset of field `idx`. An out-of-range index is fatal.
    pub fn field_offset(&self, idx: usize) -> u32 {
        self.try_field_offset(idx).or_fatal()
    }

    /// Type of field `idx`. An out-of-range index is fatal.
    pub fn field_type(&self, idx: usize) -> TypeRef {
        self.try_field_type(idx).or_fatal()
    }

    fn field(&self, idx: usize) -> Result<&Field, DispatchError> {
        self.fields.get(idx).ok_or(DispatchError::IndexOutOfRange {
            what: "field",
            index: idx,
            len: self.fields.len(),
        })
    }

    // ---- Ancestry ----

    pub fn parent(&self) -> Parent {
        self.parent.get().copied().unwrap_or(Parent::None)
    }

    pub fn super_type(&self) -> Option<TypeRef> {
        match self.parent() {
            Parent::Super(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn component_type(&self) -> Option<TypeRef> {
        match self.parent() {
            Parent::Component(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn type_args(&self) -> &[TypeRef] {
        &self.type_args
    }

    /// The arguments declarations are evaluated against: the component
    /// type for arrays and pointers, the type arguments otherwise.
    pub fn resolution_args(&self) -> Vec<TypeRef> {
        match self.component_type() {
            Some(component) if self.kind.is_array_like() => vec![component],
            _ => self.type_args.clone(),
        }
    }

    // ---- Origin ----

    pub fn origin(&self) -> TypeOrigin {
        self.origin
    }

    pub fn template(&self) -> Option<&'static TypeTemplate> {
        match self.origin {
            TypeOrigin::Instantiated { template } => Some(template),
            TypeOrigin::Concrete { .. } => None,
        }
    }

    pub fn is_instantiated(&self) -> bool {
        self.template().is_some()
    }

    /// The finalizer, taken from the template for instantiations.
    pub fn finalizer(&self) -> Option<Finalizer> {
        match self.origin {
            TypeOrigin::Concrete { finalizer } => finalizer,
            TypeOrigin::Instantiated { template } => template.finalizer(),
        }
    }

    // ---- Extensions ----

    pub fn inner_extensions(&self) -> Option<&InnerExtensions> {
        self.extensions.get()
    }

    pub(crate) fn dispatch_map(&'static self) -> &'static DispatchMap {
        self.dispatch
            .get_or_init(|| global_registry().dispatch_map_for(self.uuid))
    }

    pub(crate) fn existing_dispatch_map(&self) -> Option<&'static DispatchMap> {
        self.dispatch.get().copied()
    }

    /// The declaration carrying this type's authoritative table: an
    /// interface's own declaration, or a class's own vtable.
    ///
    /// Instantiated interfaces declare themselves through their template,
    /// so they are looked up in their dispatch map.
    pub fn self_declaration(&'static self) -> Result<ExtRef, DispatchError> {
        if let Some(inner) = self.extensions.get() {
            let own = if self.is_interface() {
                inner.decls.first()
            } else if self.is_class() && inner.inherit_count > 0 {
                inner.decls.get(inner.inherit_count - 1)
            } else {
                None
            };
            if let Some(ext) = own {
                return Ok(*ext);
            }
        }
        crate::dispatch::find_record(self, self, false)?
            .map(|record| record.extension())
            .ok_or_else(|| DispatchError::MissingSelfDeclaration {
                interface: self.name.clone(),
            })
    }

    /// Whether a generic class instantiation must be refreshed because its
    /// field count disagrees with its template.
    pub fn needs_refresh(&self) -> bool {
        if !self.is_class() || self.type_args.is_empty() {
            return false;
        }
        let Some(template) = self.template() else {
            return false;
        };
        if template.field_count() == self.field_count() {
            return false;
        }
        // Emitted before extension blobs existed.
        if !self.flags.contains(TypeFlags::HAS_EXT_PART) {
            return true;
        }
        match global_loader().type_ext(self.uuid) {
            None => true,
            Some(blob) => blob.first().copied().unwrap_or(0) == 0,
        }
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for TypeInfo {}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.uuid)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
