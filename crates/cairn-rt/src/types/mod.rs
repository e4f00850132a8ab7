//! Type descriptors and generic templates.
//!
//! A [`TypeInfo`] describes one concrete type; a [`TypeTemplate`] describes
//! a family of types parameterised by type arguments. Both are built once
//! at module load or first instantiation and never freed.

mod bitmap;
mod builder;
mod info;
mod template;

pub use bitmap::ResolveBitmap;
pub use builder::TypeBuilder;
pub use info::{Field, Finalizer, InnerExtensions, Parent, TypeInfo, TypeOrigin, TypeRef};
pub use template::{TemplateBuilder, TypeTemplate};

use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Interface,
    Struct,
    Enum,
    /// A compiler-synthesised enum that dispatches through its supertype.
    TempEnum,
    Tuple,
    Function,
    RawArray,
    VArray,
    CPointer,
    CString,
    CFunc,
    Primitive,
    /// The bottom type.
    Nothing,
    Unit,
    WeakRef,
}

impl TypeKind {
    /// Kinds whose single type argument is their component type, and whose
    /// ancestry is not walked during resolution.
    pub fn is_array_like(self) -> bool {
        matches!(self, TypeKind::RawArray | TypeKind::VArray | TypeKind::CPointer)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeFlags(u8);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    /// The descriptor was emitted with a type-extension blob.
    pub const HAS_EXT_PART: TypeFlags = TypeFlags(1 << 0);
    pub const HAS_REF_FIELD: TypeFlags = TypeFlags(1 << 1);

    pub fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TypeFlags {
    type Output = TypeFlags;

    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | rhs.0)
    }
}
