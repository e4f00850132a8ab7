//! Integration tests for interface dispatch: table growth across module
//! versions, slot owners, subtyping and late-loaded modules.

use std::ptr;

use cairn_rt::{
    global_loader, global_registry, DispatchError, ExtensionData, ExtensionTarget, FnPtr,
    InterfaceRef, ModuleImage, TableState, TemplateBuilder, TypeBuilder, TypeFlags, TypeRef,
};

// ── Helpers ────────────────────────────────────────────────────────────

fn f(addr: usize) -> FnPtr {
    FnPtr::new(addr)
}

fn interface(name: &str, slots: Vec<FnPtr>) -> TypeRef {
    TypeBuilder::interface(name).methods(slots).build().unwrap()
}

/// An outer declaration of `itf` for `target`, as a module would carry it.
fn outer(target: TypeRef, itf: TypeRef, table: &[FnPtr]) -> &'static ExtensionData {
    ExtensionData::new(ExtensionTarget::Type(target), InterfaceRef::Fixed(itf), table)
        .unwrap()
        .direct(true)
        .leak()
}

// ── Table growth ───────────────────────────────────────────────────────

/// `Widget` was compiled against a one-method `Printable`; the loaded
/// `Printable` has gained `describe` with a default implementation.
#[test]
fn test_widget_table_grows_to_new_printable() {
    const PRINT: FnPtr = FnPtr::new(0x1000);
    const DESCRIBE_DEFAULT: FnPtr = FnPtr::new(0x2000);

    let printable = interface("d.Printable", vec![FnPtr::NULL, DESCRIBE_DEFAULT]);
    let widget = TypeBuilder::class("d.Widget")
        .implements(printable, vec![PRINT])
        .build()
        .unwrap();

    let table = widget.dispatch_table(printable);
    assert_eq!(table, &[PRINT, DESCRIBE_DEFAULT]);

    let map = global_registry().dispatch_map_for(widget.uuid());
    let record = map.get(printable.uuid()).unwrap();
    assert_eq!(record.extension().state(), TableState::Updated);
    assert_eq!(record.extension().table()[0], PRINT);

    let again = widget.dispatch_table(printable);
    assert!(ptr::eq(table, again));
}

#[test]
fn test_declaration_newer_than_interface_is_rejected() {
    let itf = interface("d.Old", vec![FnPtr::NULL]);
    let ty = TypeBuilder::class("d.FromFuture")
        .implements(itf, vec![f(1), f(2), f(3)])
        .build()
        .unwrap();
    let err = ty.try_dispatch_table(itf).unwrap_err();
    assert_eq!(
        err,
        DispatchError::IncompatibleModule {
            target: "d.FromFuture".into(),
            interface: "d.Old".into(),
            cached: 3,
            current: 1,
        }
    );
    assert_eq!(
        err.to_string(),
        "incompatible module: `d.Old` has 1 slot(s) but the declaration on `d.FromFuture` already holds 3"
    );
}

#[test]
fn test_missing_table_through_try_api() {
    let itf = interface("d.Absent", vec![]);
    let ty = TypeBuilder::class("d.Bare").build().unwrap();
    assert!(matches!(
        ty.try_dispatch_table(itf),
        Err(DispatchError::MissingTable { .. })
    ));
}

/// Only a direct ancestor can provide the missing tail. A non-direct
/// declaration fails to grow, and the next call must fail the same way
/// instead of waiting on a lock nobody holds.
#[test]
fn test_failed_growth_can_be_retried() {
    let itf = interface("d.Wide", vec![FnPtr::NULL, FnPtr::NULL]);
    let ty = TypeBuilder::class("d.Narrow").build().unwrap();
    global_loader()
        .load(
            ModuleImage::new("d.narrow_wide").extension(
                ExtensionData::new(ExtensionTarget::Type(ty), InterfaceRef::Fixed(itf), &[f(1)])
                    .unwrap()
                    .leak(),
            ),
        )
        .unwrap();

    let expected = DispatchError::MissingProvider {
        target: "d.Narrow".into(),
        interface: "d.Wide".into(),
        missing: 1,
    };
    assert_eq!(ty.try_dispatch_table(itf).unwrap_err(), expected);
    let record = global_registry()
        .dispatch_map_for(ty.uuid())
        .get(itf.uuid())
        .unwrap();
    assert_eq!(record.extension().state(), TableState::Unlocked);
    assert_eq!(ty.try_dispatch_table(itf).unwrap_err(), expected);
    assert_eq!(record.extension().len(), 1);
}

// ── Slot owners ────────────────────────────────────────────────────────

/// C extends B extends A, and only A implements I: A owns every slot.
#[test]
fn test_slot_owner_is_declaring_ancestor_and_cached() {
    let i = interface("d.I", vec![FnPtr::NULL]);
    let a = TypeBuilder::class("d.A").implements(i, vec![f(0xa1)]).build().unwrap();
    let b = TypeBuilder::class("d.B").extends(a).build().unwrap();
    let c = TypeBuilder::class("d.C").extends(b).build().unwrap();

    assert!(c.is_subtype(i));
    let owner = c.owner_of(i, 0).unwrap();
    assert!(ptr::eq(owner, a));

    let record = global_registry()
        .dispatch_map_for(c.uuid())
        .get(i.uuid())
        .unwrap();
    assert!(ptr::eq(record.owners().get(0).unwrap(), a));
    assert!(ptr::eq(c.owner_of(i, 0).unwrap(), a));
}

#[test]
fn test_override_makes_subclass_the_owner() {
    let i = interface("d.Greet", vec![FnPtr::NULL]);
    let base = TypeBuilder::class("d.Greeter").implements(i, vec![f(0xb0)]).build().unwrap();
    let loud = TypeBuilder::class("d.LoudGreeter")
        .extends(base)
        .implements(i, vec![f(0xc0)])
        .build()
        .unwrap();

    assert_eq!(loud.dispatch_table(i), &[f(0xc0)]);
    assert!(ptr::eq(loud.owner_of(i, 0).unwrap(), loud));
}

#[test]
fn test_slot_out_of_range_is_an_error() {
    let i = interface("d.Small", vec![FnPtr::NULL]);
    let ty = TypeBuilder::class("d.SmallImpl").implements(i, vec![f(1)]).build().unwrap();
    assert!(ty.is_subtype(i));
    assert!(matches!(
        ty.try_owner_of(i, 3),
        Err(DispatchError::IndexOutOfRange { index: 3, len: 1, .. })
    ));
}

// ── Subtyping ──────────────────────────────────────────────────────────

#[test]
fn test_subtyping_is_reflexive_and_transitive() {
    let iterable = interface("d.Iterable", vec![]);
    let collection = TypeBuilder::interface("d.Collection")
        .implements(iterable, vec![])
        .build()
        .unwrap();
    let list = TypeBuilder::class("d.List").implements(collection, vec![]).build().unwrap();
    let sorted = TypeBuilder::class("d.SortedList").extends(list).build().unwrap();

    for ty in [iterable, collection, list, sorted] {
        assert!(ty.is_subtype(ty), "{ty} should be a subtype of itself");
    }
    assert!(sorted.is_subtype(list));
    assert!(list.is_subtype(collection));
    assert!(collection.is_subtype(iterable));
    assert!(sorted.is_subtype(iterable));
    assert!(!iterable.is_subtype(collection));
    assert!(sorted.is_subtype(global_registry().well_known().object));
    assert!(sorted.is_subtype(global_registry().well_known().any));
}

#[test]
fn test_satisfied_interfaces_snapshot() {
    let eq = interface("d.Eq", vec![]);
    let hash = TypeBuilder::interface("d.Hash").implements(eq, vec![]).build().unwrap();
    let show = interface("d.Show", vec![]);
    let key = TypeBuilder::class("d.Key").implements(hash, vec![]).build().unwrap();
    let user_key = TypeBuilder::class("d.UserKey")
        .extends(key)
        .implements(show, vec![])
        .build()
        .unwrap();
    assert!(user_key.is_subtype(eq));

    let names: Vec<&str> = user_key
        .satisfied_interfaces()
        .iter()
        .map(|itf| itf.name())
        .collect();
    insta::assert_snapshot!(names.join("\n"), @r"
    d.Show
    d.Hash
    d.Eq
    ");
}

// ── Late-loaded modules ────────────────────────────────────────────────

#[test]
fn test_outer_declaration_from_late_module() {
    let itf = interface("d.Serialize", vec![FnPtr::NULL]);
    let point = TypeBuilder::class("d.Point").build().unwrap();
    assert!(!point.is_subtype(itf));

    global_loader()
        .load(ModuleImage::new("d.serde_point").extension(outer(point, itf, &[f(0x5e)])))
        .unwrap();
    assert!(point.is_subtype(itf));
    assert_eq!(point.dispatch_table(itf), &[f(0x5e)]);
}

#[test]
fn test_outer_declaration_reaches_subclasses() {
    let itf = interface("d.Render", vec![FnPtr::NULL]);
    let shape = TypeBuilder::class("d.Shape").build().unwrap();
    let circle = TypeBuilder::class("d.Circle").extends(shape).build().unwrap();
    global_loader()
        .load(ModuleImage::new("d.render_shape").extension(outer(shape, itf, &[f(0x7)])))
        .unwrap();

    assert!(circle.is_subtype(itf));
    let record = global_registry()
        .dispatch_map_for(circle.uuid())
        .get(itf.uuid())
        .unwrap();
    assert!(ptr::eq(record.supplier(), shape));
}

// ── needs_refresh ──────────────────────────────────────────────────────

#[test]
fn test_needs_refresh_follows_field_counts_and_blob() {
    let int = TypeBuilder::primitive("d.Int").build().unwrap();
    let pair = TemplateBuilder::class("d.Pair", 1)
        .field(|args| Ok(args[0]))
        .field(|args| Ok(args[0]))
        .build();

    let current = pair.instantiate(&[int]).unwrap();
    assert!(!current.needs_refresh());

    let stale = TypeBuilder::class("d.Pair<d.Int>#old")
        .instance_of(pair, vec![int])
        .field(int)
        .build()
        .unwrap();
    assert!(stale.needs_refresh());

    let with_blob = TypeBuilder::class("d.Pair<d.Int>#blob")
        .instance_of(pair, vec![int])
        .flags(TypeFlags::HAS_EXT_PART)
        .field(int)
        .build()
        .unwrap();
    assert!(with_blob.needs_refresh());
    global_loader()
        .load(ModuleImage::new("d.pair_blob").type_ext(with_blob, vec![1]))
        .unwrap();
    assert!(!with_blob.needs_refresh());

    let zeroed = TypeBuilder::class("d.Pair<d.Int>#zero")
        .instance_of(pair, vec![int])
        .flags(TypeFlags::HAS_EXT_PART)
        .field(int)
        .build()
        .unwrap();
    global_loader()
        .load(ModuleImage::new("d.pair_zero").type_ext(zeroed, vec![0]))
        .unwrap();
    assert!(zeroed.needs_refresh());

    let plain = TypeBuilder::class("d.Plain").field(int).build().unwrap();
    assert!(!plain.needs_refresh());
}
