//! The per-type operations trait that host types implement so their values
//! can be stored and serialized type-erased.
//!
//! This module plays the role the handler traits play for reports: it is the
//! boundary where concrete, compile-time-known types hand the crate the
//! operations it will later invoke through the descriptor vtable when the
//! type has been erased.

use crate::{
    archive::{ArchiveError, ArchiveReader, ArchiveWriter},
    descriptor::TypeDescriptor,
};

/// Per-type operations for values stored in a type-erased cell.
///
/// Implementing this trait gives a type a [`TypeDescriptor`], which carries
/// the type's size, alignment, identity, and a vtable dispatching back to the
/// implementation below. The supertraits supply the lifecycle operations:
/// [`Default`] is the default-construct and clear-to-default operation,
/// [`Clone`] is the copy-assign operation, and [`PartialEq`] is the deep
/// structural comparison.
///
/// # Safety
///
/// The implementor must guarantee:
///
/// 1. If [`BASE`](ValueOps::BASE) is `Some`, `Self` is `#[repr(C)]` and its
///    first field is exactly the type described by the returned base
///    descriptor, so a pointer to `Self` may be reinterpreted as a pointer to
///    the base type. The base chain formed this way must be acyclic.
/// 2. If [`TRIVIALLY_RELOCATABLE`](ValueOps::TRIVIALLY_RELOCATABLE) is
///    `true`, a value of `Self` remains valid after its bytes are moved to a
///    new address without running any code. Every type movable in safe Rust
///    satisfies this; only types whose address is registered elsewhere
///    through unsafe code (intrusive nodes, self-pointers) may not, and those
///    must set it to `false` to be kept off the inline buffer.
///
/// # Examples
///
/// ```
/// use varstruct_internals::{
///     ArchiveError, ArchiveReader, ArchiveWriter,
///     ops::ValueOps,
/// };
///
/// #[derive(Default, Clone, PartialEq)]
/// struct Temperature {
///     celsius: f32,
/// }
///
/// // SAFETY: no base type is declared and `Temperature` has no
/// // address-dependent state.
/// unsafe impl ValueOps for Temperature {
///     const TYPE_NAME: &'static str = "demo.Temperature";
///
///     fn serialize_value(
///         &self,
///         writer: &mut ArchiveWriter,
///         _defaults: Option<&Self>,
///     ) -> Result<(), ArchiveError> {
///         writer.write_f32(self.celsius);
///         Ok(())
///     }
///
///     fn deserialize_value(
///         &mut self,
///         reader: &mut ArchiveReader<'_>,
///         _defaults: Option<&Self>,
///     ) -> Result<(), ArchiveError> {
///         self.celsius = reader.read_f32()?;
///         Ok(())
///     }
/// }
/// ```
pub unsafe trait ValueOps: Default + Clone + PartialEq + 'static {
    /// Stable wire name of the type.
    ///
    /// This is what gets written into serialized records and resolved back
    /// through the descriptor registry, so it must not change between the
    /// writing and the reading build. It is also the name under which a
    /// revised layout takes over during live type replacement.
    const TYPE_NAME: &'static str;

    /// Descriptor of the base type this type extends, if any.
    ///
    /// Declaring a base enables polymorphic access: a cell holding `Self` can
    /// be read as the base type, yielding the leading base-layout slice of
    /// the value. See the trait-level safety contract for the layout
    /// requirements this claim carries.
    const BASE: Option<fn() -> &'static TypeDescriptor> = None;

    /// Whether a value may be relocated by copying its bytes.
    ///
    /// Types that set this to `false` are always heap-placed, so their
    /// storage address stays stable for as long as the value exists, no
    /// matter how the owning container itself is moved around.
    const TRIVIALLY_RELOCATABLE: bool = true;

    /// Writes the value's payload bytes.
    ///
    /// When `defaults` is given, the implementation may delta-encode against
    /// it, writing only what differs, as long as
    /// [`deserialize_value`](ValueOps::deserialize_value) reverses the
    /// encoding when handed the same defaults.
    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        defaults: Option<&Self>,
    ) -> Result<(), ArchiveError>;

    /// Reads the value's payload bytes into `self`.
    ///
    /// `self` is always a fully constructed value (freshly default-constructed
    /// or copied from defaults by the caller), never uninitialized memory.
    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        defaults: Option<&Self>,
    ) -> Result<(), ArchiveError>;

    /// Reports descriptors referenced from within the value.
    ///
    /// Types embedding nested type-erased cells forward this call to them so
    /// an external collector can walk the whole reference graph. The default
    /// implementation reports nothing.
    fn collect_references(&self, collector: &mut dyn ReferenceCollector) {
        let _ = collector;
    }
}

/// Sink for descriptors discovered during a reference walk.
///
/// Implemented by the external collector that owns the traversal. The
/// containers only report what they hold; the traversal order and recursion
/// policy belong to the collector.
pub trait ReferenceCollector {
    /// Reports a descriptor that is currently referenced by a live value.
    fn report_descriptor(&mut self, descriptor: &'static TypeDescriptor);
}
