//! Live type replacement: migrating containers to a revised layout while
//! instances exist.
//!
//! A host that lets users edit a type's layout at runtime needs existing
//! containers to carry their data over to the revised layout. The container
//! cannot do that unilaterally — it is driven by an external coordinator
//! walking all instances twice:
//!
//! 1. **Substitute** ([`LiveTypeMigration::begin`]): instances holding the
//!    superseded descriptor are re-labeled with a *transitional* descriptor.
//!    The transitional descriptor carries the old layout's operations but
//!    serializes under the wire name that now resolves to the revised
//!    layout.
//! 2. **Migrate** ([`LiveTypeMigration::complete`]): instances holding the
//!    transitional descriptor are round-tripped through the serialization
//!    codec — written with the old layout's serializer, then read back with
//!    the name resolving to the revised descriptor, landing the payload in
//!    the new layout.
//!
//! Whether the revised deserializer can consume the old payload bytes is the
//! host serializer's contract; version-tolerant payload encodings make the
//! migration lossless for the fields both layouts share.

use varstruct_internals::{ArchiveReader, ArchiveWriter, TypeDescriptor};

use crate::{error::SerError, registry::DescriptorRegistry, value::VarStruct};

/// A two-pass migration from a superseded type to a revised layout
/// registered under the same wire name.
#[derive(Debug, Clone, Copy)]
pub struct LiveTypeMigration {
    /// Descriptor being replaced.
    superseded: &'static TypeDescriptor,
    /// Layout-identical stand-in serializing under the revised name.
    transitional: &'static TypeDescriptor,
}

impl LiveTypeMigration {
    /// Creates a migration from `superseded` to the layout registered under
    /// `transitional`'s wire name.
    ///
    /// # Safety
    ///
    /// The caller must ensure `transitional` describes a type with the same
    /// size, alignment, placement, and field layout as `superseded`, whose
    /// destroy, copy, compare, and serialize operations are valid for
    /// payload bytes produced by `superseded`'s type.
    #[must_use]
    pub unsafe fn new(
        superseded: &'static TypeDescriptor,
        transitional: &'static TypeDescriptor,
    ) -> Self {
        debug_assert_eq!(superseded.size(), transitional.size());
        debug_assert_eq!(superseded.align(), transitional.align());
        Self {
            superseded,
            transitional,
        }
    }

    /// Descriptor being replaced.
    #[must_use]
    pub fn superseded(&self) -> &'static TypeDescriptor {
        self.superseded
    }

    /// The layout-identical stand-in used between the two passes.
    #[must_use]
    pub fn transitional(&self) -> &'static TypeDescriptor {
        self.transitional
    }

    /// First pass: re-labels the container with the transitional descriptor
    /// when it holds the superseded type.
    ///
    /// Returns whether the container was affected.
    pub fn begin(&self, value: &mut VarStruct) -> bool {
        if !value
            .descriptor()
            .is_some_and(|active| active.same_type(self.superseded))
        {
            return false;
        }
        // SAFETY: layout identity of `transitional` with the active
        // (superseded) descriptor is the construction contract of
        // `LiveTypeMigration::new`.
        unsafe {
            value.raw.substitute_descriptor(self.transitional);
        }
        true
    }

    /// Second pass: round-trips the container through the serialization
    /// codec when it holds the transitional descriptor, landing the payload
    /// in whatever layout `registry` now resolves the wire name to.
    ///
    /// Returns whether the container was affected.
    ///
    /// # Errors
    ///
    /// Fails when serialization of the old payload or deserialization into
    /// the revised layout fails; the container is left holding whatever the
    /// failing read left behind, exactly as a failed stream load would.
    pub fn complete<R: DescriptorRegistry + ?Sized>(
        &self,
        value: &mut VarStruct,
        registry: &R,
    ) -> Result<bool, SerError> {
        if !value
            .descriptor()
            .is_some_and(|active| active.same_type(self.transitional))
        {
            return Ok(false);
        }
        let mut writer = ArchiveWriter::new();
        value.write_value(&mut writer, None)?;
        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        value.read_value(&mut reader, None, registry)?;
        Ok(true)
    }
}
