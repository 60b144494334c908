//! Vtable for type-erased value operations.
//!
//! This module contains the [`ValueVtable`] which enables calling the
//! [`ValueOps`] methods of a concrete type `T` on a raw memory address after
//! `T` has been erased. The vtable stores function pointers that dispatch to
//! the correct typed implementations.
//!
//! This module encapsulates the fields of [`ValueVtable`] so they cannot be
//! accessed directly. This visibility restriction guarantees the safety
//! invariant: **the vtable's function pointers always match the type the
//! enclosing descriptor describes**.
//!
//! # Safety Invariant
//!
//! This invariant is maintained because vtables are created as `&'static`
//! references via [`ValueVtable::new`], which pairs all function pointers
//! with a single type `T` at compile time.

use core::{any::TypeId, ptr::NonNull};

use crate::{
    archive::{ArchiveError, ArchiveReader, ArchiveWriter},
    ops::{ReferenceCollector, ValueOps},
};

/// Vtable for type-erased value operations.
///
/// Contains function pointers for performing lifecycle and serialization
/// operations on a value without knowing its concrete type at compile time.
///
/// # Safety Invariant
///
/// All fields are guaranteed to point to the functions defined below
/// instantiated with the single type `T` that was used to create this
/// [`ValueVtable`].
pub(crate) struct ValueVtable {
    /// Gets the [`TypeId`] of the type that was used to create this vtable.
    type_id: fn() -> TypeId,
    /// Default-constructs a value at the given address.
    default_construct: unsafe fn(NonNull<u8>),
    /// Drops the value at the given address in place.
    drop_in_place: unsafe fn(NonNull<u8>),
    /// Copy-assigns the source value onto the destination value.
    copy_assign: unsafe fn(NonNull<u8>, NonNull<u8>),
    /// Resets the value at the given address to its default state.
    clear_to_default: unsafe fn(NonNull<u8>),
    /// Deep-compares the two values at the given addresses.
    compare_equal: unsafe fn(NonNull<u8>, NonNull<u8>) -> bool,
    /// Serializes the value at the given address.
    serialize:
        unsafe fn(NonNull<u8>, &mut ArchiveWriter, Option<NonNull<u8>>) -> Result<(), ArchiveError>,
    /// Deserializes into the constructed value at the given address.
    deserialize: unsafe fn(
        NonNull<u8>,
        &mut ArchiveReader<'_>,
        Option<NonNull<u8>>,
    ) -> Result<(), ArchiveError>,
    /// Reports descriptors referenced from within the value.
    collect_references: unsafe fn(NonNull<u8>, &mut dyn ReferenceCollector),
}

impl ValueVtable {
    /// Creates a new [`ValueVtable`] for the type `T`.
    pub(super) const fn new<T: ValueOps>() -> &'static Self {
        const {
            &Self {
                type_id: TypeId::of::<T>,
                default_construct: default_construct::<T>,
                drop_in_place: drop_in_place::<T>,
                copy_assign: copy_assign::<T>,
                clear_to_default: clear_to_default::<T>,
                compare_equal: compare_equal::<T>,
                serialize: serialize::<T>,
                deserialize: deserialize::<T>,
                collect_references: collect_references::<T>,
            }
        }
    }

    /// Gets the [`TypeId`] of the type that was used to create this vtable.
    #[inline]
    pub(super) fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Default-constructs a value of `T` at `mem`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` is valid for writes of `T` and aligned for `T`, where `T` is
    ///    the type this vtable was created for.
    /// 2. `mem` does not currently hold a constructed value (it would be
    ///    overwritten without being dropped).
    #[inline]
    pub(super) unsafe fn default_construct(&self, mem: NonNull<u8>) {
        // SAFETY: `self.default_construct` points to `default_construct::<T>`
        // below, whose requirements are guaranteed by the caller.
        unsafe {
            (self.default_construct)(mem);
        }
    }

    /// Drops the value of `T` at `mem` in place.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` holds an initialized value of the type this vtable was
    ///    created for.
    /// 2. The value is not used again after this call.
    #[inline]
    pub(super) unsafe fn drop_in_place(&self, mem: NonNull<u8>) {
        // SAFETY: `self.drop_in_place` points to `drop_in_place::<T>` below,
        // whose requirements are guaranteed by the caller.
        unsafe {
            (self.drop_in_place)(mem);
        }
    }

    /// Copy-assigns the value at `source` onto the value at `destination`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. Both pointers hold initialized values of the type this vtable was
    ///    created for.
    /// 2. The pointers do not alias.
    #[inline]
    pub(super) unsafe fn copy_assign(&self, destination: NonNull<u8>, source: NonNull<u8>) {
        // SAFETY: `self.copy_assign` points to `copy_assign::<T>` below,
        // whose requirements are guaranteed by the caller.
        unsafe {
            (self.copy_assign)(destination, source);
        }
    }

    /// Resets the value at `mem` to its default state.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` holds an initialized value of the type this vtable was
    ///    created for.
    #[inline]
    pub(super) unsafe fn clear_to_default(&self, mem: NonNull<u8>) {
        // SAFETY: `self.clear_to_default` points to `clear_to_default::<T>`
        // below, whose requirements are guaranteed by the caller.
        unsafe {
            (self.clear_to_default)(mem);
        }
    }

    /// Deep-compares the values at `a` and `b`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. Both pointers hold initialized values of the type this vtable was
    ///    created for.
    #[inline]
    pub(super) unsafe fn compare_equal(&self, a: NonNull<u8>, b: NonNull<u8>) -> bool {
        // SAFETY: `self.compare_equal` points to `compare_equal::<T>` below,
        // whose requirements are guaranteed by the caller.
        unsafe { (self.compare_equal)(a, b) }
    }

    /// Serializes the value at `mem`, optionally diffing against `defaults`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` (and `defaults`, if given) hold initialized values of the
    ///    type this vtable was created for.
    #[inline]
    pub(super) unsafe fn serialize(
        &self,
        mem: NonNull<u8>,
        writer: &mut ArchiveWriter,
        defaults: Option<NonNull<u8>>,
    ) -> Result<(), ArchiveError> {
        // SAFETY: `self.serialize` points to `serialize::<T>` below, whose
        // requirements are guaranteed by the caller.
        unsafe { (self.serialize)(mem, writer, defaults) }
    }

    /// Deserializes into the constructed value at `mem`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` (and `defaults`, if given) hold initialized values of the
    ///    type this vtable was created for.
    /// 2. `mem` and `defaults` do not alias.
    #[inline]
    pub(super) unsafe fn deserialize(
        &self,
        mem: NonNull<u8>,
        reader: &mut ArchiveReader<'_>,
        defaults: Option<NonNull<u8>>,
    ) -> Result<(), ArchiveError> {
        // SAFETY: `self.deserialize` points to `deserialize::<T>` below,
        // whose requirements are guaranteed by the caller.
        unsafe { (self.deserialize)(mem, reader, defaults) }
    }

    /// Reports descriptors referenced from within the value at `mem`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `mem` holds an initialized value of the type this vtable was
    ///    created for.
    #[inline]
    pub(super) unsafe fn collect_references(
        &self,
        mem: NonNull<u8>,
        collector: &mut dyn ReferenceCollector,
    ) {
        // SAFETY: `self.collect_references` points to
        // `collect_references::<T>` below, whose requirements are guaranteed
        // by the caller.
        unsafe {
            (self.collect_references)(mem, collector);
        }
    }
}

/// Default-constructs a `T` at `mem`.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` is valid for writes of `T` and aligned for `T`.
/// 2. `mem` does not currently hold a constructed value.
unsafe fn default_construct<T: ValueOps>(mem: NonNull<u8>) {
    // SAFETY: `mem` is writable and aligned for `T` as guaranteed by the
    // caller, and overwriting is safe because no value is constructed there.
    unsafe {
        mem.cast::<T>().write(T::default());
    }
}

/// Drops the `T` at `mem` in place.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` holds an initialized `T` that is not used again afterwards.
unsafe fn drop_in_place<T: ValueOps>(mem: NonNull<u8>) {
    // SAFETY: `mem` holds an initialized `T` as guaranteed by the caller.
    unsafe {
        mem.cast::<T>().drop_in_place();
    }
}

/// Copy-assigns the `T` at `source` onto the `T` at `destination`.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. Both pointers hold initialized values of `T`.
/// 2. The pointers do not alias.
unsafe fn copy_assign<T: ValueOps>(destination: NonNull<u8>, source: NonNull<u8>) {
    // SAFETY: `destination` holds an initialized `T` and does not alias
    // `source`, as guaranteed by the caller.
    let destination: &mut T = unsafe { destination.cast::<T>().as_mut() };
    // SAFETY: `source` holds an initialized `T` as guaranteed by the caller.
    let source: &T = unsafe { source.cast::<T>().as_ref() };
    destination.clone_from(source);
}

/// Resets the `T` at `mem` to its default state.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` holds an initialized `T`.
unsafe fn clear_to_default<T: ValueOps>(mem: NonNull<u8>) {
    // SAFETY: `mem` holds an initialized `T` as guaranteed by the caller.
    let value: &mut T = unsafe { mem.cast::<T>().as_mut() };
    *value = T::default();
}

/// Deep-compares the `T`s at `a` and `b`.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. Both pointers hold initialized values of `T`.
unsafe fn compare_equal<T: ValueOps>(a: NonNull<u8>, b: NonNull<u8>) -> bool {
    // SAFETY: `a` holds an initialized `T` as guaranteed by the caller.
    let a: &T = unsafe { a.cast::<T>().as_ref() };
    // SAFETY: `b` holds an initialized `T` as guaranteed by the caller.
    let b: &T = unsafe { b.cast::<T>().as_ref() };
    a == b
}

/// Serializes the `T` at `mem` using [`ValueOps::serialize_value`].
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` (and `defaults`, if given) hold initialized values of `T`.
unsafe fn serialize<T: ValueOps>(
    mem: NonNull<u8>,
    writer: &mut ArchiveWriter,
    defaults: Option<NonNull<u8>>,
) -> Result<(), ArchiveError> {
    // SAFETY: `mem` holds an initialized `T` as guaranteed by the caller.
    let value: &T = unsafe { mem.cast::<T>().as_ref() };
    // SAFETY: `defaults` holds an initialized `T` as guaranteed by the caller.
    let defaults: Option<&T> = defaults.map(|ptr| unsafe { ptr.cast::<T>().as_ref() });
    value.serialize_value(writer, defaults)
}

/// Deserializes into the `T` at `mem` using [`ValueOps::deserialize_value`].
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` (and `defaults`, if given) hold initialized values of `T`.
/// 2. `mem` and `defaults` do not alias.
unsafe fn deserialize<T: ValueOps>(
    mem: NonNull<u8>,
    reader: &mut ArchiveReader<'_>,
    defaults: Option<NonNull<u8>>,
) -> Result<(), ArchiveError> {
    // SAFETY: `mem` holds an initialized `T` and does not alias `defaults`,
    // as guaranteed by the caller.
    let value: &mut T = unsafe { mem.cast::<T>().as_mut() };
    // SAFETY: `defaults` holds an initialized `T` as guaranteed by the caller.
    let defaults: Option<&T> = defaults.map(|ptr| unsafe { ptr.cast::<T>().as_ref() });
    value.deserialize_value(reader, defaults)
}

/// Reports references from the `T` at `mem` using
/// [`ValueOps::collect_references`].
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `mem` holds an initialized `T`.
unsafe fn collect_references<T: ValueOps>(mem: NonNull<u8>, collector: &mut dyn ReferenceCollector) {
    // SAFETY: `mem` holds an initialized `T` as guaranteed by the caller.
    let value: &T = unsafe { mem.cast::<T>().as_ref() };
    value.collect_references(collector);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, PartialEq)]
    struct Sample {
        value: i32,
    }

    // SAFETY: no base type, no address-dependent state.
    unsafe impl ValueOps for Sample {
        const TYPE_NAME: &'static str = "test.Sample";

        fn serialize_value(
            &self,
            writer: &mut ArchiveWriter,
            _defaults: Option<&Self>,
        ) -> Result<(), ArchiveError> {
            writer.write_i32(self.value);
            Ok(())
        }

        fn deserialize_value(
            &mut self,
            reader: &mut ArchiveReader<'_>,
            _defaults: Option<&Self>,
        ) -> Result<(), ArchiveError> {
            self.value = reader.read_i32()?;
            Ok(())
        }
    }

    #[test]
    fn test_vtable_is_shared_static() {
        let vtable1 = ValueVtable::new::<Sample>();
        let vtable2 = ValueVtable::new::<Sample>();
        assert!(core::ptr::eq(vtable1, vtable2));
    }

    #[test]
    fn test_vtable_type_id() {
        let vtable = ValueVtable::new::<Sample>();
        assert_eq!(vtable.type_id(), TypeId::of::<Sample>());
    }

    #[test]
    fn test_vtable_lifecycle_dispatch() {
        let vtable = ValueVtable::new::<Sample>();
        let mut a = Sample { value: 3 };
        let mut b = Sample { value: 9 };
        let a_ptr = NonNull::from(&mut a).cast::<u8>();
        let b_ptr = NonNull::from(&mut b).cast::<u8>();

        // SAFETY: both pointers hold initialized `Sample`s and do not alias.
        unsafe {
            vtable.copy_assign(a_ptr, b_ptr);
        }
        assert_eq!(a.value, 9);

        // SAFETY: both pointers hold initialized `Sample`s.
        let equal = unsafe { vtable.compare_equal(a_ptr, b_ptr) };
        assert!(equal);

        // SAFETY: `a_ptr` holds an initialized `Sample`.
        unsafe {
            vtable.clear_to_default(a_ptr);
        }
        assert_eq!(a.value, 0);
    }
}
