//! The [`VarStruct`] container: the safe surface over the raw storage cell.

use core::ptr::NonNull;

use varstruct_internals::{
    Placement, RawValue, TypeDescriptor,
    ops::{ReferenceCollector, ValueOps},
};

use crate::error::{AccessError, UnsupportedTypeError};

/// Wire names a container refuses to hold, preventing recursive erasure.
///
/// The first entry is this container's own wire tag; the second is the
/// legacy non-SBO sibling it stays read-compatible with.
const RESERVED_TYPE_NAMES: &[&str] = &[crate::ser::VALUE_TYPE_TAG, crate::ser::LEGACY_VALUE_TAG];

/// Rejects descriptors from the reserved self-referential wrapper set.
pub(crate) fn validate_descriptor(
    descriptor: &'static TypeDescriptor,
) -> Result<(), UnsupportedTypeError> {
    if RESERVED_TYPE_NAMES.contains(&descriptor.name()) {
        return Err(UnsupportedTypeError {
            name: descriptor.name(),
        });
    }
    Ok(())
}

/// A type-erased container holding at most one value of a dynamically
/// selected type.
///
/// Small values live in a fixed inline buffer; values that outgrow it (or
/// demand stricter alignment, or opt out of relocation) live in an owned
/// heap block. Which branch is active is recomputed from the descriptor on
/// every access — no discriminant is stored.
///
/// Values get in through the typed constructors ([`VarStruct::make`],
/// [`VarStruct::initialize_as`]) or the descriptor-driven ones
/// ([`VarStruct::from_descriptor`]), and out through the typed accessors.
/// Each typed read comes in two modes: *exact*, where the active type must
/// match precisely and the storage placement is resolved at compile time,
/// and *polymorphic* (the default), which also accepts values whose type
/// declares the requested type on its base chain.
///
/// # Examples
///
/// ```
/// use varstruct::VarStruct;
/// # use varstruct::{ArchiveError, ArchiveReader, ArchiveWriter, ValueOps};
/// # #[derive(Default, Clone, PartialEq, Debug)]
/// # struct Health { points: u32 }
/// # // SAFETY: no base type, no address-dependent state.
/// # unsafe impl ValueOps for Health {
/// #     const TYPE_NAME: &'static str = "demo.Health";
/// #     fn serialize_value(&self, w: &mut ArchiveWriter, _d: Option<&Self>) -> Result<(), ArchiveError> {
/// #         w.write_u32(self.points);
/// #         Ok(())
/// #     }
/// #     fn deserialize_value(&mut self, r: &mut ArchiveReader<'_>, _d: Option<&Self>) -> Result<(), ArchiveError> {
/// #         self.points = r.read_u32()?;
/// #         Ok(())
/// #     }
/// # }
///
/// let mut container = VarStruct::make(Health { points: 100 });
/// assert_eq!(container.value::<Health>(), Some(&Health { points: 100 }));
///
/// container.value_mut::<Health>().unwrap().points = 50;
/// assert!(container.is_type_of::<Health>(true));
///
/// container.reset();
/// assert!(!container.has_value());
/// ```
#[derive(Default)]
pub struct VarStruct {
    /// The raw storage cell.
    pub(crate) raw: RawValue,
}

impl VarStruct {
    /// Creates an empty container.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: RawValue::empty(),
        }
    }

    /// Creates a container holding `value`.
    #[must_use]
    pub fn make<T: ValueOps>(value: T) -> Self {
        let mut container = Self::new();
        container.raw.emplace(value);
        container
    }

    /// Creates a container holding the default value of the described type.
    ///
    /// # Errors
    ///
    /// Fails with [`UnsupportedTypeError`] when the descriptor belongs to
    /// the reserved set of type-erasure wrappers.
    pub fn from_descriptor(
        descriptor: &'static TypeDescriptor,
    ) -> Result<Self, UnsupportedTypeError> {
        validate_descriptor(descriptor)?;
        let mut container = Self::new();
        // SAFETY: no source pointer is passed.
        unsafe {
            container.raw.initialize_as(Some(descriptor), None);
        }
        Ok(container)
    }

    /// Creates a container copying the value at `source`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnsupportedTypeError`] when the descriptor belongs to
    /// the reserved set of type-erasure wrappers.
    ///
    /// # Safety
    ///
    /// The caller must ensure `source` points to an initialized value of the
    /// type described by `descriptor`.
    pub unsafe fn from_descriptor_and_memory(
        descriptor: &'static TypeDescriptor,
        source: NonNull<u8>,
    ) -> Result<Self, UnsupportedTypeError> {
        validate_descriptor(descriptor)?;
        let mut container = Self::new();
        // SAFETY: `source` validity is guaranteed by the caller; a fresh
        // container's storage cannot alias it.
        unsafe {
            container.raw.initialize_as(Some(descriptor), Some(source));
        }
        Ok(container)
    }

    /// Stores `value`, reusing the existing storage when the container
    /// already holds a value of type `T`, and returns a reference to the
    /// stored value.
    pub fn initialize_as<T: ValueOps>(&mut self, value: T) -> &mut T {
        self.raw.emplace(value)
    }

    /// Stores the default value of `T` and returns a reference to it.
    pub fn initialize_default<T: ValueOps>(&mut self) -> &mut T {
        self.raw.emplace(T::default())
    }

    /// Re-targets the container to the default value of the described type,
    /// or empties it when `descriptor` is `None`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnsupportedTypeError`] when the descriptor belongs to
    /// the reserved set of type-erasure wrappers; the container is left
    /// unchanged in that case.
    pub fn initialize_from_descriptor(
        &mut self,
        descriptor: Option<&'static TypeDescriptor>,
    ) -> Result<(), UnsupportedTypeError> {
        if let Some(descriptor) = descriptor {
            validate_descriptor(descriptor)?;
        }
        // SAFETY: no source pointer is passed.
        unsafe {
            self.raw.initialize_as(descriptor, None);
        }
        Ok(())
    }

    /// Destroys the held value, if any. Idempotent.
    pub fn reset(&mut self) {
        self.raw.reset();
    }

    /// Moves the held value out, leaving this container empty.
    ///
    /// Heap-placed values transfer their allocation in O(1); inline values
    /// are relocated into the new container's buffer.
    #[must_use]
    pub fn take(&mut self) -> VarStruct {
        VarStruct {
            raw: self.raw.take(),
        }
    }

    /// Descriptor of the held value, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> Option<&'static TypeDescriptor> {
        self.raw.descriptor()
    }

    /// Whether the container currently holds a value.
    #[inline]
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.raw.has_value()
    }

    /// Wire name of the held value's type, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        self.raw.descriptor().map(TypeDescriptor::name)
    }

    /// Placement of the held value, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn placement(&self) -> Option<Placement> {
        self.raw.placement()
    }

    /// Whether the held value's type satisfies `T`.
    ///
    /// With `exact` set, only a precise type match counts; otherwise a type
    /// declaring `T` on its base chain also qualifies. Always `false` when
    /// empty.
    #[must_use]
    pub fn is_type_of<T: ValueOps>(&self, exact: bool) -> bool {
        let Some(descriptor) = self.raw.descriptor() else {
            return false;
        };
        descriptor.describes::<T>()
            || (!exact && descriptor.is_subtype_of(TypeDescriptor::of::<T>()))
    }

    /// Returns a reference to the held value as `T`, accepting subtypes.
    ///
    /// Tries the exact-type fast path first (placement resolved at compile
    /// time); on mismatch, falls back to a base-chain check and resolves the
    /// address through the general placement function.
    #[must_use]
    pub fn value<T: ValueOps>(&self) -> Option<&T> {
        let descriptor = self.raw.descriptor()?;
        if descriptor.describes::<T>() {
            return self.raw.typed_ref::<T>();
        }
        if !descriptor.is_subtype_of(TypeDescriptor::of::<T>()) {
            return None;
        }
        let mem = self.raw.memory()?;
        // SAFETY: the stored type declares `T` on its base chain, so by the
        // `ValueOps` base contract its leading bytes are an initialized `T`;
        // shared access is tied to `&self`.
        Some(unsafe { &*mem.as_ptr().cast_const().cast::<T>() })
    }

    /// Returns a mutable reference to the held value as `T`, accepting
    /// subtypes.
    #[must_use]
    pub fn value_mut<T: ValueOps>(&mut self) -> Option<&mut T> {
        let descriptor = self.raw.descriptor()?;
        if descriptor.describes::<T>() {
            return self.raw.typed_mut::<T>();
        }
        if !descriptor.is_subtype_of(TypeDescriptor::of::<T>()) {
            return None;
        }
        let mem = self.raw.memory_mut()?;
        // SAFETY: the stored type declares `T` on its base chain, so by the
        // `ValueOps` base contract its leading bytes are an initialized `T`;
        // exclusive access is tied to `&mut self`.
        Some(unsafe { &mut *mem.as_ptr().cast::<T>() })
    }

    /// Returns a reference to the held value, requiring an exact type match.
    #[inline]
    #[must_use]
    pub fn value_exact<T: ValueOps>(&self) -> Option<&T> {
        self.raw.typed_ref::<T>()
    }

    /// Returns a mutable reference to the held value, requiring an exact
    /// type match.
    #[inline]
    #[must_use]
    pub fn value_mut_exact<T: ValueOps>(&mut self) -> Option<&mut T> {
        self.raw.typed_mut::<T>()
    }

    /// Returns a reference to the held value as `T`, or the reason access
    /// failed.
    ///
    /// # Errors
    ///
    /// [`AccessError::Empty`] when no value is held,
    /// [`AccessError::TypeMismatch`] when the active type does not satisfy
    /// `T` (with `exact` set, only a precise match satisfies it).
    pub fn try_value<T: ValueOps>(&self, exact: bool) -> Result<&T, AccessError> {
        let Some(descriptor) = self.raw.descriptor() else {
            return Err(AccessError::Empty);
        };
        let mismatch = AccessError::TypeMismatch {
            expected: T::TYPE_NAME,
            actual: descriptor.name(),
        };
        if exact && !descriptor.describes::<T>() {
            return Err(mismatch);
        }
        self.value::<T>().ok_or(mismatch)
    }

    /// Deep-compares two containers.
    ///
    /// `true` only when both hold a value, the types are exactly identical
    /// (no subtype leniency), and the payloads compare structurally equal.
    /// Comparing against an empty container is always `false`.
    #[must_use]
    pub fn identical(&self, other: &VarStruct) -> bool {
        self.raw.identical(&other.raw)
    }

    /// Reports the held descriptor and the payload's own references to an
    /// external collector. Does nothing when empty.
    pub fn collect_references(&self, collector: &mut dyn ReferenceCollector) {
        self.raw.collect_references(collector);
    }
}

impl Clone for VarStruct {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.raw.copy_from(&source.raw);
    }
}

impl PartialEq for VarStruct {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl core::fmt::Debug for VarStruct {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.raw, f)
    }
}

impl core::fmt::Display for VarStruct {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.type_name() {
            Some(name) => f.write_str(name),
            None => f.write_str("None"),
        }
    }
}
