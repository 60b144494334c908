//! Type-erased value cell with small-buffer optimization.
//!
//! This module encapsulates the `storage` and `descriptor` fields of
//! [`RawValue`], ensuring they are only visible within this module. This
//! visibility restriction guarantees the safety invariants:
//!
//! 1. `descriptor` is `None` exactly when no constructed value exists; the
//!    storage union is then inert and never read.
//! 2. When a value exists, its placement (inline buffer vs owned heap block)
//!    is a pure function of the active descriptor, so no separate
//!    discriminant is stored and the active union field is always
//!    recomputable.
//! 3. At most one heap block is owned at a time; it is allocated in
//!    [`RawValue::initialize_as`]/[`RawValue::emplace`] and freed exactly
//!    once in [`RawValue::reset`], before the descriptor is ever retargeted.
//! 4. Inline payload bytes are only manipulated through the descriptor's
//!    operations, except for the bitwise relocation in [`RawValue::take`],
//!    which is sound because non-relocatable types never receive inline
//!    placement.

use core::{alloc::Layout, mem::MaybeUninit, ptr::NonNull};

use crate::{
    descriptor::TypeDescriptor,
    ops::{ReferenceCollector, ValueOps},
};

/// Capacity of the inline buffer in bytes.
pub const BUFFER_SIZE: usize = 24;

/// Alignment of the cell, and the strictest alignment the inline buffer can
/// serve. Must agree with the `align` attribute on [`RawValue`].
pub const CONTAINER_ALIGN: usize = 16;

const _: () = assert!(CONTAINER_ALIGN >= align_of::<*mut u8>());
const _: () = assert!(BUFFER_SIZE >= CONTAINER_ALIGN);
const _: () = assert!(align_of::<RawValue>() == CONTAINER_ALIGN);
const _: () = assert!(size_of::<Storage>() == BUFFER_SIZE);

/// Where a value's storage resides.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Placement {
    /// The value lives in the cell's inline buffer.
    Inline,
    /// The value lives in a heap block owned by the cell.
    Heap,
}

/// Whether a type with the given layout and relocatability must be
/// heap-placed.
///
/// Zero-sized values always fit the buffer. Types that are not trivially
/// relocatable are always heap-placed so their address survives moves of the
/// cell itself. Otherwise the value is heap-placed when it outgrows the
/// buffer; since a Rust type's size is a multiple of its alignment, any type
/// with `align > CONTAINER_ALIGN` already has `size >= 2 * CONTAINER_ALIGN`,
/// so whenever `BUFFER_SIZE < 2 * CONTAINER_ALIGN` the alignment term is
/// implied by the size term and drops out of the comparison.
#[must_use]
pub const fn needs_allocation(size: usize, align: usize, trivially_relocatable: bool) -> bool {
    if size == 0 {
        return false;
    }
    if !trivially_relocatable {
        return true;
    }
    if BUFFER_SIZE < 2 * CONTAINER_ALIGN {
        size > BUFFER_SIZE
    } else {
        size > BUFFER_SIZE || align > CONTAINER_ALIGN
    }
}

/// Whether `T` must be heap-placed, decided at compile time.
#[must_use]
pub const fn needs_allocation_for<T: ValueOps>() -> bool {
    needs_allocation(size_of::<T>(), align_of::<T>(), T::TRIVIALLY_RELOCATABLE)
}

/// Returns the placement for values of the described type.
#[must_use]
pub const fn placement_for(descriptor: &TypeDescriptor) -> Placement {
    if needs_allocation(
        descriptor.size(),
        descriptor.align(),
        descriptor.is_trivially_relocatable(),
    ) {
        Placement::Heap
    } else {
        Placement::Inline
    }
}

/// The cell's storage: an inline buffer and an owned heap pointer sharing the
/// same memory, selected by the active descriptor's placement.
#[repr(C)]
union Storage {
    /// Pointer to the owned heap block for heap-placed values.
    heap: *mut u8,
    /// Inline buffer for values that fit.
    inline: [MaybeUninit<u8>; BUFFER_SIZE],
}

/// A type-erased cell holding at most one value of a dynamically selected
/// type, inline when the type fits the buffer and heap-allocated otherwise.
///
/// The cell observes its descriptor but does not own it; descriptor lifetime
/// belongs to whoever registered the type. The heap block, when present, is
/// exclusively owned.
///
/// # Safety
///
/// The following invariants are guaranteed to be upheld as long as this
/// struct exists:
///
/// 1. When `descriptor` is `Some`, the storage resolved through the
///    descriptor's placement holds an initialized value of the described
///    type.
/// 2. When `descriptor` is `None`, the storage union is inert: the inline
///    bytes may be stale and the heap field meaningless, and neither is ever
///    read.
/// 3. A heap-placed cell's `heap` field was produced by the global allocator
///    with the descriptor's exact layout and is freed exactly once, by this
///    cell.
#[repr(C, align(16))]
pub struct RawValue {
    /// Inline buffer or owned heap pointer; the buffer is placed first so
    /// the inline payload address equals the cell address.
    storage: Storage,
    /// Descriptor of the held value, or `None` for an empty cell.
    descriptor: Option<&'static TypeDescriptor>,
}

impl RawValue {
    /// Creates an empty cell.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            storage: Storage {
                heap: core::ptr::null_mut(),
            },
            descriptor: None,
        }
    }

    /// Descriptor of the held value, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> Option<&'static TypeDescriptor> {
        self.descriptor
    }

    /// Whether the cell currently holds a value.
    #[inline]
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Placement of the held value, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn placement(&self) -> Option<Placement> {
        self.descriptor.map(placement_for)
    }

    /// Address of the held value, or `None` when empty.
    ///
    /// The returned pointer is valid for reads for as long as the cell is
    /// not mutated; use [`RawValue::memory_mut`] to obtain a write-capable
    /// pointer.
    #[inline]
    #[must_use]
    pub fn memory(&self) -> Option<NonNull<u8>> {
        let descriptor = self.descriptor?;
        Some(self.resolve_memory(descriptor))
    }

    /// Write-capable address of the held value, or `None` when empty.
    #[inline]
    #[must_use]
    pub fn memory_mut(&mut self) -> Option<NonNull<u8>> {
        let descriptor = self.descriptor?;
        Some(self.resolve_memory_mut(descriptor))
    }

    /// Resolves the payload address for reads from the active descriptor.
    fn resolve_memory(&self, descriptor: &TypeDescriptor) -> NonNull<u8> {
        match placement_for(descriptor) {
            Placement::Inline => {
                let ptr = (&raw const self.storage).cast::<u8>().cast_mut();
                // SAFETY: derived from a reference, so never null.
                unsafe { NonNull::new_unchecked(ptr) }
            }
            Placement::Heap => {
                // SAFETY: heap placement means the heap pointer is the active
                // union field (invariant 1).
                let ptr = unsafe { self.storage.heap };
                // SAFETY: the owning allocation was non-null when stored
                // (invariant 3).
                unsafe { NonNull::new_unchecked(ptr) }
            }
        }
    }

    /// Resolves the payload address for writes from the active descriptor.
    fn resolve_memory_mut(&mut self, descriptor: &TypeDescriptor) -> NonNull<u8> {
        match placement_for(descriptor) {
            Placement::Inline => {
                let ptr = (&raw mut self.storage).cast::<u8>();
                // SAFETY: derived from a reference, so never null.
                unsafe { NonNull::new_unchecked(ptr) }
            }
            Placement::Heap => {
                // SAFETY: heap placement means the heap pointer is the active
                // union field (invariant 1).
                let ptr = unsafe { self.storage.heap };
                // SAFETY: the owning allocation was non-null when stored
                // (invariant 3).
                unsafe { NonNull::new_unchecked(ptr) }
            }
        }
    }

    /// Re-targets the cell to hold a value of the given type.
    ///
    /// If the new descriptor matches the active one, the existing storage is
    /// reused: the payload is copy-assigned from `source`, or reset to its
    /// default when `source` is `None`. No allocation or destruction happens
    /// on that path. Otherwise the cell is [`reset`](RawValue::reset) first,
    /// then storage is selected for the new type, the value is
    /// default-constructed, and `source` is copy-assigned over it if given.
    ///
    /// Passing `None` as the descriptor is equivalent to
    /// [`reset`](RawValue::reset).
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `source`, if given, points to an initialized value of the type
    ///    described by `descriptor`.
    /// 2. `source` does not point into this cell's own storage.
    pub unsafe fn initialize_as(
        &mut self,
        descriptor: Option<&'static TypeDescriptor>,
        source: Option<NonNull<u8>>,
    ) {
        if let (Some(new_descriptor), Some(active)) = (descriptor, self.descriptor) {
            if active.same_type(new_descriptor) {
                let mem = self.resolve_memory_mut(active);
                match source {
                    // SAFETY: the cell is occupied so `mem` holds an
                    // initialized value of the active type (invariant 1);
                    // `source` is a valid, non-aliasing value of the same
                    // type as guaranteed by the caller.
                    Some(source) => unsafe { active.copy_assign(mem, source) },
                    // SAFETY: the cell is occupied so `mem` holds an
                    // initialized value of the active type (invariant 1).
                    None => unsafe { active.clear_to_default(mem) },
                }
                return;
            }
        }

        self.reset();

        let Some(new_descriptor) = descriptor else {
            return;
        };

        let mem = match placement_for(new_descriptor) {
            Placement::Heap => {
                let ptr = allocate(new_descriptor);
                self.storage.heap = ptr.as_ptr();
                ptr
            }
            Placement::Inline => {
                let ptr = (&raw mut self.storage).cast::<u8>();
                // SAFETY: derived from a reference, so never null.
                unsafe { NonNull::new_unchecked(ptr) }
            }
        };

        // SAFETY: `mem` is freshly selected storage, sized and aligned for
        // the new type, holding no constructed value.
        unsafe {
            new_descriptor.default_construct(mem);
        }

        // Publish the descriptor only after construction succeeded, so a
        // panicking constructor leaves the cell empty.
        self.descriptor = Some(new_descriptor);

        if let Some(source) = source {
            // SAFETY: `mem` holds the value just constructed; `source` is a
            // valid, non-aliasing value of the same type as guaranteed by
            // the caller.
            unsafe {
                new_descriptor.copy_assign(mem, source);
            }
        }
    }

    /// Destroys the held value, if any.
    ///
    /// The payload is dropped through the descriptor, the heap block is freed
    /// if the value was heap-placed, and the descriptor is cleared, in that
    /// order. Idempotent. Inline bytes are left stale; invariant 2 keeps them
    /// unreachable.
    pub fn reset(&mut self) {
        let Some(descriptor) = self.descriptor else {
            return;
        };
        let mem = self.resolve_memory_mut(descriptor);

        // SAFETY: the cell is occupied so `mem` holds an initialized value
        // of the active type (invariant 1); it is not used again.
        unsafe {
            descriptor.drop_in_place(mem);
        }

        if matches!(placement_for(descriptor), Placement::Heap) {
            // SAFETY: descriptor layout comes from size_of/align_of of a
            // concrete type, so it is valid.
            let layout =
                unsafe { Layout::from_size_align_unchecked(descriptor.size(), descriptor.align()) };
            // SAFETY: `mem` is the heap block this cell allocated with this
            // exact layout, freed here exactly once before the descriptor is
            // cleared (invariant 3).
            unsafe {
                alloc::alloc::dealloc(mem.as_ptr(), layout);
            }
        }

        self.descriptor = None;
    }

    /// Moves the held value out, leaving this cell empty.
    ///
    /// Heap-placed values transfer descriptor and pointer in O(1) without
    /// touching the payload. Inline values are relocated by copying the
    /// buffer bytes, which is sound because only trivially relocatable types
    /// receive inline placement. In both cases the source is cleared without
    /// running the destructor, since ownership — not a copy — moved.
    #[must_use]
    pub fn take(&mut self) -> RawValue {
        let Some(descriptor) = self.descriptor else {
            return RawValue::empty();
        };
        let storage = match placement_for(descriptor) {
            Placement::Heap => {
                // SAFETY: heap placement means the heap pointer is the
                // active union field (invariant 1).
                let ptr = unsafe { self.storage.heap };
                Storage { heap: ptr }
            }
            Placement::Inline => {
                // SAFETY: inline placement means the buffer is the active
                // union field, and the placement rule certifies the payload
                // trivially relocatable, so the bitwise copy is a
                // relocation.
                let bytes = unsafe { self.storage.inline };
                Storage { inline: bytes }
            }
        };
        self.descriptor = None;
        RawValue {
            storage,
            descriptor: Some(descriptor),
        }
    }

    /// Replaces this cell's contents with a copy of `source`'s value.
    pub fn copy_from(&mut self, source: &RawValue) {
        // SAFETY: `source.memory()` points to an initialized value of
        // `source`'s descriptor type (invariant 1), and the two cells are
        // distinct borrows so the pointers cannot alias this cell's storage.
        unsafe {
            self.initialize_as(source.descriptor, source.memory());
        }
    }

    /// Stores `value`, reusing the existing storage when the cell already
    /// holds a value of type `T`.
    ///
    /// The storage placement for `T` is decided at compile time, so no
    /// descriptor-driven branch is paid on the reuse path.
    pub fn emplace<T: ValueOps>(&mut self, value: T) -> &mut T {
        let descriptor = TypeDescriptor::of::<T>();

        if self.descriptor.is_some_and(|active| active.describes::<T>()) {
            let slot = self.typed_slot::<T>();
            // SAFETY: exact-type match, so `slot` holds an initialized `T`
            // (invariant 1); the assignment drops the old value in place.
            unsafe {
                *slot.as_ptr() = value;
            }
            // SAFETY: `slot` holds an initialized `T` borrowed from `self`.
            return unsafe { &mut *slot.as_ptr() };
        }

        self.reset();

        let heap_placed = const { needs_allocation_for::<T>() };
        let mem: NonNull<u8> = if heap_placed {
            let ptr = allocate(descriptor);
            self.storage.heap = ptr.as_ptr();
            ptr
        } else {
            let ptr = (&raw mut self.storage).cast::<u8>();
            // SAFETY: derived from a reference, so never null.
            unsafe { NonNull::new_unchecked(ptr) }
        };

        // SAFETY: `mem` is freshly selected storage, sized and aligned for
        // `T`, holding no constructed value.
        unsafe {
            mem.cast::<T>().write(value);
        }
        self.descriptor = Some(descriptor);

        // SAFETY: `mem` holds the `T` just written, borrowed from `self`.
        unsafe { &mut *mem.cast::<T>().as_ptr() }
    }

    /// Returns a reference to the held value when its type is exactly `T`.
    ///
    /// The storage placement for `T` is decided at compile time, skipping
    /// the descriptor-driven placement branch.
    #[must_use]
    pub fn typed_ref<T: ValueOps>(&self) -> Option<&T> {
        let descriptor = self.descriptor?;
        if !descriptor.describes::<T>() {
            return None;
        }
        let heap_placed = const { needs_allocation_for::<T>() };
        let ptr: *const u8 = if heap_placed {
            // SAFETY: exact-type match plus heap placement for `T` means the
            // heap pointer is the active union field (invariant 1).
            unsafe { self.storage.heap.cast_const() }
        } else {
            (&raw const self.storage).cast::<u8>()
        };
        // SAFETY: exact-type match means `ptr` holds an initialized `T`
        // (invariant 1); shared access for the lifetime of `&self`.
        Some(unsafe { &*ptr.cast::<T>() })
    }

    /// Returns a mutable reference to the held value when its type is
    /// exactly `T`.
    #[must_use]
    pub fn typed_mut<T: ValueOps>(&mut self) -> Option<&mut T> {
        if !self.descriptor.is_some_and(|active| active.describes::<T>()) {
            return None;
        }
        let slot = self.typed_slot::<T>();
        // SAFETY: exact-type match means `slot` holds an initialized `T`
        // (invariant 1); exclusive access for the lifetime of `&mut self`.
        Some(unsafe { &mut *slot.as_ptr() })
    }

    /// Resolves the payload address for an exact-type match, with the
    /// placement decided at compile time.
    fn typed_slot<T: ValueOps>(&mut self) -> NonNull<T> {
        debug_assert!(self.descriptor.is_some_and(|d| d.describes::<T>()));
        let heap_placed = const { needs_allocation_for::<T>() };
        let ptr: *mut u8 = if heap_placed {
            // SAFETY: exact-type match plus heap placement for `T` means the
            // heap pointer is the active union field (invariant 1).
            unsafe { self.storage.heap }
        } else {
            (&raw mut self.storage).cast::<u8>()
        };
        // SAFETY: occupied cell storage is never null (invariant 3 for heap,
        // reference-derived for inline).
        unsafe { NonNull::new_unchecked(ptr) }.cast::<T>()
    }

    /// Deep-compares two cells.
    ///
    /// `true` only when both hold a value, the descriptors denote exactly
    /// the same type (no subtype leniency), and the descriptor's structural
    /// comparison reports the payloads equal.
    #[must_use]
    pub fn identical(&self, other: &RawValue) -> bool {
        let (Some(a), Some(b)) = (self.descriptor, other.descriptor) else {
            return false;
        };
        if !a.same_type(b) {
            return false;
        }
        // SAFETY: both cells are occupied with values of the same type
        // (invariant 1).
        unsafe { a.compare_equal(self.resolve_memory(a), other.resolve_memory(b)) }
    }

    /// Reports the active descriptor and the payload's own references to the
    /// collector. Does nothing when the cell is empty.
    pub fn collect_references(&self, collector: &mut dyn ReferenceCollector) {
        let Some(descriptor) = self.descriptor else {
            return;
        };
        collector.report_descriptor(descriptor);
        let mem = self.resolve_memory(descriptor);
        // SAFETY: the cell is occupied so `mem` holds an initialized value
        // of the active type (invariant 1).
        unsafe {
            descriptor.collect_references(mem, collector);
        }
    }

    /// Swaps the active descriptor for a layout-identical replacement
    /// without touching the payload bytes.
    ///
    /// This is the first pass of live type replacement: instances holding a
    /// superseded type are re-labeled with a transitional descriptor before
    /// their payloads are migrated through serialization.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The cell is occupied.
    /// 2. `replacement` describes a type with the same size, alignment,
    ///    placement, and field layout as the active type, whose destroy,
    ///    copy, compare, and serialize operations are valid for the payload
    ///    bytes currently stored.
    pub unsafe fn substitute_descriptor(&mut self, replacement: &'static TypeDescriptor) {
        if let Some(active) = self.descriptor {
            debug_assert_eq!(active.size(), replacement.size());
            debug_assert_eq!(active.align(), replacement.align());
            debug_assert_eq!(placement_for(active), placement_for(replacement));
        }
        self.descriptor = Some(replacement);
    }
}

/// Allocates a heap block with the descriptor's exact layout.
fn allocate(descriptor: &TypeDescriptor) -> NonNull<u8> {
    // SAFETY: descriptor layout comes from size_of/align_of of a concrete
    // type, so it is valid.
    let layout = unsafe { Layout::from_size_align_unchecked(descriptor.size(), descriptor.align()) };
    // SAFETY: heap placement implies a non-zero size (zero-sized types are
    // always inline-placed).
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => alloc::alloc::handle_alloc_error(layout),
    }
}

impl Default for RawValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for RawValue {
    fn clone(&self) -> Self {
        let mut cell = RawValue::empty();
        cell.copy_from(self);
        cell
    }
}

impl Drop for RawValue {
    fn drop(&mut self) {
        self.reset();
    }
}

impl core::fmt::Debug for RawValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.descriptor {
            Some(descriptor) => f
                .debug_struct("RawValue")
                .field("type", &descriptor.name())
                .field("placement", &placement_for(descriptor))
                .finish(),
            None => f.write_str("RawValue(empty)"),
        }
    }
}
