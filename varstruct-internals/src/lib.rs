#![no_std]
#![deny(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::missing_docs_in_private_items,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
#![allow(rustdoc::private_intra_doc_links)]
//! Internal implementation crate for [`varstruct`].
//!
//! # Overview
//!
//! This crate contains the low-level, type-erased data structures and unsafe
//! operations that power the [`varstruct`] container. It provides the storage
//! cell with its small-buffer optimization, the runtime type descriptors with
//! vtable-based dispatch, and the byte-archive cursors the serialization
//! hooks are written against.
//!
//! **This crate is an implementation detail.** No semantic versioning
//! guarantees are provided. Users should depend on the [`varstruct`] crate,
//! not this one.
//!
//! # Architecture
//!
//! - **[`descriptor`]**: Runtime type information
//!   - [`TypeDescriptor`]: `&'static` record of a type's wire name, layout,
//!     base chain, identity, and operations
//!   - `ValueVtable`: function pointers for type-erased dispatch, created in
//!     `const` context per concrete type
//! - **[`value`]**: Type-erased storage
//!   - [`RawValue`]: the cell holding one value of a dynamically selected
//!     type, inline when it fits a fixed buffer and heap-allocated otherwise
//!   - [`Placement`] and the placement predicates deciding which branch a
//!     type takes
//! - **[`ops`]**: the [`ValueOps`] trait host types implement, and the
//!   [`ReferenceCollector`] sink values report their descriptors to
//! - **[`archive`]**: little-endian [`ArchiveWriter`]/[`ArchiveReader`]
//!   cursors with seek-back patching and skip-by-length recovery
//!
//! # Safety Strategy
//!
//! Type erasure requires that the function pointers dispatched for a value
//! always match the concrete type stored in memory. This crate maintains
//! that through:
//!
//! - **Module-based encapsulation**: the descriptor vtable and the cell's
//!   storage fields are module-private, making the invariants locally
//!   verifiable within a single file
//! - **Placement as a pure function**: no stored discriminant can ever
//!   disagree with the descriptor, because the inline/heap decision is
//!   recomputed from the descriptor on every access
//! - **Documented vtable contracts**: each dispatch method specifies exactly
//!   when it can be safely called
//!
//! [`varstruct`]: https://docs.rs/varstruct/latest/varstruct/
//! [`ValueOps`]: ops::ValueOps
//! [`ReferenceCollector`]: ops::ReferenceCollector
//! [`ArchiveWriter`]: archive::ArchiveWriter
//! [`ArchiveReader`]: archive::ArchiveReader

extern crate alloc;

pub mod archive;
mod descriptor;
pub mod ops;
mod value;

pub use archive::{ArchiveError, ArchiveReader, ArchiveWriter};
pub use descriptor::TypeDescriptor;
pub use value::{
    BUFFER_SIZE, CONTAINER_ALIGN, Placement, RawValue, needs_allocation, needs_allocation_for,
    placement_for,
};
