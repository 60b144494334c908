#![cfg_attr(not(doc), no_std)]
#![deny(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A type-erased single-value container with small-buffer optimization and
//! self-describing binary serialization.
//!
//! ## Overview
//!
//! [`VarStruct`] stores one value of a dynamically selected concrete type.
//! Values small enough for a fixed 24-byte inline buffer live inside the
//! container itself; larger, over-aligned, or non-relocatable values fall
//! back to an exactly-sized heap allocation the container owns exclusively.
//! Which branch is active is never stored — it is recomputed from the active
//! type's descriptor, so the container spends no memory on a discriminant
//! and can never disagree with itself about where the value lives.
//!
//! This is the shape of "optional payload of one of many small types":
//! heterogeneous data stored, copied, moved, compared, and streamed to a
//! binary format without virtual dispatch on the value and without a heap
//! allocation for the common small case.
//!
//! ## Quick Example
//!
//! ```
//! use varstruct::{
//!     ArchiveError, ArchiveReader, ArchiveWriter, ValueOps, VarStruct, registry::StaticRegistry,
//! };
//!
//! #[derive(Default, Clone, PartialEq, Debug)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! // SAFETY: no base type is declared and `Position` has no
//! // address-dependent state.
//! unsafe impl ValueOps for Position {
//!     const TYPE_NAME: &'static str = "demo.Position";
//!
//!     fn serialize_value(
//!         &self,
//!         writer: &mut ArchiveWriter,
//!         _defaults: Option<&Self>,
//!     ) -> Result<(), ArchiveError> {
//!         writer.write_f32(self.x);
//!         writer.write_f32(self.y);
//!         Ok(())
//!     }
//!
//!     fn deserialize_value(
//!         &mut self,
//!         reader: &mut ArchiveReader<'_>,
//!         _defaults: Option<&Self>,
//!     ) -> Result<(), ArchiveError> {
//!         self.x = reader.read_f32()?;
//!         self.y = reader.read_f32()?;
//!         Ok(())
//!     }
//! }
//!
//! let registry = StaticRegistry::new();
//! registry.register::<Position>();
//!
//! // Store, access, serialize.
//! let container = VarStruct::make(Position { x: 1.0, y: 2.0 });
//! let mut writer = ArchiveWriter::new();
//! container.write_value(&mut writer, None).unwrap();
//!
//! // Reload into a fresh container.
//! let bytes = writer.into_bytes();
//! let mut restored = VarStruct::new();
//! restored
//!     .read_value(&mut ArchiveReader::new(&bytes), None, &registry)
//!     .unwrap();
//! assert!(restored.identical(&container));
//! ```
//!
//! ## Core Concepts
//!
//! - **Descriptors**: every storable type implements [`ValueOps`], which
//!   materializes a `&'static` [`TypeDescriptor`] carrying the type's wire
//!   name, layout, base chain, and operations. Descriptors are observed, not
//!   owned; their lifetime belongs to the process.
//! - **Placement**: inline when `size <= 24`, alignment fits, and the type
//!   is trivially relocatable; heap otherwise. The rule is a pure function
//!   of the descriptor ([`placement_for`]), and the typed accessors resolve
//!   it at compile time on the exact-type fast path.
//! - **Access modes**: [`VarStruct::value_exact`] demands a precise type
//!   match; [`VarStruct::value`] additionally accepts values whose type
//!   declares the requested type on its base chain, reading the leading
//!   base-layout slice.
//! - **Serialization**: records are self-describing
//!   (`[type ref][i32 length][payload]`), so a reader that cannot resolve a
//!   type skips the record by length and keeps the stream aligned — see
//!   [`ser::ReadOutcome`]. A read-side bridge accepts records written by the
//!   legacy non-SBO sibling format.
//! - **External collaborators**: the [`registry`] resolves wire names to
//!   descriptors, [`ops::ReferenceCollector`] receives the reference walk,
//!   and [`migration::LiveTypeMigration`] drives the two-pass hot-replace
//!   protocol.
//!
//! ## Concurrency
//!
//! A container is not internally synchronized; it assumes exclusive access
//! during mutation and is accordingly neither [`Send`] nor [`Sync`] (stored
//! types need not be). Distinct containers are fully independent. Many
//! containers may observe the same descriptor concurrently; descriptors are
//! immutable statics.
//!
//! For implementation details, see the [`varstruct-internals`] crate.
//!
//! [`varstruct-internals`]: varstruct_internals

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod error;
pub mod migration;
pub mod prelude;
pub mod registry;
pub mod ser;
mod value;

#[cfg(test)]
mod testing;

pub use varstruct_internals::{
    ArchiveError, ArchiveReader, ArchiveWriter, BUFFER_SIZE, CONTAINER_ALIGN, Placement,
    TypeDescriptor, needs_allocation, needs_allocation_for, ops, placement_for,
};

pub use varstruct_internals::ops::{ReferenceCollector, ValueOps};

pub use self::{
    error::{AccessError, SerError, UnsupportedTypeError},
    value::VarStruct,
};
