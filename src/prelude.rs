//! Convenience re-exports for the common use of the crate.
//!
//! ```
//! use varstruct::prelude::*;
//! ```

pub use crate::{
    ArchiveError, ArchiveReader, ArchiveWriter, ReferenceCollector, TypeDescriptor, ValueOps,
    VarStruct,
    registry::{self, DescriptorRegistry, StaticRegistry},
    ser::ReadOutcome,
};
