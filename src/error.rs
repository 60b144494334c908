//! Error types for container access and serialization.
//!
//! Two families: [`AccessError`] and [`UnsupportedTypeError`] are contract
//! violations surfaced to the caller immediately, while [`SerError`] covers
//! data-driven conditions hit while reading or writing streams. Unresolvable
//! types encountered during a framed read are *not* errors — the record is
//! skipped by length and reported through
//! [`ReadOutcome`](crate::ser::ReadOutcome); [`SerError::UnresolvedType`] is
//! only produced where no length field exists to skip by (replication).

use alloc::string::String;

use varstruct_internals::ArchiveError;

/// Typed access against the wrong active type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// The container holds no value.
    #[error("container holds no value")]
    Empty,
    /// The active type does not satisfy the requested type.
    #[error("type mismatch: requested `{expected}`, active type is `{actual}`")]
    TypeMismatch {
        /// Wire name of the requested type.
        expected: &'static str,
        /// Wire name of the active type.
        actual: &'static str,
    },
}

/// A descriptor from the reserved set of self-referential wrapper types was
/// used to initialize a container.
///
/// The container must never hold itself or another type-erasure wrapper, as
/// that would permit unbounded recursive erasure. The typed construction
/// path rules this out at compile time; this error guards the
/// descriptor-driven path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported type `{name}`: type-erasure wrappers cannot be nested")]
pub struct UnsupportedTypeError {
    /// Wire name of the rejected type.
    pub name: &'static str,
}

/// Serialization and replication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerError {
    /// A replicated type reference could not be resolved. There is no length
    /// field in the replication framing, so the transmission cannot recover.
    #[error("unresolved type `{name}`")]
    UnresolvedType {
        /// Wire name that failed to resolve.
        name: String,
    },
    /// The stream content is structurally invalid.
    #[error("corrupt stream at offset {offset}: {reason}")]
    Corrupt {
        /// Stream offset at which the problem was detected.
        offset: usize,
        /// Short description of the problem.
        reason: &'static str,
    },
    /// A cursor-level read or write failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// The stream referenced a type from the reserved wrapper set.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedTypeError),
}
