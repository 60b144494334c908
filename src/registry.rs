//! Descriptor resolution for serialized type references.
//!
//! The codec never assumes how the host organizes its types; everything it
//! needs is the [`DescriptorRegistry`] trait — given a wire name, produce the
//! descriptor, loading it if the host resolves types lazily. A returned
//! descriptor is considered fully loaded.
//!
//! [`StaticRegistry`] is the batteries-included implementation: a hashed
//! name-to-descriptor map behind a read-write lock, plus a process-global
//! instance for hosts that don't need scoped registries. Re-registering a
//! name replaces the previous descriptor, which is what a live type
//! replacement does: subsequent reads of that name resolve to the revised
//! layout.

use hashbrown::HashMap;
use varstruct_internals::{TypeDescriptor, ops::ValueOps};

#[cfg(feature = "std")]
use std::sync as lock_impl;

#[cfg(not(feature = "std"))]
use spin as lock_impl;

/// Resolves a serialized type reference to its descriptor.
pub trait DescriptorRegistry {
    /// Returns the descriptor registered under `name`, or `None` when the
    /// type is unknown.
    ///
    /// For hosts that load type metadata lazily, returning from this method
    /// implies the descriptor is fully loaded and usable.
    fn resolve(&self, name: &str) -> Option<&'static TypeDescriptor>;
}

/// Map from wire names to descriptors.
type DescriptorMap = HashMap<&'static str, &'static TypeDescriptor, rustc_hash::FxBuildHasher>;

/// A lock-guarded name-to-descriptor map.
pub struct StaticRegistry {
    map: lock_impl::RwLock<DescriptorMap>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            map: lock_impl::RwLock::new(HashMap::with_hasher(rustc_hash::FxBuildHasher)),
        }
    }

    /// Registers `T` under its wire name and returns its descriptor.
    ///
    /// Registering a name that is already taken replaces the previous
    /// descriptor; the latest registration wins.
    pub fn register<T: ValueOps>(&self) -> &'static TypeDescriptor {
        let descriptor = TypeDescriptor::of::<T>();
        self.register_descriptor(descriptor);
        descriptor
    }

    /// Registers an already-materialized descriptor under its wire name.
    pub fn register_descriptor(&self, descriptor: &'static TypeDescriptor) {
        #[cfg(feature = "std")]
        let mut map = self.map.write().expect("Unable to acquire registry lock");

        #[cfg(not(feature = "std"))]
        let mut map = self.map.write();

        map.insert(descriptor.name(), descriptor);
    }

    /// Removes the descriptor registered under `name`, returning it.
    pub fn unregister(&self, name: &str) -> Option<&'static TypeDescriptor> {
        #[cfg(feature = "std")]
        let mut map = self.map.write().expect("Unable to acquire registry lock");

        #[cfg(not(feature = "std"))]
        let mut map = self.map.write();

        map.remove(name)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        #[cfg(feature = "std")]
        let map = self.map.read().expect("Unable to acquire registry lock");

        #[cfg(not(feature = "std"))]
        let map = self.map.read();

        map.len()
    }

    /// Whether no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescriptorRegistry for StaticRegistry {
    fn resolve(&self, name: &str) -> Option<&'static TypeDescriptor> {
        #[cfg(feature = "std")]
        let map = self.map.read().expect("Unable to acquire registry lock");

        #[cfg(not(feature = "std"))]
        let map = self.map.read();

        map.get(name).copied()
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-global registry.
static GLOBAL_REGISTRY: StaticRegistry = StaticRegistry::new();

/// Returns the process-global registry.
#[must_use]
pub fn global() -> &'static StaticRegistry {
    &GLOBAL_REGISTRY
}

/// Registers `T` in the process-global registry and returns its descriptor.
pub fn register<T: ValueOps>() -> &'static TypeDescriptor {
    GLOBAL_REGISTRY.register::<T>()
}
