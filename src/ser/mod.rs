//! Self-describing binary serialization for [`VarStruct`].
//!
//! Every record is framed as a type reference, a 4-byte signed payload
//! length, and the payload bytes produced by the type's own serializer:
//!
//! ```text
//! [u16 name len][name bytes][i32 payload len][payload...]
//! ```
//!
//! The length is written as a placeholder first and patched once the payload
//! size is known, so serializers never have to pre-measure. On the way back
//! in, the length is what makes records skippable: a type reference that no
//! longer resolves leaves the container empty, the payload is stepped over
//! byte-for-byte, and the rest of the stream parses on.
//!
//! A caller-supplied *defaults* container changes both directions: payloads
//! may be delta-encoded against the defaults value, and on load a defaults
//! type that disagrees with the stream wins over the stream — the stale
//! payload is skipped and the defaults are copied in instead.
//!
//! The module also carries the read-side bridge for the legacy non-SBO
//! sibling format (same frame, preceded by a historical sub-header) and the
//! presence-bit replication framing, which has no length field and therefore
//! no skip-based recovery.

use alloc::string::ToString;

use varstruct_internals::{ArchiveReader, ArchiveWriter, TypeDescriptor};

use crate::{
    error::SerError,
    registry::DescriptorRegistry,
    value::{VarStruct, validate_descriptor},
};

/// Wire tag identifying this container's own records in tagged streams.
pub const VALUE_TYPE_TAG: &str = "varstruct.VarStruct";

/// Wire tag of the legacy non-SBO sibling container whose records the
/// read-side bridge accepts.
pub const LEGACY_VALUE_TAG: &str = "varstruct.InstancedValue";

/// Magic constant prefixing the legacy sibling's editor-era sub-header. When
/// absent, the record begins directly at the version byte.
const LEGACY_MAGIC: u32 = 0xABAB_ABAB;

/// Highest legacy sub-header version the bridge understands.
const LEGACY_LATEST_VERSION: u8 = 0;

/// How a framed read left the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The serialized value (possibly "no value") was loaded.
    Value,
    /// The supplied defaults disagreed with the serialized type; the
    /// container was initialized from the defaults and the stale payload was
    /// skipped.
    DefaultsTookPrecedence,
    /// The serialized type could not be resolved; the container was left
    /// empty and the payload was skipped by length.
    SkippedUnknownType,
}

/// Whether two optional descriptors denote the same type (or both none).
fn same_optional_type(
    a: Option<&'static TypeDescriptor>,
    b: Option<&'static TypeDescriptor>,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_type(b),
        (None, None) => true,
        _ => false,
    }
}

impl VarStruct {
    /// Writes one framed record for this container.
    ///
    /// When `defaults` holds a value of the same type, the payload may be
    /// delta-encoded against it; a reader must then supply the same defaults.
    ///
    /// # Errors
    ///
    /// Fails when the payload serializer fails or the payload exceeds the
    /// 4-byte length field.
    pub fn write_value(
        &self,
        writer: &mut ArchiveWriter,
        defaults: Option<&VarStruct>,
    ) -> Result<(), SerError> {
        writer.write_str(self.type_name().unwrap_or(""))?;

        // Reserve the payload length, then patch it back in once known.
        let length_offset = writer.tell();
        writer.write_i32(0);
        let payload_start = writer.tell();

        if let Some(descriptor) = self.descriptor() {
            let defaults_memory = defaults
                .filter(|defaults| same_optional_type(defaults.descriptor(), Some(descriptor)))
                .and_then(|defaults| defaults.raw.memory());
            let memory = self
                .raw
                .memory()
                .expect("occupied container has payload memory");
            // SAFETY: the container is occupied and `descriptor` is its own
            // active descriptor; `defaults_memory`, when present, holds a
            // value of the same type in a distinct container.
            unsafe {
                descriptor.serialize_value(memory, writer, defaults_memory)?;
            }
        }

        let payload_end = writer.tell();
        let Ok(length) = i32::try_from(payload_end - payload_start) else {
            return Err(SerError::Corrupt {
                offset: length_offset,
                reason: "payload length exceeds the 4-byte length field",
            });
        };
        writer.seek(length_offset)?;
        writer.write_i32(length);
        writer.seek(payload_end)?;
        Ok(())
    }

    /// Reads one framed record into this container.
    ///
    /// The type reference is resolved through `registry`. An unresolvable
    /// type is a *recovered* condition: the payload is skipped by its
    /// recorded length, the container is left empty, a warning is logged,
    /// and the call succeeds with [`ReadOutcome::SkippedUnknownType`] so the
    /// surrounding stream stays parseable.
    ///
    /// When `defaults` is supplied and its type disagrees with the stream,
    /// the defaults win: the container is initialized from them and the
    /// stale payload is skipped.
    ///
    /// # Errors
    ///
    /// Fails on cursor-level errors, negative payload lengths, reserved
    /// wrapper types in the stream, or payload deserializer failures.
    pub fn read_value<R: DescriptorRegistry + ?Sized>(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        defaults: Option<&VarStruct>,
        registry: &R,
    ) -> Result<ReadOutcome, SerError> {
        let record_offset = reader.tell();
        let name = reader.read_str()?;
        let resolved = if name.is_empty() {
            None
        } else {
            registry.resolve(name)
        };
        if let Some(descriptor) = resolved {
            validate_descriptor(descriptor)?;
        }

        let length = reader.read_i32()?;
        let Ok(length) = usize::try_from(length) else {
            return Err(SerError::Corrupt {
                offset: record_offset,
                reason: "negative payload length",
            });
        };

        // A defaults value of a different type wins over the stream.
        if let Some(defaults) = defaults {
            if !same_optional_type(defaults.descriptor(), resolved) {
                log::warn!(
                    "varstruct: serialized type `{name}` does not match defaults type `{}`; \
                     keeping defaults and skipping {length} payload bytes",
                    defaults.type_name().unwrap_or("")
                );
                self.raw.copy_from(&defaults.raw);
                reader.skip(length)?;
                return Ok(ReadOutcome::DefaultsTookPrecedence);
            }
        }

        // Initialize storage when the type changes, or whenever defaults
        // supply a starting payload for the delta decode.
        if defaults.is_some() || !same_optional_type(self.descriptor(), resolved) {
            let source = defaults.and_then(|defaults| defaults.raw.memory());
            // SAFETY: when `source` is present its type equals `resolved`
            // (checked above) and it lives in a distinct container, so it
            // cannot alias this container's storage.
            unsafe {
                self.raw.initialize_as(resolved, source);
            }
        }

        if let Some(descriptor) = self.raw.descriptor() {
            let defaults_memory = defaults.and_then(|defaults| defaults.raw.memory());
            let memory = self
                .raw
                .memory_mut()
                .expect("occupied container has payload memory");
            // SAFETY: the container is occupied with a value of the resolved
            // type; `defaults_memory`, when present, holds a value of the
            // same type in a distinct container.
            unsafe {
                descriptor.deserialize_value(memory, reader, defaults_memory)?;
            }
            return Ok(ReadOutcome::Value);
        }

        if length > 0 {
            log::warn!(
                "varstruct: failed to resolve serialized type `{name}`; \
                 skipping {length} payload bytes"
            );
            reader.skip(length)?;
            return Ok(ReadOutcome::SkippedUnknownType);
        }

        Ok(ReadOutcome::Value)
    }

    /// Reads one record written by the legacy non-SBO sibling format.
    ///
    /// The sibling's historical sub-header comes in two revisions: records
    /// written by editor builds start with a fixed magic followed by a
    /// version byte, while all other records start directly at the version
    /// byte. The magic is probed first; when absent, the cursor rewinds and
    /// only the version byte is consumed. After the sub-header, the common
    /// frame applies unchanged. This bridge is one-directional — the legacy
    /// format is read, never written.
    ///
    /// # Errors
    ///
    /// Fails with [`SerError::Corrupt`] on an unknown sub-header version, or
    /// with any error [`read_value`](VarStruct::read_value) can produce.
    pub fn read_legacy_value<R: DescriptorRegistry + ?Sized>(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        registry: &R,
    ) -> Result<ReadOutcome, SerError> {
        let header_offset = reader.tell();
        let magic = reader.read_u32()?;
        if magic != LEGACY_MAGIC {
            // No editor header; the record starts at the version byte.
            reader.seek(header_offset)?;
        }
        let version = reader.read_u8()?;
        if version > LEGACY_LATEST_VERSION {
            return Err(SerError::Corrupt {
                offset: header_offset,
                reason: "unknown legacy format version",
            });
        }
        self.read_value(reader, None, registry)
    }

    /// Reads a record whose surrounding stream carries an explicit type tag,
    /// accepting records written by the legacy sibling format.
    ///
    /// Returns `Ok(None)` when the tag is not one this container can bridge;
    /// the cursor is left untouched in that case so the caller can route the
    /// record elsewhere.
    ///
    /// # Errors
    ///
    /// Any error [`read_legacy_value`](VarStruct::read_legacy_value) can
    /// produce.
    pub fn read_from_mismatched_tag<R: DescriptorRegistry + ?Sized>(
        &mut self,
        tag: &str,
        reader: &mut ArchiveReader<'_>,
        registry: &R,
    ) -> Result<Option<ReadOutcome>, SerError> {
        if tag != LEGACY_VALUE_TAG {
            return Ok(None);
        }
        self.read_legacy_value(reader, registry).map(Some)
    }

    /// Writes the replication framing: a presence byte, then the type
    /// reference and the undelimited payload.
    ///
    /// # Errors
    ///
    /// Fails when the payload serializer fails.
    pub fn write_replicated(&self, writer: &mut ArchiveWriter) -> Result<(), SerError> {
        let Some(descriptor) = self.descriptor() else {
            writer.write_u8(0);
            return Ok(());
        };
        writer.write_u8(1);
        writer.write_str(descriptor.name())?;
        let memory = self
            .raw
            .memory()
            .expect("occupied container has payload memory");
        // SAFETY: the container is occupied and `descriptor` is its own
        // active descriptor.
        unsafe {
            descriptor.serialize_value(memory, writer, None)?;
        }
        Ok(())
    }

    /// Reads the replication framing written by
    /// [`write_replicated`](VarStruct::write_replicated).
    ///
    /// An absent presence bit resets the container. Because the replication
    /// framing carries no payload length, an unresolvable type cannot be
    /// skipped: the whole transmission fails with
    /// [`SerError::UnresolvedType`].
    ///
    /// # Errors
    ///
    /// Fails on cursor-level errors, unresolvable or reserved types, or
    /// payload deserializer failures.
    pub fn read_replicated<R: DescriptorRegistry + ?Sized>(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        registry: &R,
    ) -> Result<(), SerError> {
        if reader.read_u8()? == 0 {
            self.reset();
            return Ok(());
        }

        let name = reader.read_str()?;
        let Some(descriptor) = registry.resolve(name) else {
            log::error!("varstruct: failed to resolve replicated type `{name}`");
            return Err(SerError::UnresolvedType {
                name: name.to_string(),
            });
        };
        validate_descriptor(descriptor)?;

        if !self
            .descriptor()
            .is_some_and(|active| active.same_type(descriptor))
        {
            // SAFETY: no source pointer is passed.
            unsafe {
                self.raw.initialize_as(Some(descriptor), None);
            }
        }

        let memory = self
            .raw
            .memory_mut()
            .expect("occupied container has payload memory");
        // SAFETY: the container is occupied with a value of the resolved
        // type.
        unsafe {
            descriptor.deserialize_value(memory, reader, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use varstruct_internals::ArchiveError;

    use super::*;
    use crate::{
        registry::StaticRegistry,
        testing::{Matrix4, Plane, Vec3},
    };

    fn test_registry() -> StaticRegistry {
        let registry = StaticRegistry::new();
        registry.register::<Vec3>();
        registry.register::<Plane>();
        registry.register::<Matrix4>();
        registry
    }

    #[test]
    fn test_roundtrip_inline_and_heap() {
        let registry = test_registry();
        let small = VarStruct::make(Vec3 {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        let large = VarStruct::make(Matrix4::identity());

        let mut writer = ArchiveWriter::new();
        small.write_value(&mut writer, None).unwrap();
        large.write_value(&mut writer, None).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);

        let mut restored_small = VarStruct::new();
        assert_eq!(
            restored_small
                .read_value(&mut reader, None, &registry)
                .unwrap(),
            ReadOutcome::Value
        );
        let mut restored_large = VarStruct::new();
        assert_eq!(
            restored_large
                .read_value(&mut reader, None, &registry)
                .unwrap(),
            ReadOutcome::Value
        );

        assert!(small.identical(&restored_small));
        assert!(large.identical(&restored_large));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_roundtrip_empty_container() {
        let registry = test_registry();
        let empty = VarStruct::new();

        let mut writer = ArchiveWriter::new();
        empty.write_value(&mut writer, None).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut restored = VarStruct::make(Vec3::default());
        assert_eq!(
            restored.read_value(&mut reader, None, &registry).unwrap(),
            ReadOutcome::Value
        );
        assert!(!restored.has_value());
    }

    #[test]
    fn test_payload_length_is_patched() {
        let container = VarStruct::make(Vec3::default());
        let mut writer = ArchiveWriter::new();
        container.write_value(&mut writer, None).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let name = reader.read_str().unwrap();
        assert_eq!(name, "geom.Vec3");
        let length = reader.read_i32().unwrap();
        assert_eq!(length, 12, "three f32 components");
        assert_eq!(reader.remaining(), 12);
    }

    #[test]
    fn test_skip_on_unresolved_type_keeps_stream_aligned() {
        let registry = test_registry();

        // First record: a type the reading side no longer knows.
        let unknown = VarStruct::make(Plane::default());
        // Second record: a perfectly resolvable value.
        let known = VarStruct::make(Vec3 {
            x: 7.0,
            y: 8.0,
            z: 9.0,
        });

        let mut writer = ArchiveWriter::new();
        unknown.write_value(&mut writer, None).unwrap();
        known.write_value(&mut writer, None).unwrap();

        registry.unregister("geom.Plane");

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);

        let mut first = VarStruct::new();
        assert_eq!(
            first.read_value(&mut reader, None, &registry).unwrap(),
            ReadOutcome::SkippedUnknownType
        );
        assert!(!first.has_value(), "unresolved record leaves it empty");

        let mut second = VarStruct::new();
        assert_eq!(
            second.read_value(&mut reader, None, &registry).unwrap(),
            ReadOutcome::Value
        );
        assert!(second.identical(&known));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_defaults_take_precedence_on_type_mismatch() {
        let registry = test_registry();
        let serialized = VarStruct::make(Vec3 {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        });
        let defaults = VarStruct::make(Plane {
            distance: 2.5,
            ..Plane::default()
        });

        let mut writer = ArchiveWriter::new();
        serialized.write_value(&mut writer, None).unwrap();
        writer.write_u8(0xEE); // trailing sentinel

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut container = VarStruct::new();
        assert_eq!(
            container
                .read_value(&mut reader, Some(&defaults), &registry)
                .unwrap(),
            ReadOutcome::DefaultsTookPrecedence
        );
        assert!(container.identical(&defaults));
        assert_eq!(reader.read_u8().unwrap(), 0xEE, "payload was skipped");
    }

    #[test]
    fn test_matching_defaults_flow_into_payload() {
        let registry = test_registry();
        let value = VarStruct::make(Vec3 {
            x: 5.0,
            y: 6.0,
            z: 7.0,
        });
        let defaults = VarStruct::make(Vec3 {
            x: 5.0,
            y: 0.0,
            z: 0.0,
        });

        let mut writer = ArchiveWriter::new();
        value.write_value(&mut writer, Some(&defaults)).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut restored = VarStruct::new();
        assert_eq!(
            restored
                .read_value(&mut reader, Some(&defaults), &registry)
                .unwrap(),
            ReadOutcome::Value
        );
        assert!(restored.identical(&value));
    }

    #[test]
    fn test_negative_length_is_corrupt() {
        let registry = test_registry();
        let mut writer = ArchiveWriter::new();
        writer.write_str("geom.Vec3").unwrap();
        writer.write_i32(-4);

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut container = VarStruct::new();
        assert!(matches!(
            container.read_value(&mut reader, None, &registry),
            Err(SerError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_reserved_wrapper_type_rejected() {
        // A registry resolving the container's own wire tag simulates a
        // hostile or misconfigured host type system.
        struct Hostile;

        impl DescriptorRegistry for Hostile {
            fn resolve(&self, _name: &str) -> Option<&'static TypeDescriptor> {
                #[derive(Default, Clone, PartialEq)]
                struct Impostor;

                // SAFETY: no base type, no address-dependent state.
                unsafe impl crate::ValueOps for Impostor {
                    const TYPE_NAME: &'static str = VALUE_TYPE_TAG;

                    fn serialize_value(
                        &self,
                        _writer: &mut ArchiveWriter,
                        _defaults: Option<&Self>,
                    ) -> Result<(), ArchiveError> {
                        Ok(())
                    }

                    fn deserialize_value(
                        &mut self,
                        _reader: &mut ArchiveReader<'_>,
                        _defaults: Option<&Self>,
                    ) -> Result<(), ArchiveError> {
                        Ok(())
                    }
                }

                Some(TypeDescriptor::of::<Impostor>())
            }
        }

        let mut writer = ArchiveWriter::new();
        writer.write_str(VALUE_TYPE_TAG).unwrap();
        writer.write_i32(0);

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut container = VarStruct::new();
        assert!(matches!(
            container.read_value(&mut reader, None, &Hostile),
            Err(SerError::Unsupported(_))
        ));
    }

    /// Writes a legacy-framed record by hand: optional magic, version byte,
    /// then the common frame.
    fn write_legacy_record(with_magic: bool, value: &VarStruct) -> alloc::vec::Vec<u8> {
        let mut writer = ArchiveWriter::new();
        if with_magic {
            writer.write_u32(0xABAB_ABAB);
        }
        writer.write_u8(0);
        value.write_value(&mut writer, None).unwrap();
        writer.into_bytes()
    }

    #[test]
    fn test_legacy_bridge_with_magic_header() {
        let registry = test_registry();
        let original = VarStruct::make(Vec3 {
            x: 3.0,
            y: 2.0,
            z: 1.0,
        });
        let bytes = write_legacy_record(true, &original);

        let mut reader = ArchiveReader::new(&bytes);
        let mut restored = VarStruct::new();
        assert_eq!(
            restored.read_legacy_value(&mut reader, &registry).unwrap(),
            ReadOutcome::Value
        );
        assert!(restored.identical(&original));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_legacy_bridge_without_magic_header() {
        let registry = test_registry();
        let original = VarStruct::make(Matrix4::identity());
        let bytes = write_legacy_record(false, &original);

        let mut reader = ArchiveReader::new(&bytes);
        let mut restored = VarStruct::new();
        assert_eq!(
            restored.read_legacy_value(&mut reader, &registry).unwrap(),
            ReadOutcome::Value
        );
        assert!(restored.identical(&original));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_legacy_bridge_rejects_unknown_version() {
        let registry = test_registry();
        let mut writer = ArchiveWriter::new();
        writer.write_u32(0xABAB_ABAB);
        writer.write_u8(9);

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut container = VarStruct::new();
        assert!(matches!(
            container.read_legacy_value(&mut reader, &registry),
            Err(SerError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_mismatched_tag_routing() {
        let registry = test_registry();
        let original = VarStruct::make(Vec3::default());
        let bytes = write_legacy_record(false, &original);

        let mut reader = ArchiveReader::new(&bytes);
        let mut container = VarStruct::new();

        // A foreign tag is not ours to bridge; the cursor must not move.
        assert_eq!(
            container
                .read_from_mismatched_tag("some.OtherType", &mut reader, &registry)
                .unwrap(),
            None
        );
        assert_eq!(reader.tell(), 0);

        assert_eq!(
            container
                .read_from_mismatched_tag(LEGACY_VALUE_TAG, &mut reader, &registry)
                .unwrap(),
            Some(ReadOutcome::Value)
        );
        assert!(container.identical(&original));
    }

    #[test]
    fn test_replication_roundtrip() {
        let registry = test_registry();
        let original = VarStruct::make(Plane {
            distance: 12.0,
            ..Plane::default()
        });

        let mut writer = ArchiveWriter::new();
        original.write_replicated(&mut writer).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut restored = VarStruct::new();
        restored.read_replicated(&mut reader, &registry).unwrap();
        assert!(restored.identical(&original));
    }

    #[test]
    fn test_replication_absent_resets_receiver() {
        let registry = test_registry();
        let mut writer = ArchiveWriter::new();
        VarStruct::new().write_replicated(&mut writer).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut receiver = VarStruct::make(Vec3::default());
        receiver.read_replicated(&mut reader, &registry).unwrap();
        assert!(!receiver.has_value());
    }

    #[test]
    fn test_replication_unresolved_type_fails_hard() {
        let registry = StaticRegistry::new();
        let original = VarStruct::make(Vec3::default());

        let mut writer = ArchiveWriter::new();
        original.write_replicated(&mut writer).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ArchiveReader::new(&bytes);
        let mut receiver = VarStruct::new();
        assert!(matches!(
            receiver.read_replicated(&mut reader, &registry),
            Err(SerError::UnresolvedType { .. })
        ));
    }
}
