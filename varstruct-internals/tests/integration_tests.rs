//! Integration tests for the varstruct-internals crate.
//!
//! These exercise the raw cell, descriptor dispatch, and archive cursors
//! together, across both storage placements:
//!
//! - lifecycle: construct, re-target, reset, drop, with allocation/free
//!   balance verified by drop-counting payloads
//! - moves: `take` leaving the source empty while preserving the value, for
//!   both the inline relocation path and the heap pointer-transfer path
//! - typed access: exact-type fast path against the descriptor-resolved
//!   general path
//! - serialization dispatch: payloads written and read back through the
//!   descriptor vtable, including delta-encoding against defaults

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use varstruct_internals::{
    ArchiveError, ArchiveReader, ArchiveWriter, BUFFER_SIZE, Placement, RawValue, TypeDescriptor,
    ops::{ReferenceCollector, ValueOps},
    placement_for,
};

#[derive(Default, Clone, PartialEq, Debug)]
struct Color {
    rgba: [u8; 4],
}

// SAFETY: no base type, no address-dependent state.
unsafe impl ValueOps for Color {
    const TYPE_NAME: &'static str = "it.Color";

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        // Delta-encode: a leading flag byte says whether the payload differs
        // from the defaults.
        let differs = defaults.is_none_or(|defaults| defaults != self);
        writer.write_u8(differs as u8);
        if differs {
            writer.write_bytes(&self.rgba);
        }
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        let differs = reader.read_u8()? != 0;
        if differs {
            self.rgba.copy_from_slice(reader.read_bytes(4)?);
        } else if let Some(defaults) = defaults {
            self.rgba = defaults.rgba;
        }
        Ok(())
    }
}

#[derive(Default, Clone, PartialEq, Debug)]
struct Samples {
    data: [u64; 6],
}

// SAFETY: no base type, no address-dependent state.
unsafe impl ValueOps for Samples {
    const TYPE_NAME: &'static str = "it.Samples";

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        for value in self.data {
            writer.write_u64(value);
        }
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        for value in &mut self.data {
            *value = reader.read_u64()?;
        }
        Ok(())
    }
}

static LIVE: AtomicUsize = AtomicUsize::new(0);

#[derive(PartialEq, Debug)]
struct Counted {
    generation: u32,
    ballast: [u8; 40],
}

impl Default for Counted {
    fn default() -> Self {
        LIVE.fetch_add(1, Ordering::SeqCst);
        Self {
            generation: 0,
            ballast: [0; 40],
        }
    }
}

impl Clone for Counted {
    fn clone(&self) -> Self {
        LIVE.fetch_add(1, Ordering::SeqCst);
        Self {
            generation: self.generation,
            ballast: self.ballast,
        }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

// SAFETY: no base type, no address-dependent state.
unsafe impl ValueOps for Counted {
    const TYPE_NAME: &'static str = "it.Counted";

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        writer.write_u32(self.generation);
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        self.generation = reader.read_u32()?;
        Ok(())
    }
}

#[test]
fn test_placement_matches_layout() {
    assert!(size_of::<Color>() <= BUFFER_SIZE);
    assert_eq!(
        placement_for(TypeDescriptor::of::<Color>()),
        Placement::Inline
    );

    assert!(size_of::<Samples>() > BUFFER_SIZE);
    assert_eq!(
        placement_for(TypeDescriptor::of::<Samples>()),
        Placement::Heap
    );
}

#[test]
fn test_lifecycle_across_placements() {
    let baseline = LIVE.load(Ordering::SeqCst);
    {
        let mut cell = RawValue::empty();

        // inline -> heap -> inline -> heap, every boundary crossed
        cell.emplace(Color { rgba: [1, 2, 3, 4] });
        cell.emplace(Counted::default());
        assert_eq!(cell.placement(), Some(Placement::Heap));
        cell.emplace(Color { rgba: [5, 6, 7, 8] });
        assert_eq!(cell.placement(), Some(Placement::Inline));
        cell.emplace(Counted::default());

        // same-type re-targeting resets the payload without reallocating
        let addr = cell.memory().map(NonNull::as_ptr);
        // SAFETY: no source pointer is passed.
        unsafe {
            cell.initialize_as(Some(TypeDescriptor::of::<Counted>()), None);
        }
        assert_eq!(cell.memory().map(NonNull::as_ptr), addr);
    }
    assert_eq!(LIVE.load(Ordering::SeqCst), baseline);
}

#[test]
fn test_move_then_use_source() {
    let mut a = RawValue::empty();
    a.emplace(Color {
        rgba: [10, 20, 30, 40],
    });
    let before = a.clone();

    let b = a.take();
    assert!(!a.has_value());
    assert!(b.identical(&before));

    // the emptied source is immediately reusable
    a.emplace(Color { rgba: [0, 0, 0, 1] });
    assert!(a.has_value());
    assert!(!a.identical(&b));
}

#[test]
fn test_move_heap_is_pointer_transfer() {
    let baseline = LIVE.load(Ordering::SeqCst);
    {
        let mut a = RawValue::empty();
        let generation = {
            let counted = a.emplace(Counted::default());
            counted.generation = 7;
            counted.generation
        };
        let addr = a.memory().map(NonNull::as_ptr);

        let b = a.take();
        assert!(!a.has_value());
        assert_eq!(b.memory().map(NonNull::as_ptr), addr);
        assert_eq!(
            b.typed_ref::<Counted>().map(|c| c.generation),
            Some(generation)
        );
        // no copy was made, so exactly one live instance
        assert_eq!(LIVE.load(Ordering::SeqCst), baseline + 1);
    }
    assert_eq!(LIVE.load(Ordering::SeqCst), baseline);
}

#[test]
fn test_serialize_dispatch_roundtrip() {
    let mut cell = RawValue::empty();
    cell.emplace(Samples {
        data: [1, 2, 3, 4, 5, 6],
    });
    let descriptor = cell.descriptor().unwrap();

    let mut writer = ArchiveWriter::new();
    // SAFETY: the cell is occupied and the descriptor is its own.
    unsafe {
        descriptor
            .serialize_value(cell.memory().unwrap(), &mut writer, None)
            .unwrap();
    }

    let bytes = writer.into_bytes();
    let mut restored = RawValue::empty();
    restored.emplace(Samples::default());
    let mut reader = ArchiveReader::new(&bytes);
    // SAFETY: `restored` is occupied by a default `Samples`.
    unsafe {
        descriptor
            .deserialize_value(restored.memory_mut().unwrap(), &mut reader, None)
            .unwrap();
    }

    assert!(cell.identical(&restored));
}

#[test]
fn test_serialize_dispatch_with_defaults_delta() {
    let defaults = Color {
        rgba: [9, 9, 9, 9],
    };

    // Equal to defaults: the delta encoding collapses to the flag byte.
    let mut writer = ArchiveWriter::new();
    defaults
        .serialize_value(&mut writer, Some(&defaults))
        .unwrap();
    assert_eq!(writer.as_slice(), &[0]);

    let mut restored = Color::default();
    let bytes = writer.into_bytes();
    let mut reader = ArchiveReader::new(&bytes);
    restored
        .deserialize_value(&mut reader, Some(&defaults))
        .unwrap();
    assert_eq!(restored, defaults);
}

#[test]
fn test_reference_walk_reports_descriptor() {
    struct Names(Vec<&'static str>);

    impl ReferenceCollector for Names {
        fn report_descriptor(&mut self, descriptor: &'static TypeDescriptor) {
            self.0.push(descriptor.name());
        }
    }

    let mut collector = Names(Vec::new());

    let empty = RawValue::empty();
    empty.collect_references(&mut collector);
    assert!(collector.0.is_empty(), "empty cell must report nothing");

    let mut cell = RawValue::empty();
    cell.emplace(Color::default());
    cell.collect_references(&mut collector);
    assert_eq!(collector.0, ["it.Color"]);
}

#[test]
fn test_identical_requires_exact_type() {
    let mut color = RawValue::empty();
    color.emplace(Color::default());
    let mut samples = RawValue::empty();
    samples.emplace(Samples::default());
    assert!(!color.identical(&samples));
    assert!(color.identical(&color.clone()));
}
