//! Shared fixture types for the crate's unit tests.

use varstruct_internals::{ArchiveError, ArchiveReader, ArchiveWriter, TypeDescriptor, ops::ValueOps};

/// 12-byte inline-placed vector.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub(crate) struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// SAFETY: no base type, no address-dependent state.
unsafe impl ValueOps for Vec3 {
    const TYPE_NAME: &'static str = "geom.Vec3";

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        writer.write_f32(self.x);
        writer.write_f32(self.y);
        writer.write_f32(self.z);
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        self.x = reader.read_f32()?;
        self.y = reader.read_f32()?;
        self.z = reader.read_f32()?;
        Ok(())
    }
}

/// 24-byte inline-placed plane extending [`Vec3`] as its layout prefix.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
#[repr(C)]
pub(crate) struct Plane {
    pub normal: Vec3,
    pub distance: f32,
    pub thickness: [f32; 2],
}

// SAFETY: `Plane` is `#[repr(C)]` and its first field is the `Vec3` described
// by the declared base descriptor; no address-dependent state.
unsafe impl ValueOps for Plane {
    const TYPE_NAME: &'static str = "geom.Plane";
    const BASE: Option<fn() -> &'static TypeDescriptor> = Some(TypeDescriptor::of::<Vec3>);

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        self.normal.serialize_value(writer, None)?;
        writer.write_f32(self.distance);
        writer.write_f32(self.thickness[0]);
        writer.write_f32(self.thickness[1]);
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        self.normal.deserialize_value(reader, None)?;
        self.distance = reader.read_f32()?;
        self.thickness[0] = reader.read_f32()?;
        self.thickness[1] = reader.read_f32()?;
        Ok(())
    }
}

/// 64-byte heap-placed matrix.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) struct Matrix4 {
    pub m: [f32; 16],
}

impl Matrix4 {
    /// The identity matrix.
    pub(crate) fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self { m }
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self { m: [0.0; 16] }
    }
}

// SAFETY: no base type, no address-dependent state.
unsafe impl ValueOps for Matrix4 {
    const TYPE_NAME: &'static str = "geom.Matrix4";

    fn serialize_value(
        &self,
        writer: &mut ArchiveWriter,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        for value in self.m {
            writer.write_f32(value);
        }
        Ok(())
    }

    fn deserialize_value(
        &mut self,
        reader: &mut ArchiveReader<'_>,
        _defaults: Option<&Self>,
    ) -> Result<(), ArchiveError> {
        for value in &mut self.m {
            *value = reader.read_f32()?;
        }
        Ok(())
    }
}
