//! Module containing the type-erased value cell

mod raw;

pub use self::raw::{
    BUFFER_SIZE, CONTAINER_ALIGN, Placement, RawValue, needs_allocation, needs_allocation_for,
    placement_for,
};
