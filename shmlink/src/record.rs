//! Rust structs mirrored onto a channel layout.

use crate::error::ShmResult;
use crate::layout::{Layout, Snapshot};
use static_assertions::const_assert_eq;

/// A struct whose fields map one-to-one onto named layout fields.
///
/// Records are written with a single locked update and read from a guarded
/// snapshot, so a record is always observed whole.
pub trait SharedRecord: Sized {
    /// Layout a channel must use to carry this record.
    fn layout() -> Layout;

    /// `(field, value)` pairs to publish.
    fn to_fields(&self) -> Vec<(&'static str, i64)>;

    /// Rebuild the record from a snapshot.
    fn from_snapshot(snapshot: &Snapshot) -> ShmResult<Self>;
}

/// Pointer update exchanged between the trigger and the mouse consumer.
///
/// Mirrors `struct { int x; int y; int changed; }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerUpdate {
    /// Horizontal motion
    pub x: i32,
    /// Vertical motion
    pub y: i32,
    /// Set to 1 by the producer; reset by the consumer
    pub changed: i32,
}

const_assert_eq!(core::mem::size_of::<PointerUpdate>(), 12);
const_assert_eq!(core::mem::align_of::<PointerUpdate>(), 4);

impl PointerUpdate {
    /// Motion of `step` along x, flagged as changed.
    pub const fn along_x(step: i32) -> Self {
        Self {
            x: step,
            y: 0,
            changed: 1,
        }
    }

    /// Motion of `step` along y, flagged as changed.
    pub const fn along_y(step: i32) -> Self {
        Self {
            x: 0,
            y: step,
            changed: 1,
        }
    }
}

impl SharedRecord for PointerUpdate {
    fn layout() -> Layout {
        Layout::pointer()
    }

    fn to_fields(&self) -> Vec<(&'static str, i64)> {
        vec![
            ("x", self.x as i64),
            ("y", self.y as i64),
            ("changed", self.changed as i64),
        ]
    }

    fn from_snapshot(snapshot: &Snapshot) -> ShmResult<Self> {
        // Values were range checked against i32 fields when written.
        Ok(Self {
            x: snapshot.get("x")? as i32,
            y: snapshot.get("y")? as i32,
            changed: snapshot.get("changed")? as i32,
        })
    }
}
