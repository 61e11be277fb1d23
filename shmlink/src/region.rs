//! Field-granular access to a mapped region.
//!
//! Naturally aligned fields are read and written as single atomic operations
//! (`Acquire` loads, `Release` stores), so a concurrent reader never sees a
//! half-written value. Fields at unaligned offsets fall back to volatile byte
//! copies bracketed by fences; those are only tear-free under the channel lock.

use crate::layout::Field;
use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering, fence};

/// Borrowed view of a mapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    base: *mut u8,
    len: usize,
}

impl Region {
    /// # Safety
    ///
    /// `base` must point to `len` mapped, writable bytes that stay mapped for
    /// the lifetime of the returned value.
    pub(crate) unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    fn ptr(&self, field: &Field) -> *mut u8 {
        debug_assert!(field.offset() + field.width() <= self.len);
        // SAFETY: offsets come from a layout whose size equals the mapping.
        unsafe { self.base.add(field.offset()) }
    }

    /// Whether `field` can use a single atomic access.
    pub(crate) fn is_atomic(&self, field: &Field) -> bool {
        (self.ptr(field) as usize) % field.width() == 0
    }

    /// Read `field` and sign- or zero-extend it.
    pub(crate) fn load(&self, field: &Field) -> i64 {
        let ptr = self.ptr(field);
        let mut buf = [0u8; 8];

        if self.is_atomic(field) {
            // SAFETY: aligned, in bounds and mapped per `Region::new`.
            unsafe {
                match field.width() {
                    1 => buf[0] = AtomicU8::from_ptr(ptr).load(Ordering::Acquire),
                    2 => buf[..2].copy_from_slice(
                        &AtomicU16::from_ptr(ptr.cast()).load(Ordering::Acquire).to_ne_bytes(),
                    ),
                    4 => buf[..4].copy_from_slice(
                        &AtomicU32::from_ptr(ptr.cast()).load(Ordering::Acquire).to_ne_bytes(),
                    ),
                    _ => buf = AtomicU64::from_ptr(ptr.cast()).load(Ordering::Acquire).to_ne_bytes(),
                }
            }
        } else {
            fence(Ordering::Acquire);
            for (i, byte) in buf.iter_mut().take(field.width()).enumerate() {
                // SAFETY: in bounds per `Region::new`.
                *byte = unsafe { std::ptr::read_volatile(ptr.add(i)) };
            }
            fence(Ordering::Acquire);
        }

        field.ty().decode(buf)
    }

    /// Write `value`, which the caller has range checked.
    pub(crate) fn store(&self, field: &Field, value: i64) {
        let ptr = self.ptr(field);
        let buf = field.ty().encode(value);

        if self.is_atomic(field) {
            // SAFETY: aligned, in bounds and mapped per `Region::new`.
            unsafe {
                match field.width() {
                    1 => AtomicU8::from_ptr(ptr).store(buf[0], Ordering::Release),
                    2 => AtomicU16::from_ptr(ptr.cast())
                        .store(u16::from_ne_bytes([buf[0], buf[1]]), Ordering::Release),
                    4 => AtomicU32::from_ptr(ptr.cast()).store(
                        u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
                        Ordering::Release,
                    ),
                    _ => AtomicU64::from_ptr(ptr.cast())
                        .store(u64::from_ne_bytes(buf), Ordering::Release),
                }
            }
        } else {
            fence(Ordering::Release);
            for (i, byte) in buf.iter().take(field.width()).enumerate() {
                // SAFETY: in bounds per `Region::new`.
                unsafe { std::ptr::write_volatile(ptr.add(i), *byte) };
            }
            fence(Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{FieldType, Layout};

    #[repr(C, align(8))]
    struct Backing([u8; 32]);

    #[test]
    fn aligned_fields_roundtrip() {
        let mut backing = Backing([0; 32]);
        let region = unsafe { Region::new(backing.0.as_mut_ptr(), 12) };
        let layout = Layout::pointer();

        for field in layout.fields() {
            assert!(region.is_atomic(field));
        }
        region.store(layout.field("x").unwrap(), -55);
        region.store(layout.field("changed").unwrap(), 1);

        assert_eq!(region.load(layout.field("x").unwrap()), -55);
        assert_eq!(region.load(layout.field("y").unwrap()), 0);
        assert_eq!(region.load(layout.field("changed").unwrap()), 1);
        assert_eq!(&backing.0[..4], &(-55i32).to_ne_bytes());
    }

    #[test]
    fn unaligned_fields_use_byte_copies() {
        let mut backing = Backing([0; 32]);
        let layout = Layout::builder()
            .field("buttons", FieldType::U8)
            .field("x", FieldType::I16)
            .field("wide", FieldType::U32)
            .build()
            .unwrap();
        let region = unsafe { Region::new(backing.0.as_mut_ptr(), layout.size()) };

        let x = layout.field("x").unwrap();
        let wide = layout.field("wide").unwrap();
        assert!(!region.is_atomic(x));
        assert!(!region.is_atomic(wide));

        region.store(layout.field("buttons").unwrap(), 0xff);
        region.store(x, -2);
        region.store(wide, 4_000_000_000);

        assert_eq!(region.load(layout.field("buttons").unwrap()), 255);
        assert_eq!(region.load(x), -2);
        assert_eq!(region.load(wide), 4_000_000_000);
        assert_eq!(&backing.0[1..3], &(-2i16).to_ne_bytes());
    }
}
