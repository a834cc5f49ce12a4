// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-capacity arena backing every string and pointer array the shim keeps.
//!
//! The shim runs inside arbitrary host processes, possibly before their own
//! allocator is usable, so it never touches the heap. All memory comes from a
//! statically sized [`Region`] handed out by a monotonic cursor. There is no
//! way to free a single allocation; the whole region goes away with the
//! process image. Running past the end is reported as
//! [`InterceptError::StorageExhausted`], which callers treat as fatal.
//!
//! The one exception to "never freed" is a [`Scope`]: a contiguous block sized
//! up front for the rewritten arguments of a single call. It is given back on
//! drop, but only when nothing was allocated after it.

use core::cell::UnsafeCell;
use core::ffi::{c_char, CStr};
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ops::Deref;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::array::StringArray;
use crate::error::{InterceptError, Result};

const POINTER_SIZE: usize = size_of::<*const c_char>();
const POINTER_ALIGN: usize = align_of::<*const c_char>();
const SCOPE_ALIGN: usize = 16;

/// Zero-initialized backing memory for a [`Storage`].
#[repr(C, align(16))]
pub struct Region<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

// Storage only ever hands out disjoint ranges of the region.
unsafe impl<const N: usize> Sync for Region<N> {}

impl<const N: usize> Region<N> {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }
}

impl<const N: usize> Default for Region<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bump allocator over a [`Region`] (or over a block of a parent storage).
///
/// The cursor is atomic so concurrent callers never receive overlapping
/// ranges; the allocator itself takes no locks.
pub struct Storage<'a> {
    base: *mut u8,
    capacity: usize,
    cursor: AtomicUsize,
    _region: PhantomData<&'a UnsafeCell<[u8]>>,
}

unsafe impl Sync for Storage<'_> {}

impl<'a> Storage<'a> {
    pub const fn new<const N: usize>(region: &'a Region<N>) -> Self {
        Self {
            base: region.bytes.get() as *mut u8,
            capacity: N,
            cursor: AtomicUsize::new(0),
            _region: PhantomData,
        }
    }

    /// Bytes consumed so far, alignment padding included.
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Returns `len` zeroed bytes aligned to `align` (a power of two).
    pub fn allocate(&self, len: usize, align: usize) -> Result<*mut u8> {
        let (_, start, _) = self.reserve(len, align)?;
        let ptr = unsafe { self.base.add(start) };
        unsafe { ptr::write_bytes(ptr, 0, len) };
        Ok(ptr)
    }

    /// Null-initialized pointer slots, ready to be filled and passed on as a
    /// null-terminated `char *[]`.
    #[allow(clippy::mut_from_ref)]
    pub fn pointer_slots(&self, len: usize) -> Result<&mut [*const c_char]> {
        let bytes = len.checked_mul(POINTER_SIZE).ok_or(InterceptError::StorageExhausted {
            requested: usize::MAX,
            available: self.available(),
        })?;
        let ptr = self.allocate(bytes, POINTER_ALIGN)? as *mut *const c_char;
        // All-zero bits are null pointers.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Hands back slots taken with [`Storage::pointer_slots`] when nothing
    /// was allocated after them. Returns whether the cursor moved.
    pub fn release_pointer_slots(&self, slots: *const *const c_char, len: usize) -> bool {
        let Some(start) = (slots as usize).checked_sub(self.base as usize) else {
            return false;
        };
        let end = len
            .checked_mul(POINTER_SIZE)
            .and_then(|bytes| start.checked_add(bytes));
        match end {
            Some(end) if end <= self.capacity => self
                .cursor
                .compare_exchange(end, start, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok(),
            _ => false,
        }
    }

    /// Copies a null-terminated string.
    pub fn store_cstr(&self, value: &CStr) -> Result<&CStr> {
        self.store_concat([value.to_bytes()])
    }

    /// Copies the concatenation of `parts` and terminates it. The parts must
    /// not contain interior nul bytes.
    pub fn store_concat<'p, I>(&self, parts: I) -> Result<&CStr>
    where
        I: IntoIterator<Item = &'p [u8]>,
        I::IntoIter: Clone,
    {
        let parts = parts.into_iter();
        let len: usize = parts.clone().map(<[u8]>::len).sum();
        let ptr = self.allocate(len + 1, 1)?;
        let mut offset = 0;
        for part in parts {
            unsafe { ptr::copy_nonoverlapping(part.as_ptr(), ptr.add(offset), part.len()) };
            offset += part.len();
        }
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len + 1) };
        Ok(unsafe { CStr::from_bytes_with_nul_unchecked(bytes) })
    }

    /// Copies the pointers of a null-terminated array. The strings they point
    /// to are shared, not copied.
    pub fn store_array<'s>(&'s self, items: StringArray<'s>) -> Result<StringArray<'s>> {
        let slots = self.pointer_slots(items.len() + 1)?;
        for (slot, item) in slots.iter_mut().zip(items.iter()) {
            *slot = item.as_ptr();
        }
        Ok(unsafe { StringArray::from_ptr(slots.as_ptr()) })
    }

    /// Carves out a block of `reservation.bytes()` that serves as a nested
    /// storage for a single intercepted call.
    pub fn scope(&self, reservation: Reservation) -> Result<Scope<'_>> {
        let (before, start, end) = self.reserve(reservation.bytes(), SCOPE_ALIGN)?;
        Ok(Scope {
            parent: &self.cursor,
            before,
            end,
            storage: Storage {
                base: unsafe { self.base.add(start) },
                capacity: end - start,
                cursor: AtomicUsize::new(0),
                _region: PhantomData,
            },
        })
    }

    fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Moves the cursor past an aligned block; returns the cursor before the
    /// move and the block bounds, all as offsets from `base`.
    fn reserve(&self, len: usize, align: usize) -> Result<(usize, usize, usize)> {
        debug_assert!(align.is_power_of_two());
        let base = self.base as usize;
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let start = ((base + current + align - 1) & !(align - 1)) - base;
            let end = match start.checked_add(len) {
                Some(end) if end <= self.capacity => end,
                _ => {
                    return Err(InterceptError::StorageExhausted {
                        requested: len,
                        available: self.capacity.saturating_sub(current),
                    })
                }
            };
            match self.cursor.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok((current, start, end)),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Block of a parent [`Storage`] scoped to one intercepted call.
pub struct Scope<'p> {
    parent: &'p AtomicUsize,
    before: usize,
    end: usize,
    storage: Storage<'p>,
}

impl<'p> Deref for Scope<'p> {
    type Target = Storage<'p>;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        // Only the most recent block can be handed back; anything allocated
        // after it keeps it alive for the rest of the process.
        let _ = self.parent.compare_exchange(
            self.end,
            self.before,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

/// Upper bound of the bytes a sequence of allocations needs, padding
/// included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reservation {
    bytes: usize,
}

impl Reservation {
    pub const fn new() -> Self {
        Self { bytes: 0 }
    }

    /// Room for a pointer array of `count` slots.
    pub const fn pointers(self, count: usize) -> Self {
        Self {
            bytes: self.bytes + count * POINTER_SIZE + POINTER_ALIGN - 1,
        }
    }

    /// Room for a string of `len` bytes plus its terminator.
    pub const fn cstr(self, len: usize) -> Self {
        Self {
            bytes: self.bytes + len + 1,
        }
    }

    pub const fn join(self, other: Reservation) -> Self {
        Self {
            bytes: self.bytes + other.bytes,
        }
    }

    pub const fn bytes(self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_zeroed_and_aligned() {
        let region = Region::<128>::new();
        let storage = Storage::new(&region);

        let first = storage.allocate(3, 1).unwrap();
        unsafe { ptr::write_bytes(first, 0xff, 3) };
        let second = storage.allocate(16, 8).unwrap();

        assert_eq!(second as usize % 8, 0);
        let bytes = unsafe { core::slice::from_raw_parts(second, 16) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(storage.used(), 8 + 16);
    }

    #[test]
    fn overflow_is_an_error_and_leaves_the_cursor_alone() {
        let region = Region::<32>::new();
        let storage = Storage::new(&region);
        storage.allocate(20, 1).unwrap();

        let err = storage.allocate(13, 1).unwrap_err();
        assert_eq!(
            err,
            InterceptError::StorageExhausted {
                requested: 13,
                available: 12
            }
        );
        assert_eq!(storage.used(), 20);
        // What still fits is still handed out.
        storage.allocate(12, 1).unwrap();
        assert_eq!(storage.used(), 32);
    }

    #[test]
    fn strings_are_copied_with_terminator() {
        let region = Region::<64>::new();
        let storage = Storage::new(&region);

        let stored = storage.store_cstr(c"/usr/libexec/wrapper").unwrap();
        assert_eq!(stored, c"/usr/libexec/wrapper");
        assert_ne!(stored.as_ptr(), c"/usr/libexec/wrapper".as_ptr());

        let parts: [&[u8]; 3] = [b"NAME", b"=", b"value"];
        let joined = storage.store_concat(parts).unwrap();
        assert_eq!(joined, c"NAME=value");
    }

    #[test]
    fn arrays_share_their_strings() {
        let region = Region::<128>::new();
        let storage = Storage::new(&region);
        let source = [c"gcc".as_ptr(), c"-c".as_ptr(), ptr::null()];

        let copy = storage
            .store_array(unsafe { StringArray::from_ptr(source.as_ptr()) })
            .unwrap();

        assert_ne!(copy.as_ptr(), source.as_ptr());
        let items: Vec<_> = copy.iter().map(CStr::as_ptr).collect();
        assert_eq!(items, vec![source[0], source[1]]);
    }

    #[test]
    fn pointer_slots_are_null() {
        let region = Region::<64>::new();
        let storage = Storage::new(&region);
        let slots = storage.pointer_slots(4).unwrap();
        assert!(slots.iter().all(|slot| slot.is_null()));
    }

    #[test]
    fn last_pointer_slots_are_handed_back() {
        let region = Region::<256>::new();
        let storage = Storage::new(&region);
        storage.allocate(8, 8).unwrap();
        let before = storage.used();

        // Repeated take/release cycles do not grow the arena.
        for _ in 0..100 {
            let slots = storage.pointer_slots(6).unwrap();
            let ptr = slots.as_ptr();
            assert!(storage.release_pointer_slots(ptr, 6));
            assert_eq!(storage.used(), before);
        }

        let slots = storage.pointer_slots(2).unwrap().as_ptr();
        storage.allocate(1, 1).unwrap();
        let after = storage.used();
        assert!(!storage.release_pointer_slots(slots, 2));
        assert_eq!(storage.used(), after);

        let foreign = [ptr::null::<c_char>(); 2];
        assert!(!storage.release_pointer_slots(foreign.as_ptr(), 2));
        assert_eq!(storage.used(), after);
    }

    #[test]
    fn last_scope_is_handed_back() {
        let region = Region::<256>::new();
        let storage = Storage::new(&region);
        storage.allocate(5, 1).unwrap();
        let before = storage.used();

        {
            let scope = storage.scope(Reservation::new().pointers(4).cstr(10)).unwrap();
            scope.pointer_slots(4).unwrap();
            scope.store_cstr(c"0123456789").unwrap();
            assert!(storage.used() > before);
        }

        assert_eq!(storage.used(), before);
    }

    #[test]
    fn scope_followed_by_other_allocations_is_kept() {
        let region = Region::<256>::new();
        let storage = Storage::new(&region);

        let scope = storage.scope(Reservation::new().cstr(8)).unwrap();
        storage.allocate(4, 1).unwrap();
        let after = storage.used();
        drop(scope);

        assert_eq!(storage.used(), after);
    }

    #[test]
    fn scope_is_bounded_by_its_reservation() {
        let region = Region::<256>::new();
        let storage = Storage::new(&region);
        let scope = storage.scope(Reservation::new().cstr(3)).unwrap();

        scope.store_cstr(c"abc").unwrap();
        assert!(matches!(
            scope.store_cstr(c"d"),
            Err(InterceptError::StorageExhausted { .. })
        ));
    }

    #[test]
    fn reservation_covers_pointer_padding() {
        let reservation = Reservation::new().cstr(1).pointers(2);
        let region = Region::<64>::new();
        let storage = Storage::new(&region);
        let scope = storage.scope(reservation).unwrap();

        scope.store_cstr(c"x").unwrap();
        scope.pointer_slots(2).unwrap();
    }
}
