// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Environment lists: lookup and copy-on-write updates.
//!
//! Entries are never modified in place because the list may belong to the
//! caller or to the C runtime. Updates build a fresh, null-terminated list in
//! a [`Storage`] that reuses the untouched entries by pointer.

use core::ffi::{c_char, CStr};

use crate::array::{Iter, StringArray};
use crate::error::Result;
use crate::storage::{Reservation, Storage};

/// `NAME=value` list in the `envp` layout.
#[derive(Clone, Copy, Debug)]
pub struct Environment<'a> {
    entries: StringArray<'a>,
}

impl<'a> Environment<'a> {
    /// # Safety
    ///
    /// Same contract as [`StringArray::from_ptr`].
    pub unsafe fn from_ptr(entries: *const *const c_char) -> Self {
        Self {
            entries: StringArray::from_ptr(entries),
        }
    }

    /// The process environment as it is right now.
    ///
    /// The C runtime owns this list; a later `setenv` may replace it, so the
    /// view should not be kept across calls into foreign code.
    pub fn current() -> Environment<'static> {
        unsafe { Environment::from_ptr(current_environ()) }
    }

    pub fn as_ptr(&self) -> *const *const c_char {
        self.entries.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> Iter<'a> {
        self.entries.iter()
    }

    /// Value of the first entry called `name`.
    pub fn get(&self, name: &[u8]) -> Option<&'a CStr> {
        self.iter().find(|entry| is_named(entry.to_bytes(), name)).map(|entry| {
            // The value starts right after `name=` and shares the terminator.
            unsafe { CStr::from_ptr(entry.as_ptr().add(name.len() + 1)) }
        })
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
unsafe fn current_environ() -> *const *const c_char {
    // https://pubs.opengroup.org/onlinepubs/9699919799/functions/environ.html
    extern "C" {
        static environ: *const *const c_char;
    }
    environ
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
unsafe fn current_environ() -> *const *const c_char {
    // Dylibs cannot link `environ` directly on Darwin.
    *libc::_NSGetEnviron() as *const *const c_char
}

fn is_named(entry: &[u8], name: &[u8]) -> bool {
    entry.len() > name.len() && entry.starts_with(name) && entry[name.len()] == b'='
}

/// One `NAME=value` entry to place in an updated list. The value is the
/// concatenation of up to three pieces so composite values can be written
/// without an intermediate copy.
#[derive(Clone, Copy, Debug)]
pub struct Assignment<'v> {
    name: &'v [u8],
    value: [&'v [u8]; 3],
}

impl<'v> Assignment<'v> {
    pub fn new(name: &'v str, value: &'v [u8]) -> Self {
        Self::joined(name, [value, b"", b""])
    }

    pub fn joined(name: &'v str, value: [&'v [u8]; 3]) -> Self {
        Self {
            name: name.as_bytes(),
            value,
        }
    }

    /// Length of the rendered `NAME=value` entry, terminator excluded.
    pub fn rendered_len(&self) -> usize {
        self.name.len() + 1 + self.value.iter().map(|piece| piece.len()).sum::<usize>()
    }

    fn render<'s>(&self, storage: &'s Storage<'_>) -> Result<&'s CStr> {
        let head: [&[u8]; 2] = [self.name, b"="];
        storage.store_concat(head.into_iter().chain(self.value.iter().copied()))
    }
}

/// Room needed by [`update_all`] for a base of `base_len` entries.
pub fn update_reservation(base_len: usize, assignments: &[Assignment<'_>]) -> Reservation {
    assignments
        .iter()
        .fold(Reservation::new().pointers(base_len + assignments.len() + 1), |total, item| {
            total.cstr(item.rendered_len())
        })
}

/// New list equal to `base` with `name` set to `value`.
///
/// Every existing `name` entry is dropped, the others keep their order, and
/// the new entry goes last.
pub fn insert_or_update<'r>(
    base: Environment<'r>,
    name: &str,
    value: &[u8],
    storage: &'r Storage<'_>,
) -> Result<Environment<'r>> {
    update_all(base, &[Assignment::new(name, value)], storage)
}

/// [`insert_or_update`] for several names at once, producing a single list.
/// The new entries are appended in the order given.
pub fn update_all<'r>(
    base: Environment<'r>,
    assignments: &[Assignment<'_>],
    storage: &'r Storage<'_>,
) -> Result<Environment<'r>> {
    let replaced = |entry: &&CStr| {
        assignments
            .iter()
            .any(|assignment| is_named(entry.to_bytes(), assignment.name))
    };
    let kept = base.iter().filter(|entry| !replaced(entry)).count();

    let slots = storage.pointer_slots(kept + assignments.len() + 1)?;
    let mut index = 0;
    for entry in base.iter().filter(|entry| !replaced(entry)) {
        slots[index] = entry.as_ptr();
        index += 1;
    }
    for assignment in assignments {
        slots[index] = assignment.render(storage)?.as_ptr();
        index += 1;
    }
    Ok(unsafe { Environment::from_ptr(slots.as_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Region;
    use core::ptr;

    fn entries(environment: Environment<'_>) -> Vec<String> {
        environment
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn get_matches_whole_names_only() {
        let raw = [
            c"PATHEXT=.exe".as_ptr(),
            c"PATH=/usr/bin:/bin".as_ptr(),
            c"EMPTY=".as_ptr(),
            ptr::null(),
        ];
        let environment = unsafe { Environment::from_ptr(raw.as_ptr()) };

        assert_eq!(environment.get(b"PATH"), Some(c"/usr/bin:/bin"));
        assert_eq!(environment.get(b"PATHEXT"), Some(c".exe"));
        assert_eq!(environment.get(b"EMPTY"), Some(c""));
        assert_eq!(environment.get(b"PAT"), None);
        assert_eq!(environment.get(b"HOME"), None);
    }

    #[test]
    fn insert_appends_missing_variable() {
        let region = Region::<512>::new();
        let storage = Storage::new(&region);
        let raw = [c"HOME=/root".as_ptr(), c"TERM=xterm".as_ptr(), ptr::null()];
        let base = unsafe { Environment::from_ptr(raw.as_ptr()) };

        let updated = insert_or_update(base, "LANG", b"C", &storage).unwrap();

        assert_eq!(entries(updated), vec!["HOME=/root", "TERM=xterm", "LANG=C"]);
        // The caller's list is left alone.
        assert_eq!(entries(base), vec!["HOME=/root", "TERM=xterm"]);
    }

    #[test]
    fn update_moves_variable_to_the_end_and_drops_duplicates() {
        let region = Region::<512>::new();
        let storage = Storage::new(&region);
        let raw = [
            c"LANG=en_US".as_ptr(),
            c"HOME=/root".as_ptr(),
            c"LANG=de_DE".as_ptr(),
            c"TERM=xterm".as_ptr(),
            ptr::null(),
        ];
        let base = unsafe { Environment::from_ptr(raw.as_ptr()) };

        let updated = insert_or_update(base, "LANG", b"C", &storage).unwrap();

        assert_eq!(entries(updated), vec!["HOME=/root", "TERM=xterm", "LANG=C"]);
    }

    #[test]
    fn unaffected_entries_are_shared_not_copied() {
        let region = Region::<512>::new();
        let storage = Storage::new(&region);
        let raw = [c"HOME=/root".as_ptr(), ptr::null()];
        let base = unsafe { Environment::from_ptr(raw.as_ptr()) };

        let updated = insert_or_update(base, "LANG", b"C", &storage).unwrap();

        assert_eq!(updated.iter().next().unwrap().as_ptr(), raw[0]);
    }

    #[test]
    fn null_base_yields_only_the_assignments() {
        let region = Region::<512>::new();
        let storage = Storage::new(&region);
        let base = unsafe { Environment::from_ptr(ptr::null()) };

        let updated = update_all(
            base,
            &[
                Assignment::new("A", b"1"),
                Assignment::joined("B", [b"x", b":", b"y"]),
            ],
            &storage,
        )
        .unwrap();

        assert_eq!(entries(updated), vec!["A=1", "B=x:y"]);
        assert!(unsafe { *updated.as_ptr().add(2) }.is_null());
    }

    #[test]
    fn reservation_fits_the_update() {
        let region = Region::<1024>::new();
        let storage = Storage::new(&region);
        let raw = [c"A=0".as_ptr(), c"C=3".as_ptr(), ptr::null()];
        let base = unsafe { Environment::from_ptr(raw.as_ptr()) };
        let assignments = [
            Assignment::new("A", b"1"),
            Assignment::joined("B", [b"lib.so", b":", b"other.so"]),
        ];

        let scope = storage
            .scope(update_reservation(base.len(), &assignments))
            .unwrap();
        let updated = update_all(base, &assignments, &scope).unwrap();

        assert_eq!(entries(updated), vec!["C=3", "A=1", "B=lib.so:other.so"]);
    }
}
