// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Borrowed view over a null-terminated `char *[]` such as `argv` or `envp`.

use core::ffi::{c_char, CStr};
use core::marker::PhantomData;

/// Null-terminated array of C strings owned by someone else.
///
/// A null head is treated as an empty array, matching how Linux handles a
/// null `argv`/`envp` passed to `execve`.
#[derive(Clone, Copy)]
pub struct StringArray<'a> {
    head: *const *const c_char,
    _marker: PhantomData<&'a [&'a CStr]>,
}

impl<'a> StringArray<'a> {
    /// # Safety
    ///
    /// `head` must be null or point to a null-terminated array of valid C
    /// strings that stays alive and unmodified for `'a`.
    pub unsafe fn from_ptr(head: *const *const c_char) -> Self {
        Self {
            head,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const *const c_char {
        self.head
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> Iter<'a> {
        Iter {
            cursor: self.head,
            _marker: PhantomData,
        }
    }
}

impl<'a> IntoIterator for StringArray<'a> {
    type Item = &'a CStr;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl core::fmt::Debug for StringArray<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[derive(Clone)]
pub struct Iter<'a> {
    cursor: *const *const c_char,
    _marker: PhantomData<&'a CStr>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a CStr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        let entry = unsafe { *self.cursor };
        if entry.is_null() {
            return None;
        }
        self.cursor = unsafe { self.cursor.add(1) };
        Some(unsafe { CStr::from_ptr(entry) })
    }
}
