// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Rust side of the variadic bridge (`csrc/variadic.c`)
//!
//! The bridge turns `execl`-style argument lists into arrays and calls back
//! here; these callbacks delegate to the array-style executor operations.

use core::ffi::{c_char, c_int};

use crate::environment::Environment;
use crate::process;

/// Null-initialized slots for `len` pointers.
#[no_mangle]
pub extern "C" fn ah_exec_intercept_argv_slots(len: usize) -> *mut *const c_char {
    process::argv_slots(len)
}

/// Gives back slots from [`ah_exec_intercept_argv_slots`] after the call
/// they fed has returned.
#[no_mangle]
pub extern "C" fn ah_exec_intercept_argv_release(argv: *const *const c_char, len: usize) {
    process::release_argv_slots(argv, len)
}

/// # Safety
///
/// `argv` must be a null-terminated array built by the bridge.
#[no_mangle]
pub unsafe extern "C" fn ah_exec_intercept_execl(
    path: *const c_char,
    argv: *const *const c_char,
) -> c_int {
    process::intercept("execl", |executor| {
        executor.execve(path, argv, Environment::current().as_ptr())
    })
}

/// # Safety
///
/// `argv` must be a null-terminated array built by the bridge.
#[no_mangle]
pub unsafe extern "C" fn ah_exec_intercept_execlp(
    file: *const c_char,
    argv: *const *const c_char,
) -> c_int {
    process::intercept("execlp", |executor| {
        executor.execvpe(file, argv, Environment::current().as_ptr())
    })
}

/// # Safety
///
/// `argv` must be a null-terminated array built by the bridge; `envp` is the
/// caller's trailing environment argument.
#[no_mangle]
pub unsafe extern "C" fn ah_exec_intercept_execle(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("execle", |executor| executor.execve(path, argv, envp))
}
