// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Linux implementation using LD_PRELOAD
//!
//! The shim defines the process-creation symbols itself; the dynamic linker
//! binds callers to these definitions because the shim is preloaded. Each one
//! reports its tag and delegates to the executor.

use core::ffi::{c_char, c_int};

use crate::environment::Environment;
use crate::process;

#[ctor::ctor]
fn on_load() {
    process::on_load();
}

#[ctor::dtor]
fn on_unload() {
    process::on_unload();
}

/// # Safety
///
/// Same contract as `execve(2)`.
#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("execve", |executor| executor.execve(path, argv, envp))
}

/// # Safety
///
/// Same contract as `execv(3)`.
#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    process::intercept("execv", |executor| {
        executor.execve(path, argv, Environment::current().as_ptr())
    })
}

/// # Safety
///
/// Same contract as `execvpe(3)`.
#[no_mangle]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("execvpe", |executor| executor.execvpe(file, argv, envp))
}

/// # Safety
///
/// Same contract as `execvp(3)`.
#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    process::intercept("execvp", |executor| {
        executor.execvpe(file, argv, Environment::current().as_ptr())
    })
}

/// # Safety
///
/// Same contract as the BSD `execvP(3)`.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn execvP(
    file: *const c_char,
    search_path: *const c_char,
    argv: *const *const c_char,
) -> c_int {
    process::intercept("execvP", |executor| executor.execvP(file, search_path, argv))
}

/// # Safety
///
/// Same contract as the BSD `exect(3)`; runs as `execve`.
#[no_mangle]
pub unsafe extern "C" fn exect(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("exect", |executor| executor.execve(path, argv, envp))
}

/// # Safety
///
/// Same contract as `posix_spawn(3)`.
#[no_mangle]
pub unsafe extern "C" fn posix_spawn(
    pid: *mut libc::pid_t,
    path: *const c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("posix_spawn", |executor| {
        executor.posix_spawn(pid, path, file_actions, attrp, argv, envp)
    })
}

/// # Safety
///
/// Same contract as `posix_spawnp(3)`.
#[no_mangle]
pub unsafe extern "C" fn posix_spawnp(
    pid: *mut libc::pid_t,
    file: *const c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    process::intercept("posix_spawnp", |executor| {
        executor.posix_spawnp(pid, file, file_actions, attrp, argv, envp)
    })
}

// Variadic forms. Rust cannot define a C-variadic function, so these symbols
// are register-preserving jumps into the C bridge, which sees the caller's
// original argument list.

extern "C" {
    fn ah_exec_intercept_va_execl();
    fn ah_exec_intercept_va_execlp();
    fn ah_exec_intercept_va_execle();
}

#[cfg(target_arch = "x86_64")]
macro_rules! tail_jump {
    ($target:ident) => {
        core::arch::naked_asm!("jmp {0}", sym $target)
    };
}

#[cfg(target_arch = "aarch64")]
macro_rules! tail_jump {
    ($target:ident) => {
        core::arch::naked_asm!("b {0}", sym $target)
    };
}

/// `int execl(const char *path, const char *arg, ... /*, (char *) NULL */)`
///
/// # Safety
///
/// Same contract as `execl(3)`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn execl() {
    tail_jump!(ah_exec_intercept_va_execl)
}

/// `int execlp(const char *file, const char *arg, ... /*, (char *) NULL */)`
///
/// # Safety
///
/// Same contract as `execlp(3)`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn execlp() {
    tail_jump!(ah_exec_intercept_va_execlp)
}

/// `int execle(const char *path, const char *arg, ... /*, (char *) NULL, char *const envp[] */)`
///
/// # Safety
///
/// Same contract as `execle(3)`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn execle() {
    tail_jump!(ah_exec_intercept_va_execle)
}
