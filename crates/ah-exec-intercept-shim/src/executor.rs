// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Redirection of process-creation calls through the wrapper
//!
//! Every operation runs the wrapper instead of the requested program:
//!
//! ```text
//! wrapper destination -- path argv[1] ... argv[n-1]
//! ```
//!
//! The original path (or the un-resolved file for the `p` variants) stands
//! in for `argv[0]`; the wrapper execs it with the remaining arguments. The
//! environment gets the session variables so the next image loads the same
//! session. Whatever the real primitive returns, and the `errno` it leaves,
//! reaches the caller unchanged.

use core::ffi::{c_char, c_int, CStr};
use core::ptr;

use crate::array::StringArray;
use crate::environment::Environment;
use crate::error::Result;
use crate::resolver::Resolver;
use crate::session::Session;
use crate::storage::{Reservation, Storage};

const SEPARATOR: &CStr = c"--";
/// wrapper, destination, separator, path
const FIXED_ARGUMENTS: usize = 4;

/// One intercepted call's view of the process-wide state.
pub struct Executor<'a> {
    session: Session<'a>,
    resolver: &'a Resolver,
    storage: &'a Storage<'a>,
}

impl<'a> Executor<'a> {
    pub fn new(session: Session<'a>, resolver: &'a Resolver, storage: &'a Storage<'a>) -> Self {
        Self {
            session,
            resolver,
            storage,
        }
    }

    /// # Safety
    ///
    /// Arguments follow the `execve(2)` contract.
    pub unsafe fn execve(
        &self,
        path: *const c_char,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Result<c_int> {
        let execve = self.resolver.execve()?;
        if path.is_null() {
            return Ok(execve(path, argv, envp));
        }
        self.rewrite(
            CStr::from_ptr(path),
            StringArray::from_ptr(argv),
            Some(Environment::from_ptr(envp)),
            |argv, envp| execve(self.session.wrapper().as_ptr(), argv, envp),
        )
    }

    /// `file` is passed to the wrapper un-resolved; the wrapper itself is
    /// found by its absolute path.
    ///
    /// # Safety
    ///
    /// Arguments follow the `execvpe(3)` contract.
    pub unsafe fn execvpe(
        &self,
        file: *const c_char,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Result<c_int> {
        let execvpe = self.resolver.execvpe()?;
        if file.is_null() {
            return Ok(execvpe(file, argv, envp));
        }
        self.rewrite(
            CStr::from_ptr(file),
            StringArray::from_ptr(argv),
            Some(Environment::from_ptr(envp)),
            |argv, envp| execvpe(self.session.wrapper().as_ptr(), argv, envp),
        )
    }

    /// BSD `execvP`. There is no `envp`: the new image inherits the process
    /// environment, and `search_path` is handed through untouched.
    ///
    /// # Safety
    ///
    /// Arguments follow the `execvP(3)` contract.
    #[allow(non_snake_case)]
    pub unsafe fn execvP(
        &self,
        file: *const c_char,
        search_path: *const c_char,
        argv: *const *const c_char,
    ) -> Result<c_int> {
        let execv_p = self.resolver.execvP()?;
        if file.is_null() {
            return Ok(execv_p(file, search_path, argv));
        }
        self.rewrite(
            CStr::from_ptr(file),
            StringArray::from_ptr(argv),
            None,
            |argv, _| execv_p(self.session.wrapper().as_ptr(), search_path, argv),
        )
    }

    /// File actions and spawn attributes apply to the wrapper as they would
    /// have applied to the target.
    ///
    /// # Safety
    ///
    /// Arguments follow the `posix_spawn(3)` contract.
    pub unsafe fn posix_spawn(
        &self,
        pid: *mut libc::pid_t,
        path: *const c_char,
        file_actions: *const libc::posix_spawn_file_actions_t,
        attrp: *const libc::posix_spawnattr_t,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Result<c_int> {
        let posix_spawn = self.resolver.posix_spawn()?;
        if path.is_null() {
            return Ok(posix_spawn(pid, path, file_actions, attrp, argv, envp));
        }
        self.rewrite(
            CStr::from_ptr(path),
            StringArray::from_ptr(argv),
            Some(Environment::from_ptr(envp)),
            |argv, envp| {
                posix_spawn(
                    pid,
                    self.session.wrapper().as_ptr(),
                    file_actions,
                    attrp,
                    argv,
                    envp,
                )
            },
        )
    }

    /// # Safety
    ///
    /// Arguments follow the `posix_spawnp(3)` contract.
    pub unsafe fn posix_spawnp(
        &self,
        pid: *mut libc::pid_t,
        file: *const c_char,
        file_actions: *const libc::posix_spawn_file_actions_t,
        attrp: *const libc::posix_spawnattr_t,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Result<c_int> {
        let posix_spawnp = self.resolver.posix_spawnp()?;
        if file.is_null() {
            return Ok(posix_spawnp(pid, file, file_actions, attrp, argv, envp));
        }
        self.rewrite(
            CStr::from_ptr(file),
            StringArray::from_ptr(argv),
            Some(Environment::from_ptr(envp)),
            |argv, envp| {
                posix_spawnp(
                    pid,
                    self.session.wrapper().as_ptr(),
                    file_actions,
                    attrp,
                    argv,
                    envp,
                )
            },
        )
    }

    /// Builds the wrapper's argv (and envp, when the primitive takes one) in
    /// a scope of the storage, then runs `call` with them. The scope is
    /// handed back once `call` returns.
    fn rewrite<F>(
        &self,
        path: &CStr,
        argv: StringArray<'_>,
        envp: Option<Environment<'_>>,
        call: F,
    ) -> Result<c_int>
    where
        F: FnOnce(*const *const c_char, *const *const c_char) -> c_int,
    {
        let arguments = argv.iter().skip(1);
        let count = FIXED_ARGUMENTS + arguments.clone().count();

        let mut reservation = Reservation::new().pointers(count + 1);
        if let Some(envp) = envp {
            reservation = reservation.join(self.session.envp_reservation(envp));
        }
        let scope = self.storage.scope(reservation)?;

        let slots = scope.pointer_slots(count + 1)?;
        let fixed = [
            self.session.wrapper(),
            self.session.destination(),
            SEPARATOR,
            path,
        ];
        for (slot, argument) in slots.iter_mut().zip(fixed.into_iter().chain(arguments)) {
            *slot = argument.as_ptr();
        }

        let envp = match envp {
            Some(envp) => self.session.to_envp(envp, &scope)?.as_ptr(),
            None => ptr::null(),
        };
        Ok(call(slots.as_ptr(), envp))
    }
}
