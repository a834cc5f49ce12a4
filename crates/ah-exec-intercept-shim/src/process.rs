// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide state and the load/unload lifecycle
//!
//! A process image loads the shim exactly once, so the session, the arena and
//! the symbol cache are singletons. The load hook fills the session; after
//! that it is read-only until the image is replaced.
//!
//! Concurrent intercepted calls do not take locks. The arena cursor and the
//! symbol cache are atomic; beyond that the shim relies on exec having a
//! single winner.

use core::ffi::{c_char, c_int};
use core::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;

use crate::diagnostics;
use crate::environment::Environment;
use crate::error::{InterceptError, Result};
use crate::executor::Executor;
use crate::resolver::{self, Resolver};
use crate::session::{self, Session, ENV_WRAPPER};
use crate::storage::{Region, Storage};

const STORAGE_CAPACITY: usize = 256 * 1024;

static REGION: Region<STORAGE_CAPACITY> = Region::new();
pub(crate) static STORAGE: Storage<'static> = Storage::new(&REGION);
static RESOLVER: Resolver = Resolver::new(resolver::dynamic_linker);
static SESSION: OnceCell<Session<'static>> = OnceCell::new();
static LOADED: AtomicBool = AtomicBool::new(false);

/// Reads and persists the session. Runs at most once per load; a missing
/// wrapper path aborts the process.
pub fn on_load() {
    if LOADED.swap(true, Ordering::SeqCst) {
        return;
    }
    match load() {
        Ok(session) => session.write_message("on_load"),
        Err(error) => diagnostics::fatal(session::is_verbose(Environment::current()), &error),
    }
}

pub fn on_unload() {
    if !LOADED.swap(false, Ordering::SeqCst) {
        return;
    }
    if let Some(session) = SESSION.get() {
        session.write_message("on_unload");
    }
}

fn load() -> Result<&'static Session<'static>> {
    let session = Session::from_environment(Environment::current())?.persist(&STORAGE)?;
    tracing::debug!(
        wrapper = ?session.wrapper(),
        destination = ?session.destination(),
        verbose = session.verbose(),
        "exec interception session loaded"
    );
    Ok(SESSION.get_or_init(|| session))
}

/// Verbosity of the loaded session, or of the environment before load.
pub fn verbose() -> bool {
    match SESSION.get() {
        Some(session) => session.verbose(),
        None => session::is_verbose(Environment::current()),
    }
}

/// Runs one intercepted call: reports `tag`, then hands an [`Executor`] to
/// `operation`. Any error is fatal; the value the real primitive returned is
/// passed back as is.
pub fn intercept<F>(tag: &str, operation: F) -> c_int
where
    F: FnOnce(&Executor<'_>) -> Result<c_int>,
{
    let Some(session) = SESSION.get() else {
        diagnostics::fatal(verbose(), &InterceptError::MissingVariable { name: ENV_WRAPPER })
    };
    session.write_message(tag);

    let executor = Executor::new(*session, &RESOLVER, &STORAGE);
    match operation(&executor) {
        Ok(result) => result,
        Err(error) => diagnostics::fatal(session.verbose(), &error),
    }
}

/// Slot array for a variadic argument list, taken from the process arena.
pub(crate) fn argv_slots(len: usize) -> *mut *const c_char {
    match STORAGE.pointer_slots(len) {
        Ok(slots) => slots.as_mut_ptr(),
        Err(error) => diagnostics::fatal(verbose(), &error),
    }
}

/// Returns a slot array from [`argv_slots`] once the exec it fed has failed.
/// A retried `execl` then reuses the same slots.
pub(crate) fn release_argv_slots(slots: *const *const c_char, len: usize) {
    if !STORAGE.release_pointer_slots(slots, len) {
        tracing::trace!(len, "argument slots stay allocated");
    }
}
