// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Lookup of the real process-creation primitives
//!
//! The shim defines the same symbols it needs to call, so the authentic
//! implementations are found with `dlsym(RTLD_NEXT, ...)`: the search starts
//! in the objects loaded after this one. Each primitive is looked up at most
//! once and the address is kept for the life of the process image.

use core::ffi::{c_char, c_int, c_void, CStr};
use core::ptr::NonNull;

use once_cell::sync::OnceCell;

use crate::error::{InterceptError, Result};

pub type Execve =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;
pub type Execvpe = Execve;
pub type ExecvP =
    unsafe extern "C" fn(*const c_char, *const c_char, *const *const c_char) -> c_int;
pub type PosixSpawn = unsafe extern "C" fn(
    *mut libc::pid_t,
    *const c_char,
    *const libc::posix_spawn_file_actions_t,
    *const libc::posix_spawnattr_t,
    *const *const c_char,
    *const *const c_char,
) -> c_int;
pub type PosixSpawnp = PosixSpawn;

/// Strategy used to find a symbol; null means "not found".
pub type Lookup = unsafe fn(&CStr) -> *mut c_void;

/// The primitives the executor delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Execve,
    Execvpe,
    ExecvP,
    PosixSpawn,
    PosixSpawnp,
}

const PRIMITIVES: usize = 5;

impl Primitive {
    pub fn symbol(self) -> &'static CStr {
        match self {
            Primitive::Execve => c"execve",
            Primitive::Execvpe => c"execvpe",
            Primitive::ExecvP => c"execvP",
            Primitive::PosixSpawn => c"posix_spawn",
            Primitive::PosixSpawnp => c"posix_spawnp",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Execve => "execve",
            Primitive::Execvpe => "execvpe",
            Primitive::ExecvP => "execvP",
            Primitive::PosixSpawn => "posix_spawn",
            Primitive::PosixSpawnp => "posix_spawnp",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Per-primitive address cache in front of a [`Lookup`].
pub struct Resolver {
    lookup: Lookup,
    cache: [OnceCell<usize>; PRIMITIVES],
}

impl Resolver {
    pub const fn new(lookup: Lookup) -> Self {
        Self {
            lookup,
            cache: [const { OnceCell::new() }; PRIMITIVES],
        }
    }

    /// Address of the real `primitive`. A miss is not cached; callers treat
    /// it as fatal.
    pub fn resolve(&self, primitive: Primitive) -> Result<NonNull<c_void>> {
        let address = self.cache[primitive.slot()].get_or_try_init(|| {
            let address = unsafe { (self.lookup)(primitive.symbol()) };
            if address.is_null() {
                tracing::debug!(symbol = primitive.name(), "symbol lookup failed");
                Err(InterceptError::SymbolNotFound {
                    symbol: primitive.name(),
                })
            } else {
                tracing::trace!(symbol = primitive.name(), "symbol resolved");
                Ok(address as usize)
            }
        })?;
        NonNull::new(*address as *mut c_void).ok_or(InterceptError::SymbolNotFound {
            symbol: primitive.name(),
        })
    }

    pub fn execve(&self) -> Result<Execve> {
        let address = self.resolve(Primitive::Execve)?;
        Ok(unsafe { core::mem::transmute::<*mut c_void, Execve>(address.as_ptr()) })
    }

    pub fn execvpe(&self) -> Result<Execvpe> {
        let address = self.resolve(Primitive::Execvpe)?;
        Ok(unsafe { core::mem::transmute::<*mut c_void, Execvpe>(address.as_ptr()) })
    }

    #[allow(non_snake_case)]
    pub fn execvP(&self) -> Result<ExecvP> {
        let address = self.resolve(Primitive::ExecvP)?;
        Ok(unsafe { core::mem::transmute::<*mut c_void, ExecvP>(address.as_ptr()) })
    }

    pub fn posix_spawn(&self) -> Result<PosixSpawn> {
        let address = self.resolve(Primitive::PosixSpawn)?;
        Ok(unsafe { core::mem::transmute::<*mut c_void, PosixSpawn>(address.as_ptr()) })
    }

    pub fn posix_spawnp(&self) -> Result<PosixSpawnp> {
        let address = self.resolve(Primitive::PosixSpawnp)?;
        Ok(unsafe { core::mem::transmute::<*mut c_void, PosixSpawnp>(address.as_ptr()) })
    }
}

/// Production [`Lookup`]: the next definition of `name` in load order.
///
/// # Safety
///
/// Calls into the dynamic linker.
pub unsafe fn dynamic_linker(name: &CStr) -> *mut c_void {
    libc::dlsym(libc::RTLD_NEXT, name.as_ptr())
}
