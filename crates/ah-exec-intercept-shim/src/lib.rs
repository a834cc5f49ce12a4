// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Exec Interception Shim
//!
//! A preloaded library (`LD_PRELOAD`) that redirects every process-creation
//! call of its host process through a supervising wrapper program. A call
//! such as `execvp("gcc", ["gcc", "-c", "a.c"])` runs
//!
//! ```text
//! $AH_EXEC_INTERCEPT_WRAPPER $AH_EXEC_INTERCEPT_DESTINATION -- gcc -c a.c
//! ```
//!
//! instead, with the session variables injected into the new environment so
//! the next process image is intercepted the same way.
//!
//! The shim never touches the heap: everything it keeps lives in a static
//! arena ([`storage`]). The real primitives are found with
//! `dlsym(RTLD_NEXT)` ([`resolver`]). Internal failures abort the process.

#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

pub mod array;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod executor;
pub mod process;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod variadic;

// Not compiled into the unit-test harness, which would otherwise intercept
// its own process creation.
#[cfg(all(target_os = "linux", not(test)))]
pub mod platform;

pub use error::{InterceptError, Result};
