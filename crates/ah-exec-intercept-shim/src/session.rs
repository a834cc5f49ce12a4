// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-process configuration, read from and written back to the environment.

use core::ffi::CStr;

use crate::diagnostics;
use crate::environment::{self, Assignment, Environment};
use crate::error::{InterceptError, Result};
use crate::storage::{Reservation, Storage};

/// Environment variable names for configuration
pub const ENV_WRAPPER: &str = "AH_EXEC_INTERCEPT_WRAPPER";
pub const ENV_DESTINATION: &str = "AH_EXEC_INTERCEPT_DESTINATION";
pub const ENV_VERBOSE: &str = "AH_EXEC_INTERCEPT_VERBOSE";
pub const ENV_LIBRARY: &str = "AH_EXEC_INTERCEPT_LIBRARY";

#[cfg(target_os = "macos")]
pub const ENV_PRELOAD: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const ENV_PRELOAD: &str = "LD_PRELOAD";

pub const DEFAULT_DESTINATION: &CStr = c"/tmp/ah-exec-intercept";

const MAX_ASSIGNMENTS: usize = 5;

/// Where to redirect intercepted calls, and how loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session<'a> {
    wrapper: &'a CStr,
    destination: &'a CStr,
    library: Option<&'a CStr>,
    verbose: bool,
}

impl<'a> Session<'a> {
    /// Reads the recognized variables from `environment`. The wrapper path is
    /// required; everything else has a default.
    pub fn from_environment(environment: Environment<'a>) -> Result<Self> {
        let wrapper = non_empty(environment.get(ENV_WRAPPER.as_bytes())).ok_or(
            InterceptError::MissingVariable { name: ENV_WRAPPER },
        )?;
        let destination = non_empty(environment.get(ENV_DESTINATION.as_bytes()))
            .unwrap_or(DEFAULT_DESTINATION);
        let library = non_empty(environment.get(ENV_LIBRARY.as_bytes()));

        Ok(Self {
            wrapper,
            destination,
            library,
            verbose: is_verbose(environment),
        })
    }

    pub fn wrapper(&self) -> &'a CStr {
        self.wrapper
    }

    pub fn destination(&self) -> &'a CStr {
        self.destination
    }

    pub fn library(&self) -> Option<&'a CStr> {
        self.library
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Copies every string into `storage`, detaching the session from the
    /// environment list it was read from.
    pub fn persist<'s>(&self, storage: &'s Storage<'_>) -> Result<Session<'s>> {
        Ok(Session {
            wrapper: storage.store_cstr(self.wrapper)?,
            destination: storage.store_cstr(self.destination)?,
            library: match self.library {
                Some(library) => Some(storage.store_cstr(library)?),
                None => None,
            },
            verbose: self.verbose,
        })
    }

    /// Writes `tag` to stderr when verbose. Best effort.
    pub fn write_message(&self, tag: &str) {
        if self.verbose {
            diagnostics::emit(format_args!("{tag}"));
        }
    }

    /// `base` with this session's variables set, so the next process image
    /// reconstructs the same session.
    pub fn to_envp<'r>(
        &self,
        base: Environment<'r>,
        storage: &'r Storage<'_>,
    ) -> Result<Environment<'r>> {
        let assignments = self.assignments(base);
        environment::update_all(base, assignments.as_slice(), storage)
    }

    /// Room [`Session::to_envp`] needs for `base`.
    pub fn envp_reservation(&self, base: Environment<'_>) -> Reservation {
        let assignments = self.assignments(base);
        environment::update_reservation(base.len(), assignments.as_slice())
    }

    fn assignments<'v>(&'v self, base: Environment<'v>) -> Assignments<'v> {
        let mut assignments = Assignments::default();
        assignments.push(Assignment::new(ENV_WRAPPER, self.wrapper.to_bytes()));
        assignments.push(Assignment::new(ENV_DESTINATION, self.destination.to_bytes()));
        assignments.push(Assignment::new(
            ENV_VERBOSE,
            if self.verbose { b"1" } else { b"0" },
        ));
        if let Some(library) = self.library {
            let library = library.to_bytes();
            assignments.push(Assignment::new(ENV_LIBRARY, library));
            assignments.push(match non_empty(base.get(ENV_PRELOAD.as_bytes())) {
                Some(current) if lists_library(current.to_bytes(), library) => {
                    Assignment::new(ENV_PRELOAD, current.to_bytes())
                }
                Some(current) => {
                    Assignment::joined(ENV_PRELOAD, [library, b":", current.to_bytes()])
                }
                None => Assignment::new(ENV_PRELOAD, library),
            });
        }
        assignments
    }
}

/// Fixed-capacity list of the assignments `to_envp` applies.
struct Assignments<'v> {
    items: [Assignment<'v>; MAX_ASSIGNMENTS],
    len: usize,
}

impl Default for Assignments<'_> {
    fn default() -> Self {
        Self {
            items: [Assignment::new("", b""); MAX_ASSIGNMENTS],
            len: 0,
        }
    }
}

impl<'v> Assignments<'v> {
    fn push(&mut self, assignment: Assignment<'v>) {
        self.items[self.len] = assignment;
        self.len += 1;
    }

    fn as_slice(&self) -> &[Assignment<'v>] {
        &self.items[..self.len]
    }
}

fn non_empty(value: Option<&CStr>) -> Option<&CStr> {
    value.filter(|value| !value.is_empty())
}

fn lists_library(preload: &[u8], library: &[u8]) -> bool {
    preload
        .split(|byte| *byte == b':' || *byte == b' ')
        .any(|entry| entry == library)
}

/// Whether the verbose variable is set to a truthy value.
pub fn is_verbose(environment: Environment<'_>) -> bool {
    environment
        .get(ENV_VERBOSE.as_bytes())
        .is_some_and(|value| is_truthy(value.to_bytes()))
}

fn is_truthy(value: &[u8]) -> bool {
    [&b"1"[..], b"true", b"yes", b"on"]
        .iter()
        .any(|truthy| value.eq_ignore_ascii_case(truthy))
}
