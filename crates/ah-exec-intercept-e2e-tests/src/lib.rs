// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end tests for the exec interception shim
//!
//! Utilities to preload the built shim into real processes and to read back
//! what the `record_wrapper` binary saw.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use tempfile::TempDir;

#[cfg(target_os = "macos")]
pub const SHIM_NAME: &str = "libah_exec_intercept_shim.dylib";
#[cfg(not(target_os = "macos"))]
pub const SHIM_NAME: &str = "libah_exec_intercept_shim.so";

#[cfg(target_os = "macos")]
pub const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const PRELOAD_VAR: &str = "LD_PRELOAD";

pub const ENV_WRAPPER: &str = "AH_EXEC_INTERCEPT_WRAPPER";
pub const ENV_DESTINATION: &str = "AH_EXEC_INTERCEPT_DESTINATION";
pub const ENV_VERBOSE: &str = "AH_EXEC_INTERCEPT_VERBOSE";
pub const ENV_LIBRARY: &str = "AH_EXEC_INTERCEPT_LIBRARY";

/// Extra variable `record_wrapper` records, so tests can tell which
/// environment list reached the wrapper.
pub const ENV_MARKER: &str = "AH_E2E_MARKER";

/// Suffix of the files `record_wrapper` writes its argv to.
pub const ARGV_SUFFIX: &str = "argv";
/// Suffix of the files `record_wrapper` writes its interception variables to.
pub const ENV_SUFFIX: &str = "env";

const SEARCH_PATH: &str = "/usr/bin:/bin";

/// Find the built shim library, next to the running test binary or under
/// the workspace `target/` directory.
///
/// Panics when the library is missing. `cargo test` builds it through the
/// dev-dependency on the shim crate; so does
/// `cargo build -p ah-exec-intercept-shim`.
pub fn find_shim_path() -> PathBuf {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        // target/<profile>/deps/<test-binary>
        for dir in exe.ancestors().skip(1).take(2) {
            candidates.push(dir.join(SHIM_NAME));
        }
    }
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "debug".into());
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("target")
        .join(profile);
    candidates.push(root.join(SHIM_NAME));
    candidates.push(root.join("deps").join(SHIM_NAME));

    match candidates.iter().find(|path| path.exists()) {
        Some(path) => path.clone(),
        None => panic!(
            "Shim library not found (looked at {candidates:?}). Make sure to build the \
             ah-exec-intercept-shim crate."
        ),
    }
}

/// A destination directory plus the settings used to preload the shim.
pub struct Interception {
    shim: PathBuf,
    wrapper: PathBuf,
    destination: TempDir,
    verbose: bool,
    advertise_library: bool,
}

impl Interception {
    pub fn new(shim: &Path, wrapper: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            shim: shim.to_path_buf(),
            wrapper: wrapper.to_path_buf(),
            destination: TempDir::new().context("Failed to create destination directory")?,
            verbose: false,
            advertise_library: false,
        })
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Also set the library variable, enabling preload propagation.
    pub fn advertise_library(mut self, advertise: bool) -> Self {
        self.advertise_library = advertise;
        self
    }

    pub fn destination(&self) -> &Path {
        self.destination.path()
    }

    pub fn wrapper(&self) -> &Path {
        &self.wrapper
    }

    /// `program` with a clean environment that preloads the shim.
    pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
        let mut command = Command::new(program);
        command
            .env_clear()
            .env("PATH", SEARCH_PATH)
            .env(PRELOAD_VAR, &self.shim)
            .env(ENV_WRAPPER, &self.wrapper)
            .env(ENV_DESTINATION, self.destination.path())
            .env(ENV_VERBOSE, if self.verbose { "1" } else { "0" });
        if self.advertise_library {
            command.env(ENV_LIBRARY, &self.shim);
        }
        command
    }

    /// Argument lists recorded by the wrapper, one per intercepted call.
    pub fn recorded_argvs(&self) -> anyhow::Result<Vec<Vec<String>>> {
        self.recorded(ARGV_SUFFIX)
    }

    /// Interception variables the wrapper saw, one list per intercepted call.
    pub fn recorded_environments(&self) -> anyhow::Result<Vec<Vec<String>>> {
        self.recorded(ENV_SUFFIX)
    }

    fn recorded(&self, suffix: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.destination.path())? {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == suffix) {
                files.push(path);
            }
        }
        files.sort();
        files
            .iter()
            .map(|path| {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok(contents.lines().map(str::to_owned).collect())
            })
            .collect()
    }
}

/// The argv the shim should hand the wrapper for `path` and `args`.
pub fn expected_argv(interception: &Interception, path: &str, args: &[&str]) -> Vec<String> {
    let mut argv = vec![
        interception.wrapper().to_string_lossy().into_owned(),
        interception.destination().to_string_lossy().into_owned(),
        "--".to_owned(),
        path.to_owned(),
    ];
    argv.extend(args.iter().map(|arg| (*arg).to_owned()));
    argv
}
