// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Minimal wrapper for end-to-end tests
//!
//! Invoked by the shim as `record_wrapper <destination> -- <path> [args...]`.
//! Records its own argv (and the interception variables and test marker it
//! inherited) under `<destination>`, then replaces itself with `<path>`. The
//! final exec uses the raw system call so the preloaded shim does not
//! redirect it again.

use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ah_exec_intercept_e2e_tests::{ARGV_SUFFIX, ENV_MARKER, ENV_SUFFIX, PRELOAD_VAR};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

const DEFAULT_SEARCH_PATH: &str = "/usr/bin:/bin";

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("record_wrapper: {error:#}");
        std::process::exit(127);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<OsString> = std::env::args_os().collect();
    if args.len() < 4 || args[2] != "--" {
        bail!("usage: record_wrapper <destination> -- <path> [args...]");
    }

    let destination = Path::new(&args[1]);
    record(destination, &args)?;

    let program = resolve(&args[3])?;
    tracing::debug!(program = %program.display(), "replacing wrapper with target");
    exec(&program, &args[3..])
}

fn record(destination: &Path, args: &[OsString]) -> anyhow::Result<()> {
    let pid = std::process::id();

    let argv: String = args
        .iter()
        .map(|arg| format!("{}\n", arg.to_string_lossy()))
        .collect();
    let argv_file = destination.join(format!("{pid}.{ARGV_SUFFIX}"));
    std::fs::write(&argv_file, argv)
        .with_context(|| format!("Failed to write {}", argv_file.display()))?;

    let mut variables: Vec<String> = std::env::vars_os()
        .filter(|(name, _)| {
            name.to_string_lossy().starts_with("AH_EXEC_INTERCEPT_")
                || name == PRELOAD_VAR
                || name == ENV_MARKER
        })
        .map(|(name, value)| format!("{}={}", name.to_string_lossy(), value.to_string_lossy()))
        .collect();
    variables.sort();
    let env_file = destination.join(format!("{pid}.{ENV_SUFFIX}"));
    let contents: String = variables.iter().map(|line| format!("{line}\n")).collect();
    std::fs::write(&env_file, contents)
        .with_context(|| format!("Failed to write {}", env_file.display()))?;

    tracing::debug!(file = %argv_file.display(), "recorded invocation");
    Ok(())
}

/// `path` as is when it has a slash, otherwise the first executable match
/// along `PATH`.
fn resolve(path: &OsStr) -> anyhow::Result<PathBuf> {
    if path.as_bytes().contains(&b'/') {
        return Ok(PathBuf::from(path));
    }
    let search = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_SEARCH_PATH.into());
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| {
            candidate
                .metadata()
                .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        })
        .with_context(|| format!("{} not found in PATH", path.to_string_lossy()))
}

fn c_string(value: &OsStr) -> anyhow::Result<CString> {
    CString::new(value.as_bytes()).context("argument contains a nul byte")
}

fn exec(program: &Path, argv: &[OsString]) -> anyhow::Result<()> {
    let program = c_string(program.as_os_str())?;
    let argv = argv
        .iter()
        .map(|arg| c_string(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let envp = std::env::vars_os()
        .map(|(name, value)| {
            let mut entry = name;
            entry.push("=");
            entry.push(value);
            c_string(&entry)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let envp_ptrs: Vec<*const libc::c_char> = envp
        .iter()
        .map(|entry| entry.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    raw_execve(&program, &argv_ptrs, &envp_ptrs);
    Err(std::io::Error::last_os_error())
        .with_context(|| format!("Failed to exec {}", program.to_string_lossy()))
}

#[cfg(target_os = "linux")]
fn raw_execve(program: &CString, argv: &[*const libc::c_char], envp: &[*const libc::c_char]) {
    unsafe {
        libc::syscall(
            libc::SYS_execve,
            program.as_ptr(),
            argv.as_ptr(),
            envp.as_ptr(),
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn raw_execve(program: &CString, argv: &[*const libc::c_char], envp: &[*const libc::c_char]) {
    unsafe {
        libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
}
