// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Helper binary that replaces itself through one of the exec entry points
//!
//! `exec_form <form> <path> <argv0> [args...]` where `<form>` is `execl`,
//! `execlp`, `execle`, `execv` or `exect`. The list forms take at most three
//! arguments after `<argv0>`. `execle` passes an environment holding only
//! `AH_E2E_MARKER=execle`. `exect` is looked up at run time since glibc does
//! not provide it; only a preloaded shim does.

use std::ffi::{c_char, c_int, CString};
use std::ptr;

use ah_exec_intercept_e2e_tests::ENV_MARKER;
use anyhow::{bail, Context};

const MAX_LIST_ARGUMENTS: usize = 4;

type ExectFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;

fn main() {
    if let Err(error) = run() {
        eprintln!("exec_form: {error:#}");
        std::process::exit(127);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: exec_form <form> <path> <argv0> [args...]");
    }
    let form = args[0].as_str();
    let path = CString::new(args[1].as_str()).context("path contains a nul byte")?;
    let argv = args[2..]
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context("argument contains a nul byte")?;

    let result = match form {
        "execl" => execl(&path, &argv)?,
        "execlp" => execlp(&path, &argv)?,
        "execle" => execle(&path, &argv)?,
        "execv" => unsafe { libc::execv(path.as_ptr(), null_terminated(&argv).as_ptr()) },
        "exect" => exect(&path, &argv)?,
        other => bail!("unknown exec form {other}"),
    };
    Err(std::io::Error::last_os_error())
        .with_context(|| format!("{form} returned {result} for {}", args[1]))
}

fn null_terminated(items: &[CString]) -> Vec<*const c_char> {
    items
        .iter()
        .map(|item| item.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// `argv` padded with nulls to the fixed width the list calls below use.
fn list(argv: &[CString]) -> anyhow::Result<[*const c_char; MAX_LIST_ARGUMENTS]> {
    if argv.len() > MAX_LIST_ARGUMENTS {
        bail!("at most {MAX_LIST_ARGUMENTS} arguments for the list forms");
    }
    let mut slots = [ptr::null(); MAX_LIST_ARGUMENTS];
    for (slot, arg) in slots.iter_mut().zip(argv) {
        *slot = arg.as_ptr();
    }
    Ok(slots)
}

// The list ends at the first null; the padding after it is never read.
fn execl(path: &CString, argv: &[CString]) -> anyhow::Result<c_int> {
    let [a0, a1, a2, a3] = list(argv)?;
    Ok(unsafe { libc::execl(path.as_ptr(), a0, a1, a2, a3, ptr::null::<c_char>()) })
}

fn execlp(file: &CString, argv: &[CString]) -> anyhow::Result<c_int> {
    let [a0, a1, a2, a3] = list(argv)?;
    Ok(unsafe { libc::execlp(file.as_ptr(), a0, a1, a2, a3, ptr::null::<c_char>()) })
}

// The environment follows the first null, so each length needs its own call.
fn execle(path: &CString, argv: &[CString]) -> anyhow::Result<c_int> {
    let marker = CString::new(format!("{ENV_MARKER}=execle"))?;
    let envp = [marker.as_ptr(), ptr::null()];
    let envp = envp.as_ptr();
    let path = path.as_ptr();
    let null = ptr::null::<c_char>();
    let [a0, a1, a2, a3] = list(argv)?;
    let result = unsafe {
        match argv.len() {
            1 => libc::execle(path, a0, null, envp),
            2 => libc::execle(path, a0, a1, null, envp),
            3 => libc::execle(path, a0, a1, a2, null, envp),
            _ => libc::execle(path, a0, a1, a2, a3, null, envp),
        }
    };
    Ok(result)
}

fn exect(path: &CString, argv: &[CString]) -> anyhow::Result<c_int> {
    let symbol = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"exect".as_ptr()) };
    if symbol.is_null() {
        bail!("exect is not available in this process");
    }
    let exect: ExectFn = unsafe { std::mem::transmute::<*mut libc::c_void, ExectFn>(symbol) };
    let argv = null_terminated(argv);
    Ok(unsafe { exect(path.as_ptr(), argv.as_ptr(), current_environ()) })
}

fn current_environ() -> *const *const c_char {
    extern "C" {
        static environ: *const *const c_char;
    }
    unsafe { environ }
}
