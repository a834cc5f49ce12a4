// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Helper binary that starts a child through `posix_spawnp`
//!
//! `spawn_child [--clean-env] <file> [args...]` spawns `<file>` with the
//! current environment (or an empty one), waits for it and exits with its
//! status.

use std::ffi::CString;
use std::io::{self, Write};

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let clean_env = args.first().is_some_and(|arg| arg == "--clean-env");
    if clean_env {
        args.remove(0);
    }
    if args.is_empty() {
        let _ = writeln!(io::stderr(), "Usage: spawn_child [--clean-env] <file> [args...]");
        std::process::exit(2);
    }

    let argv: Vec<CString> = match args.iter().map(|arg| CString::new(arg.as_str())).collect() {
        Ok(argv) => argv,
        Err(e) => {
            let _ = writeln!(io::stderr(), "spawn_child: {}", e);
            std::process::exit(2);
        }
    };
    let mut argv_ptrs: Vec<*mut libc::c_char> =
        argv.iter().map(|arg| arg.as_ptr() as *mut libc::c_char).collect();
    argv_ptrs.push(std::ptr::null_mut());

    let empty_env: [*mut libc::c_char; 1] = [std::ptr::null_mut()];
    let envp = if clean_env {
        empty_env.as_ptr()
    } else {
        current_environ()
    };

    let mut pid: libc::pid_t = 0;
    let result = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv[0].as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            argv_ptrs.as_ptr(),
            envp,
        )
    };
    if result != 0 {
        let _ = writeln!(
            io::stderr(),
            "spawn_child: posix_spawnp failed: {}",
            io::Error::from_raw_os_error(result)
        );
        std::process::exit(127);
    }

    let mut status = 0;
    if unsafe { libc::waitpid(pid, &mut status, 0) } < 0 {
        let _ = writeln!(io::stderr(), "spawn_child: waitpid failed: {}", io::Error::last_os_error());
        std::process::exit(127);
    }
    if libc::WIFEXITED(status) {
        std::process::exit(libc::WEXITSTATUS(status));
    }
    std::process::exit(128 + libc::WTERMSIG(status));
}

#[cfg(not(target_os = "macos"))]
fn current_environ() -> *const *mut libc::c_char {
    extern "C" {
        static environ: *const *mut libc::c_char;
    }
    unsafe { environ }
}

#[cfg(target_os = "macos")]
fn current_environ() -> *const *mut libc::c_char {
    unsafe { *libc::_NSGetEnviron() as *const *mut libc::c_char }
}
