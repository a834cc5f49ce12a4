// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Preloads the built shim into real programs and checks what the wrapper
//! receives.

#![cfg(target_os = "linux")]

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;

use ah_exec_intercept_e2e_tests::{
    expected_argv, find_shim_path, Interception, ENV_DESTINATION, ENV_LIBRARY, ENV_MARKER,
    ENV_VERBOSE, ENV_WRAPPER, PRELOAD_VAR,
};
use nix::sys::signal::Signal;

fn record_wrapper() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_record_wrapper"))
}

fn spawn_child() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_spawn_child"))
}

fn exec_form() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_exec_form"))
}

fn describe(output: &Output) -> String {
    format!(
        "status={:?}, stdout={:?}, stderr={:?}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn shell_exec_runs_through_the_wrapper() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper()).expect("interception");

    let output = interception
        .command("/bin/sh")
        .args(["-c", "exec /bin/echo intercepted"])
        .output()
        .expect("run sh");

    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "intercepted\n");
    let recorded = interception.recorded_argvs().expect("recorded argv");
    assert_eq!(
        recorded,
        vec![expected_argv(&interception, "/bin/echo", &["intercepted"])]
    );
}

#[test]
fn execvp_keeps_the_file_unresolved() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper()).expect("interception");

    // env(1) starts its operand with execvp.
    let output = interception
        .command("/usr/bin/env")
        .args(["printf", "ok"])
        .output()
        .expect("run env");

    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ok");
    let recorded = interception.recorded_argvs().expect("recorded argv");
    assert_eq!(recorded, vec![expected_argv(&interception, "printf", &["ok"])]);
}

#[test]
fn posix_spawn_children_are_redirected() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper()).expect("interception");

    let output = interception
        .command(spawn_child())
        .args(["printf", "spawned"])
        .output()
        .expect("run spawn_child");

    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "spawned");
    let recorded = interception.recorded_argvs().expect("recorded argv");
    assert_eq!(
        recorded,
        vec![expected_argv(&interception, "printf", &["spawned"])]
    );
}

#[test]
fn session_survives_a_sanitized_environment() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper())
        .expect("interception")
        .advertise_library(true);

    // The child is spawned with an empty environment; the shim puts the
    // session and the preload back.
    let output = interception
        .command(spawn_child())
        .args(["--clean-env", "/bin/echo", "clean"])
        .output()
        .expect("run spawn_child");

    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "clean\n");

    let environments = interception.recorded_environments().expect("recorded env");
    assert_eq!(environments.len(), 1);
    let environment = &environments[0];
    let shim = shim.to_string_lossy();
    assert!(environment.contains(&format!("{PRELOAD_VAR}={shim}")), "{environment:?}");
    assert!(environment.contains(&format!("{ENV_LIBRARY}={shim}")), "{environment:?}");
    assert!(
        environment.contains(&format!(
            "{ENV_WRAPPER}={}",
            record_wrapper().to_string_lossy()
        )),
        "{environment:?}"
    );
    assert!(environment.contains(&format!("{ENV_VERBOSE}=0")), "{environment:?}");
}

#[test]
fn verbose_session_reports_load_and_unload() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper())
        .expect("interception")
        .verbose(true);

    let output = interception.command("/bin/true").output().expect("run true");

    assert!(output.status.success(), "{}", describe(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ah-exec-intercept]"), "{stderr}");
    assert!(stderr.contains(": on_load\n"), "{stderr}");
    assert!(stderr.contains(": on_unload\n"), "{stderr}");
    assert!(interception.recorded_argvs().expect("recorded argv").is_empty());
}

#[test]
fn quiet_session_writes_nothing() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper()).expect("interception");

    let output = interception
        .command("/bin/sh")
        .args(["-c", "exec /bin/true"])
        .output()
        .expect("run sh");

    assert!(output.status.success(), "{}", describe(&output));
    assert!(output.stderr.is_empty(), "{}", describe(&output));
}

#[test]
fn missing_wrapper_aborts_at_load() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper())
        .expect("interception")
        .verbose(true);

    let output = interception
        .command("/bin/true")
        .env_remove(ENV_WRAPPER)
        .output()
        .expect("run true");

    assert_eq!(
        output.status.signal(),
        Some(Signal::SIGABRT as i32),
        "{}",
        describe(&output)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!("fatal: required variable {ENV_WRAPPER} is not set")),
        "{stderr}"
    );
}

#[test]
fn failed_exec_reports_the_real_error() {
    let shim = find_shim_path();
    // The wrapper does not exist: the real execve fails with ENOENT and the
    // shell reports it like any other missing program.
    let interception =
        Interception::new(&shim, Path::new("/nonexistent/wrapper")).expect("interception");

    let output = interception
        .command("/bin/sh")
        .args(["-c", "exec /bin/true"])
        .output()
        .expect("run sh");

    assert!(!output.status.success(), "{}", describe(&output));
    assert_eq!(output.status.signal(), None, "{}", describe(&output));
}

/// Runs `exec_form` under the shim and checks the single recorded call.
fn check_exec_form(form: &str, args: &[&str], path: &str, expected_args: &[&str], stdout: &str) {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper()).expect("interception");

    let output = interception
        .command(exec_form())
        .arg(form)
        .args(args)
        .output()
        .expect("run exec_form");

    assert!(output.status.success(), "{form}: {}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), stdout, "{form}");
    let recorded = interception.recorded_argvs().expect("recorded argv");
    assert_eq!(
        recorded,
        vec![expected_argv(&interception, path, expected_args)],
        "{form}"
    );
}

#[test]
fn execl_without_arguments_runs_through_the_wrapper() {
    check_exec_form("execl", &["/bin/true", "true"], "/bin/true", &[], "");
}

#[test]
fn execl_forwards_every_listed_argument() {
    check_exec_form(
        "execl",
        &["/bin/echo", "echo", "a", "b"],
        "/bin/echo",
        &["a", "b"],
        "a b\n",
    );
}

#[test]
fn execlp_keeps_the_file_unresolved() {
    check_exec_form("execlp", &["echo", "echo", "p"], "echo", &["p"], "p\n");
}

#[test]
fn execv_runs_through_the_wrapper() {
    check_exec_form("execv", &["/bin/echo", "echo", "v"], "/bin/echo", &["v"], "v\n");
}

#[test]
fn exect_runs_through_the_wrapper() {
    check_exec_form("exect", &["/bin/echo", "echo", "t"], "/bin/echo", &["t"], "t\n");
}

#[test]
fn execle_rewrites_the_trailing_environment() {
    let shim = find_shim_path();
    let interception = Interception::new(&shim, &record_wrapper())
        .expect("interception")
        .advertise_library(true);

    // exec_form hands execle an environment holding only the marker.
    let output = interception
        .command(exec_form())
        .args(["execle", "/bin/echo", "echo", "e"])
        .output()
        .expect("run exec_form");

    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "e\n");
    let recorded = interception.recorded_argvs().expect("recorded argv");
    assert_eq!(recorded, vec![expected_argv(&interception, "/bin/echo", &["e"])]);

    let shim = shim.to_string_lossy();
    let mut expected = vec![
        format!("{ENV_MARKER}=execle"),
        format!("{ENV_DESTINATION}={}", interception.destination().to_string_lossy()),
        format!("{ENV_LIBRARY}={shim}"),
        format!("{ENV_VERBOSE}=0"),
        format!("{ENV_WRAPPER}={}", record_wrapper().to_string_lossy()),
        format!("{PRELOAD_VAR}={shim}"),
    ];
    expected.sort();
    let environments = interception.recorded_environments().expect("recorded env");
    assert_eq!(environments, vec![expected]);
}
