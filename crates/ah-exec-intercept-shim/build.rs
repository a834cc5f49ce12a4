// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Stable Rust cannot define C-variadic functions, so execl/execlp/execle are
// collected by a small C bridge that calls back into the Rust executor.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=csrc/variadic.c");

    cc::Build::new()
        .file("csrc/variadic.c")
        .warnings(true)
        .compile("ah_exec_intercept_variadic");
}
