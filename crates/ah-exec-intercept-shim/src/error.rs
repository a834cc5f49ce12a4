// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the exec interception shim.
//!
//! Every variant is fatal for the host process: the exported symbols turn an
//! `Err` into [`crate::diagnostics::fatal`]. Failures of the real primitives
//! are not errors here, they are returned to the caller untouched.

use thiserror::Error;

/// Result type alias for shim operations
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Reasons the shim cannot build or perform a redirected call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterceptError {
    #[error("required variable {name} is not set")]
    MissingVariable { name: &'static str },

    #[error("storage exhausted: requested {requested} bytes, {available} available")]
    StorageExhausted { requested: usize, available: usize },

    #[error("unable to find underlying function for {symbol}")]
    SymbolNotFound { symbol: &'static str },
}
