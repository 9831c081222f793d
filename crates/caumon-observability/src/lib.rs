// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # caumon-observability
//!
//! Logging infrastructure shared by the CauMon crates.
//!
//! Provides consistent `tracing` subscriber setup with per-crate debug flag support.
//!
//! ## Features
//! - `file-logging` (default): timestamped per-run log folders with a combined JSON log

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Known CauMon crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "caumon-config",
    "caumon-realtime",
    "caumon-server",
];
