// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # CauMon - real-time telemetry monitoring
//!
//! CauMon ingests a live numeric telemetry stream over TCP, accumulates it into
//! an ordered trace and periodically hands snapshots of that trace to an
//! external analysis engine, which evaluates a temporal-logic formula and
//! renders the result.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! caumon = "0.1"
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use caumon::prelude::*;
//!
//! let config = load_config(None, None).unwrap_or_default();
//! let options = StdioEngineOptions::from_config(&config.engine);
//! let factory = move || -> EngineResult<Box<dyn EngineAdapter>> {
//!     Ok(Box::new(StdioEngine::spawn(&options)?))
//! };
//!
//! let manager = SessionManager::new(&config, Arc::new(factory));
//! manager.configure("time,speed,RPM,gear", "alw_[0,30](speed[t] < 120)");
//! println!("{}", manager.start(config.ingest.port).unwrap());
//! // ... producers stream `time,speed,RPM,gear` lines ...
//! println!("{}", manager.stop());
//! ```
//!
//! ## Feature Flags
//! - **`observability`** (default): `tracing` subscriber setup with per-crate debug flags

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use caumon_config as config;
pub use caumon_realtime as realtime;

#[cfg(feature = "observability")]
pub use caumon_observability as observability;

/// Commonly used types
pub mod prelude {
    pub use caumon_config::{load_config, validate_config, MonitorConfig};
    pub use caumon_realtime::{
        decode_line, parse_signal_names, DataPoint, EngineAdapter, EngineError, EngineFactory,
        EngineResult, Robustness, SessionConfig, SessionError, SessionManager, StartOutcome,
        StdioEngine, StdioEngineOptions, StopOutcome, ThrottleSettings, TraceMatrix,
    };
}
