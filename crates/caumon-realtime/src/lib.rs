// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # caumon-realtime
//!
//! Real-time telemetry ingestion with throttled dispatch to an analysis engine.
//!
//! Producers connect over TCP and stream newline-delimited samples
//! (`time,v1,...,vN`). Every accepted sample is appended to the session trace;
//! snapshots of the trace are sent to the engine for evaluation and
//! visualization at most once per configured interval. When a producer
//! disconnects or the session stops, the full trace is evaluated once more and
//! the visualization is saved.
//!
//! ## Modules
//! - [`decoder`]: line protocol and signal list parsing
//! - [`trace`]: append-only trace buffer and engine trace matrices
//! - [`throttle`]: dual-interval dispatch throttling
//! - [`engine`]: engine adapter trait and the stdio process engine
//! - [`session`]: session lifecycle (start/stop/finalize)
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use caumon_config::MonitorConfig;
//! use caumon_realtime::{EngineAdapter, EngineResult, SessionManager, StdioEngine, StdioEngineOptions};
//!
//! let config = MonitorConfig::default();
//! let options = StdioEngineOptions::new("caumon-engine");
//! let factory = move || -> EngineResult<Box<dyn EngineAdapter>> {
//!     Ok(Box::new(StdioEngine::spawn(&options)?))
//! };
//!
//! let manager = SessionManager::new(&config, Arc::new(factory));
//! manager.configure("time,speed,RPM", "alw_[0,30](speed[t] < 120)");
//! let outcome = manager.start(config.ingest.port).unwrap();
//! println!("{}", outcome);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod decoder;
pub mod engine;
pub mod session;
pub mod throttle;
pub mod trace;

pub use decoder::{decode_line, parse_signal_names, DecodeError};
pub use engine::{
    warmup_trace, EngineAdapter, EngineError, EngineFactory, EngineResult, EngineValue,
    Robustness, StdioEngine, StdioEngineOptions,
};
pub use session::{
    CancellationToken, SessionConfig, SessionError, SessionManager, SessionResult,
    SessionSettings, StartOutcome, StopOutcome,
};
pub use throttle::{DispatchDecision, DispatchThrottler, ThrottleSettings};
pub use trace::{DataPoint, TraceBuffer, TraceError, TraceMatrix};
