// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session lifecycle management
//!
//! A [`SessionManager`] owns at most one active monitoring session:
//!
//! ```text
//! Idle --start--> Running --stop--> Idle
//! ```
//!
//! `start` creates a fresh engine and trace and binds the ingestion port.
//! `stop` cancels the accept thread, waits a bounded time for it, runs the
//! final evaluate+save dispatch and shuts the engine down. Both are
//! idempotent and serialized against each other.

mod worker;

pub use worker::CancellationToken;

use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use caumon_config::MonitorConfig;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decoder::parse_signal_names;
use crate::engine::{warmup_trace, EngineAdapter, EngineError, EngineFactory};
use crate::throttle::ThrottleSettings;

use worker::{run_accept_loop, FinalizeOutcome, LoopTiming, SessionShared};

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to initialize engine: {0}")]
    EngineInit(#[source] EngineError),

    #[error("failed to bind ingestion port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("ingestion socket setup failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn accept thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Parameters of one monitoring session, fixed at `start`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Signal names in column order, time excluded
    pub signal_names: Vec<String>,
    pub formula: String,
    pub port: u16,
    /// Where the final visualization is saved
    pub output_path: PathBuf,
}

/// Service-level settings that outlive individual sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub host: String,
    pub default_port: u16,
    pub working_dir: PathBuf,
    pub throttle: ThrottleSettings,
    pub accept_poll_interval: Duration,
    pub read_timeout: Duration,
    pub join_timeout: Duration,
    pub warmup: bool,
}

impl SessionSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            host: config.ingest.host.clone(),
            default_port: config.ingest.port,
            working_dir: config.system.working_dir.clone(),
            throttle: ThrottleSettings::from_config(&config.throttle),
            accept_poll_interval: config.ingest.accept_poll_interval(),
            read_timeout: config.ingest.read_timeout(),
            join_timeout: config.session.join_timeout(),
            warmup: config.engine.warmup,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// Configuration staged for the next `start`
#[derive(Debug, Clone)]
struct PendingConfig {
    signal_names: Vec<String>,
    formula: String,
    output_path: PathBuf,
}

impl PendingConfig {
    fn from_config(config: &MonitorConfig) -> Self {
        Self {
            signal_names: parse_signal_names(&config.session.signals),
            formula: config.session.formula.clone(),
            output_path: config.session.output_file.clone(),
        }
    }

    fn for_port(&self, port: u16) -> SessionConfig {
        SessionConfig {
            signal_names: self.signal_names.clone(),
            formula: self.formula.clone(),
            port,
            output_path: self.output_path.clone(),
        }
    }
}

/// Result of [`SessionManager::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { addr: SocketAddr },
    AlreadyRunning { addr: SocketAddr },
}

impl StartOutcome {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Self::Started { addr } | Self::AlreadyRunning { addr } => *addr,
        }
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { addr } => write!(f, "Server started on port {}", addr.port()),
            Self::AlreadyRunning { addr } => {
                write!(f, "Server is already running on port {}", addr.port())
            }
        }
    }
}

/// Result of [`SessionManager::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { trace_len: usize },
    NotRunning,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped { trace_len } => {
                write!(f, "Server stopped ({} data points received)", trace_len)
            }
            Self::NotRunning => write!(f, "Server is not running"),
        }
    }
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    started_at: Instant,
}

/// Owns the single active ingestion session
///
/// All methods take `&self`; share the manager across threads with `Arc`.
pub struct SessionManager {
    settings: Mutex<SessionSettings>,
    pending: Mutex<PendingConfig>,
    engine_factory: Arc<dyn EngineFactory>,
    /// Lifecycle lock: held for the whole of `start` and `stop`
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    /// Build a manager from the loaded configuration
    pub fn new(config: &MonitorConfig, engine_factory: Arc<dyn EngineFactory>) -> Self {
        Self::with_settings(
            SessionSettings::from_config(config),
            config,
            engine_factory,
        )
    }

    /// Build a manager with explicit service settings; session defaults still
    /// come from `config.session`
    pub fn with_settings(
        settings: SessionSettings,
        config: &MonitorConfig,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            settings: Mutex::new(settings),
            pending: Mutex::new(PendingConfig::from_config(config)),
            engine_factory,
            active: Mutex::new(None),
        }
    }

    /// Stage signals and formula for the next session
    ///
    /// Empty (or whitespace-only) arguments keep the previous value. A
    /// running session is not affected. Returns the staged configuration.
    pub fn configure(&self, signals: &str, formula: &str) -> SessionConfig {
        let mut pending = self.pending.lock();
        if !signals.trim().is_empty() {
            pending.signal_names = parse_signal_names(signals);
        }
        if !formula.trim().is_empty() {
            pending.formula = formula.trim().to_string();
        }
        info!(
            "[SESSION] Configured signals [{}], formula: {}",
            pending.signal_names.join(", "),
            pending.formula
        );
        pending.for_port(self.settings.lock().default_port)
    }

    /// Change where the next session saves its final visualization
    pub fn set_output_path(&self, path: impl Into<PathBuf>) {
        self.pending.lock().output_path = path.into();
    }

    /// Change throttle intervals for the next session
    pub fn set_throttle(&self, throttle: ThrottleSettings) {
        self.settings.lock().throttle = throttle;
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings.lock().clone()
    }

    /// Start a session listening on `port` (0 picks a free port)
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be created or configured, or the port
    /// cannot be bound. Nothing is left running on failure.
    pub fn start(&self, port: u16) -> SessionResult<StartOutcome> {
        let mut active = self.active.lock();
        if let Some(session) = active.as_ref() {
            info!("[SESSION] Start ignored; already running on {}", session.local_addr);
            return Ok(StartOutcome::AlreadyRunning {
                addr: session.local_addr,
            });
        }

        let settings = self.settings.lock().clone();
        let config = self.pending.lock().for_port(port);

        info!("[SESSION] Starting session on port {}...", port);

        let mut engine = self
            .engine_factory
            .create()
            .map_err(SessionError::EngineInit)?;

        if let Err(e) = engine.configure_working_directory(&settings.working_dir) {
            shutdown_quietly(engine.as_mut());
            return Err(SessionError::EngineInit(e));
        }

        if settings.warmup {
            warm_up(engine.as_mut(), &config);
        }

        let listener = match TcpListener::bind((settings.host.as_str(), port)) {
            Ok(listener) => listener,
            Err(source) => {
                shutdown_quietly(engine.as_mut());
                return Err(SessionError::Bind { port, source });
            }
        };

        let local_addr = match listener
            .set_nonblocking(true)
            .and_then(|()| listener.local_addr())
        {
            Ok(addr) => addr,
            Err(e) => {
                shutdown_quietly(engine.as_mut());
                return Err(SessionError::Io(e));
            }
        };

        let config = SessionConfig {
            port: local_addr.port(),
            ..config
        };
        let shared = Arc::new(SessionShared::new(config, engine, settings.throttle));
        let cancel = CancellationToken::new();
        let timing = LoopTiming {
            accept_poll_interval: settings.accept_poll_interval,
            read_timeout: settings.read_timeout,
        };

        let thread_shared = Arc::clone(&shared);
        let thread_cancel = cancel.clone();
        let accept_thread = thread::Builder::new()
            .name("caumon-accept".to_string())
            .spawn(move || run_accept_loop(listener, thread_shared, thread_cancel, timing));

        let accept_thread = match accept_thread {
            Ok(handle) => handle,
            Err(e) => {
                shared.shutdown_engine();
                return Err(SessionError::Spawn(e));
            }
        };

        *active = Some(ActiveSession {
            shared,
            cancel,
            accept_thread: Some(accept_thread),
            local_addr,
            started_at: Instant::now(),
        });

        info!("[SESSION] Server is listening on {}", local_addr);
        Ok(StartOutcome::Started { addr: local_addr })
    }

    /// Stop the active session
    ///
    /// Waits at most the configured join timeout for the accept thread, then
    /// finalizes (if new data arrived since the last finalization) and shuts
    /// the engine down.
    pub fn stop(&self) -> StopOutcome {
        let mut active = self.active.lock();
        let Some(mut session) = active.take() else {
            debug!("[SESSION] Stop ignored; not running");
            return StopOutcome::NotRunning;
        };

        info!("[SESSION] Stopping session on {}...", session.local_addr);
        session.cancel.cancel();

        let join_timeout = self.settings.lock().join_timeout;
        if let Some(handle) = session.accept_thread.take() {
            join_with_timeout(handle, join_timeout);
        }

        if let FinalizeOutcome::Completed { trace_len } =
            session.shared.finalize(&session.shared.config.output_path)
        {
            debug!("[SESSION] Finalized {} points during stop", trace_len);
        }
        session.shared.shutdown_engine();

        let trace_len = session.shared.trace.size();
        info!(
            "[SESSION] Session stopped after {:?} ({} data points)",
            session.started_at.elapsed(),
            trace_len
        );
        StopOutcome::Stopped { trace_len }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Address the active session is listening on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().as_ref().map(|s| s.local_addr)
    }

    /// Number of points in the active session's trace
    pub fn trace_len(&self) -> Option<usize> {
        self.active.lock().as_ref().map(|s| s.shared.trace.size())
    }

    /// Configuration of the active session
    pub fn session_config(&self) -> Option<SessionConfig> {
        self.active.lock().as_ref().map(|s| s.shared.config.clone())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            self.stop();
        }
    }
}

fn warm_up(engine: &mut dyn EngineAdapter, config: &SessionConfig) {
    info!("[ENGINE] Warming up engine '{}'...", engine.name());
    let trace = warmup_trace(config.signal_names.len());
    let started = Instant::now();

    let result = engine
        .evaluate(&trace, &config.signal_names, &config.formula)
        .and_then(|results| {
            engine.visualize(&trace, &config.signal_names, &config.formula, &results, None)
        });

    match result {
        Ok(()) => info!("[ENGINE] Warm-up completed in {:?}", started.elapsed()),
        Err(e) => warn!("[ENGINE] Warm-up failed, continuing without it: {}", e),
    }
}

fn shutdown_quietly(engine: &mut dyn EngineAdapter) {
    if let Err(e) = engine.shutdown() {
        warn!("[ENGINE] Engine '{}' shutdown failed: {}", engine.name(), e);
    }
}

/// Join `handle`, giving up after `timeout`
///
/// `JoinHandle` has no timed join, so a helper thread performs the join and
/// reports back over a channel.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel();

    let joiner = thread::Builder::new()
        .name("caumon-accept-join".to_string())
        .spawn(move || {
            let _ = tx.send(handle.join());
        });
    if let Err(e) = joiner {
        warn!("[SESSION] Could not spawn join helper ({}); not waiting for accept thread", e);
        return;
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => info!("[SESSION] Accept thread stopped cleanly"),
        Ok(Err(_)) => warn!("[SESSION] Accept thread panicked during shutdown"),
        Err(RecvTimeoutError::Timeout) => warn!(
            "[SESSION] Accept thread did not stop within {:?}, proceeding with shutdown",
            started.elapsed()
        ),
        Err(RecvTimeoutError::Disconnected) => {
            warn!("[SESSION] Join helper disconnected unexpectedly")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineResult, Robustness};
    use crate::trace::TraceMatrix;
    use std::path::Path;

    struct NullEngine;

    impl EngineAdapter for NullEngine {
        fn configure_working_directory(&mut self, _path: &Path) -> EngineResult<()> {
            Ok(())
        }
        fn evaluate(&mut self, _: &TraceMatrix, _: &[String], _: &str) -> EngineResult<Robustness> {
            Ok(Robustness::default())
        }
        fn visualize(
            &mut self,
            _: &TraceMatrix,
            _: &[String],
            _: &str,
            _: &Robustness,
            _: Option<&Path>,
        ) -> EngineResult<()> {
            Ok(())
        }
        fn shutdown(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }

    fn manager() -> SessionManager {
        let factory = || -> EngineResult<Box<dyn EngineAdapter>> { Ok(Box::new(NullEngine)) };
        SessionManager::new(&MonitorConfig::default(), Arc::new(factory))
    }

    #[test]
    fn test_defaults_from_config() {
        let manager = manager();
        let staged = manager.configure("", "");
        assert_eq!(staged.signal_names, vec!["speed", "RPM", "gear"]);
        assert_eq!(staged.port, caumon_config::DEFAULT_INGEST_PORT);
        assert_eq!(staged.output_path, PathBuf::from("result_realtime.png"));
    }

    #[test]
    fn test_configure_keeps_previous_on_empty() {
        let manager = manager();
        let staged = manager.configure("time,speed,RPM", "alw(speed[t] < 100)");
        assert_eq!(staged.signal_names, vec!["speed", "RPM"]);
        assert_eq!(staged.formula, "alw(speed[t] < 100)");

        let staged = manager.configure("  ", "ev(RPM[t] > 0)");
        assert_eq!(staged.signal_names, vec!["speed", "RPM"]);
        assert_eq!(staged.formula, "ev(RPM[t] > 0)");

        let staged = manager.configure("gear", "");
        assert_eq!(staged.signal_names, vec!["gear"]);
        assert_eq!(staged.formula, "ev(RPM[t] > 0)");
    }

    #[test]
    fn test_set_throttle_and_output_path() {
        let manager = manager();
        manager.set_throttle(ThrottleSettings::from_millis(0, 250));
        manager.set_output_path("final.png");

        assert_eq!(
            manager.settings().throttle,
            ThrottleSettings::from_millis(0, 250)
        );
        assert_eq!(manager.configure("", "").output_path, PathBuf::from("final.png"));
    }

    #[test]
    fn test_idle_manager_reports_nothing() {
        let manager = manager();
        assert!(!manager.is_running());
        assert_eq!(manager.local_addr(), None);
        assert_eq!(manager.trace_len(), None);
        assert_eq!(manager.session_config(), None);
        assert_eq!(manager.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn test_outcome_messages() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(
            StartOutcome::Started { addr }.to_string(),
            "Server started on port 9999"
        );
        assert_eq!(
            StartOutcome::AlreadyRunning { addr }.to_string(),
            "Server is already running on port 9999"
        );
        assert_eq!(
            StopOutcome::Stopped { trace_len: 3 }.to_string(),
            "Server stopped (3 data points received)"
        );
        assert_eq!(StopOutcome::NotRunning.to_string(), "Server is not running");
    }

    #[test]
    fn test_join_with_timeout_returns_for_slow_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(500)));
        let started = Instant::now();
        join_with_timeout(handle, Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
