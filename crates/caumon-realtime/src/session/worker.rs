// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Accept/read loop and throttled dispatch for one active session
//!
//! Everything here runs on the session's accept thread, except
//! [`SessionShared::finalize`] and [`SessionShared::shutdown_engine`] which the
//! stop path also calls. Engine access is serialized by the dispatch lock; the
//! trace lock is only taken for appends and snapshots.

use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::SessionConfig;
use crate::decoder::decode_line;
use crate::engine::{EngineAdapter, Robustness};
use crate::throttle::{DispatchThrottler, ThrottleSettings};
use crate::trace::{TraceBuffer, TraceMatrix};

/// Cooperative cancellation shared by the stop path and the accept thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Polling cadence of the accept thread
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTiming {
    pub accept_poll_interval: Duration,
    pub read_timeout: Duration,
}

/// What happened to one raw line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    Accepted { trace_len: usize },
    Skipped,
    Rejected,
}

/// Result of a finalization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeOutcome {
    Completed { trace_len: usize },
    AlreadyFinalized,
    EmptyTrace,
    EngineUnavailable,
    Failed,
}

/// Results of the last successful evaluation and the trace they describe
struct Evaluated {
    trace: TraceMatrix,
    results: Robustness,
}

struct DispatchState {
    throttle: DispatchThrottler,
    engine: Option<Box<dyn EngineAdapter>>,
    latest: Option<Evaluated>,
    /// Trace length covered by the last successful finalization
    finalized_len: Option<usize>,
    engine_missing_logged: bool,
}

#[derive(Debug, Default)]
struct IngestCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// State shared between the accept thread and the lifecycle manager
pub(crate) struct SessionShared {
    pub config: SessionConfig,
    pub trace: TraceBuffer,
    dispatch: Mutex<DispatchState>,
    counters: IngestCounters,
}

impl SessionShared {
    pub fn new(
        config: SessionConfig,
        engine: Box<dyn EngineAdapter>,
        throttle: ThrottleSettings,
    ) -> Self {
        Self {
            config,
            trace: TraceBuffer::new(),
            dispatch: Mutex::new(DispatchState {
                throttle: DispatchThrottler::new(throttle),
                engine: Some(engine),
                latest: None,
                finalized_len: None,
                engine_missing_logged: false,
            }),
            counters: IngestCounters::default(),
        }
    }

    pub fn accepted_lines(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected_lines(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    /// Decode, append and (if due) dispatch one line
    pub fn ingest_line(&self, raw: &str) -> LineOutcome {
        let point = match decode_line(raw) {
            Ok(point) => point,
            Err(e) if e.is_silent() => {
                trace!("[INGEST] Skipping empty line");
                return LineOutcome::Skipped;
            }
            Err(e) => {
                warn!("[INGEST] Dropping malformed line {:?}: {}", raw.trim_end(), e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return LineOutcome::Rejected;
            }
        };

        let trace_len = match self.trace.append(point) {
            Ok(len) => len,
            Err(e) => {
                warn!("[INGEST] Dropping line {:?}: {}", raw.trim_end(), e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return LineOutcome::Rejected;
            }
        };
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);

        self.dispatch_on_arrival(Instant::now());
        LineOutcome::Accepted { trace_len }
    }

    fn dispatch_on_arrival(&self, now: Instant) {
        let mut guard = self.dispatch.lock();
        let state = &mut *guard;

        let decision = state.throttle.on_arrival(now);
        if decision.is_idle() {
            debug!("[DISPATCH] Throttled; nothing due");
            return;
        }

        let Some(engine) = state.engine.as_mut() else {
            if !state.engine_missing_logged {
                warn!("[DISPATCH] Engine already shut down; runtime dispatch disabled");
                state.engine_missing_logged = true;
            }
            return;
        };

        if state.throttle.eval_required(decision) {
            let matrix = match TraceMatrix::from_points(&self.trace.snapshot()) {
                Ok(matrix) => matrix,
                Err(e) => {
                    error!("[DISPATCH] Trace snapshot unusable: {}", e);
                    return;
                }
            };

            let started = Instant::now();
            match engine.evaluate(&matrix, &self.config.signal_names, &self.config.formula) {
                Ok(results) => {
                    if let Some((upper, lower)) = results.latest() {
                        info!(
                            "[DISPATCH] Evaluated {} steps in {:?} (upper {:.4}, lower {:.4})",
                            matrix.steps(),
                            started.elapsed(),
                            upper,
                            lower
                        );
                    } else {
                        info!(
                            "[DISPATCH] Evaluated {} steps in {:?}",
                            matrix.steps(),
                            started.elapsed()
                        );
                    }
                    state.latest = Some(Evaluated {
                        trace: matrix,
                        results,
                    });
                    state.throttle.record_eval(now, true);
                }
                Err(e) => {
                    error!("[DISPATCH] Evaluation failed: {}", e);
                    state.throttle.record_eval(now, false);
                }
            }
        }

        if decision.need_visualize {
            // Draw the trace the results were computed from, never a newer one
            match state.latest.as_ref() {
                Some(latest) => {
                    let started = Instant::now();
                    match engine.visualize(
                        &latest.trace,
                        &self.config.signal_names,
                        &self.config.formula,
                        &latest.results,
                        None,
                    ) {
                        Ok(()) => info!(
                            "[DISPATCH] Visualized {} steps in {:?}",
                            latest.trace.steps(),
                            started.elapsed()
                        ),
                        Err(e) => error!("[DISPATCH] Visualization failed: {}", e),
                    }
                    state.throttle.record_visualize(now);
                }
                None => warn!("[DISPATCH] Skipping visualization: no evaluation results yet"),
            }
        }
    }

    /// Evaluate and save a visualization of the whole trace
    ///
    /// Runs regardless of throttle state. Repeated calls without new data are
    /// no-ops, so the disconnect path and the stop path may both call it.
    pub fn finalize(&self, output_path: &Path) -> FinalizeOutcome {
        let mut guard = self.dispatch.lock();
        let state = &mut *guard;

        let Some(engine) = state.engine.as_mut() else {
            debug!("[SESSION] Engine unavailable; skipping final visualization");
            return FinalizeOutcome::EngineUnavailable;
        };

        let points = self.trace.snapshot();
        if points.is_empty() {
            info!("[SESSION] No data received; skipping final visualization");
            return FinalizeOutcome::EmptyTrace;
        }
        if state.finalized_len == Some(points.len()) {
            debug!("[SESSION] Trace of {} points already finalized", points.len());
            return FinalizeOutcome::AlreadyFinalized;
        }

        let matrix = match TraceMatrix::from_points(&points) {
            Ok(matrix) => matrix,
            Err(e) => {
                error!("[SESSION] Trace snapshot unusable: {}", e);
                return FinalizeOutcome::Failed;
            }
        };

        info!(
            "[SESSION] Finalizing {} data points to {}",
            points.len(),
            output_path.display()
        );
        let started = Instant::now();

        let results =
            match engine.evaluate(&matrix, &self.config.signal_names, &self.config.formula) {
                Ok(results) => results,
                Err(e) => {
                    error!("[SESSION] Final evaluation failed: {}", e);
                    return FinalizeOutcome::Failed;
                }
            };

        if let Err(e) = engine.visualize(
            &matrix,
            &self.config.signal_names,
            &self.config.formula,
            &results,
            Some(output_path),
        ) {
            error!("[SESSION] Final visualization failed: {}", e);
            state.latest = Some(Evaluated {
                trace: matrix,
                results,
            });
            return FinalizeOutcome::Failed;
        }

        state.latest = Some(Evaluated {
            trace: matrix,
            results,
        });
        state.finalized_len = Some(points.len());
        info!(
            "[SESSION] Final visualization saved in {:?}",
            started.elapsed()
        );
        FinalizeOutcome::Completed {
            trace_len: points.len(),
        }
    }

    /// Shut the engine down once; later dispatches become no-ops
    ///
    /// Waits for any in-flight dispatch because it takes the dispatch lock.
    pub fn shutdown_engine(&self) {
        let engine = self.dispatch.lock().engine.take();
        if let Some(mut engine) = engine {
            match engine.shutdown() {
                Ok(()) => info!("[ENGINE] Engine '{}' shut down", engine.name()),
                Err(e) => warn!("[ENGINE] Engine '{}' shutdown failed: {}", engine.name(), e),
            }
        }
    }
}

/// Accept connections until cancelled, serving them one at a time
///
/// The listener must already be non-blocking.
pub(crate) fn run_accept_loop(
    listener: TcpListener,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    timing: LoopTiming,
) {
    info!(
        "[SESSION] Waiting for producer connections on port {}",
        shared.config.port
    );

    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("[SESSION] Client connected: {}", peer);
                serve_connection(stream, peer, &shared, &cancel, timing.read_timeout);
                shared.finalize(&shared.config.output_path);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(timing.accept_poll_interval);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                if !cancel.is_cancelled() {
                    error!("[SESSION] Accept failed: {}", e);
                }
                thread::sleep(timing.accept_poll_interval);
            }
        }
    }

    debug!("[SESSION] Accept loop exiting");
    shared.finalize(&shared.config.output_path);
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: &SessionShared,
    cancel: &CancellationToken,
    read_timeout: Duration,
) {
    // Accepted sockets may inherit the listener's non-blocking mode
    let setup = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(read_timeout)));
    if let Err(e) = setup {
        error!("[SESSION] Failed to configure connection from {}: {}", peer, e);
        return;
    }

    let mut reader = BufReader::new(stream);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            info!("[SESSION] Session stopping; closing connection from {}", peer);
            break;
        }

        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => {
                if !pending.is_empty() {
                    shared.ingest_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
                break;
            }
            Ok(_) => {
                // A partial line here means EOF; the next read returns 0
                if pending.ends_with(b"\n") {
                    shared.ingest_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!("[SESSION] Read error from {}: {}", peer, e);
                break;
            }
        }
    }

    info!(
        "[SESSION] Client disconnected: {} ({} points in trace, {} lines accepted, {} rejected)",
        peer,
        shared.trace.size(),
        shared.accepted_lines(),
        shared.rejected_lines()
    );
}
