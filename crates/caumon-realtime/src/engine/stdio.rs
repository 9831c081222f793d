// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Engine adapter backed by a child process speaking JSON lines
//!
//! Each request is one JSON object on the child's stdin:
//! ```text
//! {"id":1,"op":"configure","working_dir":"/opt/engine"}
//! {"id":2,"op":"evaluate","trace":[[0,1],[40,42]],"signals":["speed"],"formula":"..."}
//! {"id":3,"op":"visualize","trace":...,"signals":...,"formula":...,"upper":[..],"lower":[..],"output_path":"result_realtime.png"}
//! {"id":4,"op":"shutdown"}
//! ```
//! and each reply one JSON object on its stdout:
//! ```text
//! {"id":2,"ok":true,"upper":0.5,"lower":[-1.0,0.5]}
//! {"id":3,"ok":false,"error":"render failed"}
//! ```
//! `upper`/`lower` may be scalars or arrays. `id` is echoed when the engine
//! supports it; replies carrying a stale id are discarded.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EngineAdapter, EngineError, EngineResult, EngineValue, Robustness};
use crate::trace::TraceMatrix;

/// Upper bound on the polite shutdown exchange before the child is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the engine process
#[derive(Debug, Clone)]
pub struct StdioEngineOptions {
    pub command: String,
    pub args: Vec<String>,
    pub response_timeout: Duration,
}

impl StdioEngineOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            response_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &caumon_config::EngineConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            response_timeout: config.response_timeout(),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Configure {
        working_dir: &'a Path,
    },
    Evaluate {
        trace: Vec<Vec<f64>>,
        signals: &'a [String],
        formula: &'a str,
    },
    Visualize {
        trace: Vec<Vec<f64>>,
        signals: &'a [String],
        formula: &'a str,
        upper: &'a [f64],
        lower: &'a [f64],
        #[serde(skip_serializing_if = "Option::is_none")]
        output_path: Option<&'a Path>,
    },
    Shutdown,
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upper: Option<EngineValue>,
    #[serde(default)]
    lower: Option<EngineValue>,
}

/// Engine running as a separate process
pub struct StdioEngine {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Receiver<std::io::Result<String>>,
    response_timeout: Duration,
    next_id: u64,
    shut_down: bool,
}

impl StdioEngine {
    /// Launch the engine process
    ///
    /// The child's stderr is inherited so engine diagnostics end up next to
    /// our own logs.
    pub fn spawn(options: &StdioEngineOptions) -> EngineResult<Self> {
        if options.command.trim().is_empty() {
            return Err(EngineError::Startup("no engine command configured".to_string()));
        }

        let mut child = Command::new(&options.command)
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EngineError::Startup(format!("{}: {}", options.command, e)))?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Startup("engine stdout unavailable".to_string()));
            }
        };

        let (tx, rx) = mpsc::channel();
        let reader = thread::Builder::new()
            .name("caumon-engine-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Startup(format!("failed to spawn reader thread: {}", e)));
        }

        info!(
            "[ENGINE] Started engine process '{}' (pid {})",
            options.command,
            child.id()
        );

        Ok(Self {
            command: options.command.clone(),
            child,
            stdin,
            responses: rx,
            response_timeout: options.response_timeout,
            next_id: 1,
            shut_down: false,
        })
    }

    fn call(&mut self, request: Request<'_>, timeout: Duration) -> EngineResult<Response> {
        if self.shut_down {
            return Err(EngineError::ShutDown);
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut payload = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| EngineError::Protocol(format!("request encoding failed: {}", e)))?;
        payload.push('\n');

        let stdin = self.stdin.as_mut().ok_or(EngineError::Exited)?;
        stdin.write_all(payload.as_bytes())?;
        stdin.flush()?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.responses.recv_timeout(remaining) {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Err(RecvTimeoutError::Timeout) => return Err(EngineError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Exited),
            };

            if line.trim().is_empty() {
                continue;
            }

            let response: Response = serde_json::from_str(&line)
                .map_err(|e| EngineError::Protocol(format!("{}: {}", e, line)))?;

            match response.id {
                Some(reply_id) if reply_id != id => {
                    debug!("[ENGINE] Discarding stale reply {} (waiting for {})", reply_id, id);
                    continue;
                }
                _ => {}
            }

            if !response.ok {
                return Err(EngineError::Remote(
                    response.error.unwrap_or_else(|| "unspecified engine error".to_string()),
                ));
            }
            return Ok(response);
        }
    }

    fn wait_for_exit(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                _ => return false,
            }
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("[ENGINE] Kill of '{}' failed: {}", self.command, e);
        }
        let _ = self.child.wait();
    }
}

impl EngineAdapter for StdioEngine {
    fn name(&self) -> &str {
        &self.command
    }

    fn configure_working_directory(&mut self, path: &Path) -> EngineResult<()> {
        self.call(Request::Configure { working_dir: path }, self.response_timeout)?;
        Ok(())
    }

    fn evaluate(
        &mut self,
        trace: &TraceMatrix,
        signal_names: &[String],
        formula: &str,
    ) -> EngineResult<Robustness> {
        let request = Request::Evaluate {
            trace: trace.to_rows(),
            signals: signal_names,
            formula,
        };
        let response = self.call(request, self.response_timeout)?;

        match (response.upper, response.lower) {
            (Some(upper), Some(lower)) => Ok(Robustness::from_values(upper, lower)),
            _ => Err(EngineError::Protocol(
                "evaluate reply is missing upper/lower".to_string(),
            )),
        }
    }

    fn visualize(
        &mut self,
        trace: &TraceMatrix,
        signal_names: &[String],
        formula: &str,
        results: &Robustness,
        output_path: Option<&Path>,
    ) -> EngineResult<()> {
        let request = Request::Visualize {
            trace: trace.to_rows(),
            signals: signal_names,
            formula,
            upper: &results.upper,
            lower: &results.lower,
            output_path,
        };
        self.call(request, self.response_timeout)?;
        Ok(())
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        if self.shut_down {
            return Ok(());
        }

        let grace = self.response_timeout.min(SHUTDOWN_GRACE);
        let polite = self.call(Request::Shutdown, grace);
        self.shut_down = true;
        // EOF on stdin tells line-driven engines to exit
        self.stdin = None;

        if let Err(e) = &polite {
            warn!("[ENGINE] Shutdown request to '{}' failed: {}", self.command, e);
        }

        if self.wait_for_exit(grace) {
            info!("[ENGINE] Engine process '{}' exited", self.command);
        } else {
            warn!(
                "[ENGINE] Engine process '{}' did not exit within {:?}, killing it",
                self.command, grace
            );
            self.kill();
        }

        polite.map(|_| ())
    }
}

impl Drop for StdioEngine {
    fn drop(&mut self) {
        if !self.shut_down {
            self.stdin = None;
            self.kill();
        }
    }
}
