//! Shared helpers for session integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use caumon_config::MonitorConfig;
use caumon_realtime::{
    EngineAdapter, EngineError, EngineResult, Robustness, SessionManager, SessionSettings,
    ThrottleSettings, TraceMatrix,
};

/// One call observed by [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Configure(PathBuf),
    Evaluate {
        steps: usize,
        signals: usize,
        names: Vec<String>,
        formula: String,
    },
    Visualize {
        steps: usize,
        signals: usize,
        /// Length of the robustness series drawn with the trace
        results: usize,
        output_path: Option<PathBuf>,
    },
    Shutdown,
}

/// Shared log of every engine created by a [`RecordingFactory`]
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    created: Arc<AtomicUsize>,
    fail_evaluate: Arc<AtomicBool>,
    evaluate_delay_ms: Arc<AtomicU64>,
    evaluations_started: Arc<AtomicUsize>,
}

impl EngineLog {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_evaluations(&self) {
        self.fail_evaluate.store(true, Ordering::SeqCst);
    }

    /// Make every evaluation take at least `delay`
    pub fn slow_evaluations(&self, delay: Duration) {
        self.evaluate_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Evaluations entered, including ones still running
    pub fn evaluations_started(&self) -> usize {
        self.evaluations_started.load(Ordering::SeqCst)
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    /// Visualizations that asked for the plot to be saved
    pub fn saved_visualizations(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    EngineCall::Visualize {
                        output_path: Some(_),
                        ..
                    }
                )
            })
            .collect()
    }

    pub fn evaluations(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Evaluate { .. }))
    }

    pub fn shutdowns(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Shutdown))
    }
}

pub struct RecordingEngine {
    log: EngineLog,
}

impl EngineAdapter for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    fn configure_working_directory(&mut self, path: &Path) -> EngineResult<()> {
        self.record(EngineCall::Configure(path.to_path_buf()));
        Ok(())
    }

    fn evaluate(
        &mut self,
        trace: &TraceMatrix,
        signal_names: &[String],
        formula: &str,
    ) -> EngineResult<Robustness> {
        self.log.evaluations_started.fetch_add(1, Ordering::SeqCst);
        let delay = self.log.evaluate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        // recorded on completion so the log order is the order calls finished
        self.record(EngineCall::Evaluate {
            steps: trace.steps(),
            signals: trace.signal_count(),
            names: signal_names.to_vec(),
            formula: formula.to_string(),
        });
        if self.log.fail_evaluate.load(Ordering::SeqCst) {
            return Err(EngineError::Remote("evaluation disabled".to_string()));
        }
        let steps = trace.steps();
        Ok(Robustness::new(vec![1.0; steps], vec![-1.0; steps]))
    }

    fn visualize(
        &mut self,
        trace: &TraceMatrix,
        _signal_names: &[String],
        _formula: &str,
        results: &Robustness,
        output_path: Option<&Path>,
    ) -> EngineResult<()> {
        self.record(EngineCall::Visualize {
            steps: trace.steps(),
            signals: trace.signal_count(),
            results: results.upper.len(),
            output_path: output_path.map(Path::to_path_buf),
        });
        Ok(())
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        self.record(EngineCall::Shutdown);
        Ok(())
    }
}

impl RecordingEngine {
    fn record(&self, call: EngineCall) {
        self.log.calls.lock().unwrap().push(call);
    }
}

/// Settings for loopback tests: fast polling, warm-up off
pub fn test_settings(throttle: ThrottleSettings) -> SessionSettings {
    SessionSettings {
        host: "127.0.0.1".to_string(),
        default_port: 0,
        throttle,
        accept_poll_interval: Duration::from_millis(5),
        read_timeout: Duration::from_millis(20),
        join_timeout: Duration::from_secs(2),
        warmup: false,
        ..SessionSettings::default()
    }
}

pub fn recording_manager(settings: SessionSettings) -> (SessionManager, EngineLog) {
    let log = EngineLog::default();
    let factory_log = log.clone();
    let factory = move || -> EngineResult<Box<dyn EngineAdapter>> {
        factory_log.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingEngine {
            log: factory_log.clone(),
        }))
    };
    let manager = SessionManager::with_settings(settings, &MonitorConfig::default(), Arc::new(factory));
    (manager, log)
}

pub fn reserve_free_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to reserve free TCP port");
    listener
        .local_addr()
        .expect("Failed to read local socket address")
        .port()
}

pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("Timed out waiting for condition");
}

/// Connect to the session on loopback
pub fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(("127.0.0.1", addr.port())).expect("Failed to connect to session")
}

/// Send lines and close the connection
pub fn send_lines(addr: SocketAddr, lines: &[&str]) {
    let mut stream = connect(addr);
    for line in lines {
        stream
            .write_all(format!("{}\n", line).as_bytes())
            .expect("Failed to send line");
    }
    stream.flush().expect("Failed to flush stream");
}
