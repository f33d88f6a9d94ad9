//! Estimator backed by an external process
//!
//! The process reads one JSON object per line on stdin: observations
//! `{"node", "task", "rchar", "target"}` and estimate requests
//! `{"estimate": <expected nodes>, "id": <n>}`. It answers each request
//! with `<id>;node=value;...` or `<id>;NOT READY`. Lines starting with
//! `DEBUG` are skipped. Any desync or I/O failure faults the session for
//! good; the estimator then stays not ready.

use super::{NodeEstimations, NodeSpeedEstimator};
use crate::error::EstimatorError;
use crate::models::Observation;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

const STDERR_TAIL_LINES: usize = 50;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct ObservationLine<'a> {
    node: &'a str,
    task: &'a str,
    rchar: u64,
    target: f64,
}

#[derive(Serialize)]
struct EstimateRequest {
    estimate: usize,
    id: u64,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_closed: Receiver<()>,
    next_id: u64,
}

impl Session {
    fn send<T: Serialize>(&mut self, message: &T) -> Result<(), EstimatorError> {
        let json = serde_json::to_string(message)?;
        self.stdin.write_all(json.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn request_estimations(
        &mut self,
        expected_nodes: usize,
    ) -> Result<Option<NodeEstimations>, EstimatorError> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(id, "Requesting estimations");
        self.send(&EstimateRequest {
            estimate: expected_nodes,
            id,
        })?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(EstimatorError::Subprocess {
                    message: "estimator process closed its output".to_string(),
                    stderr: String::new(),
                });
            }
            let trimmed = line.trim();
            if trimmed.starts_with("DEBUG") {
                debug!(line = %trimmed, "Estimator process output");
                continue;
            }
            return parse_response(trimmed, id);
        }
    }

    /// Stop the process and give its stderr reader a moment to drain
    fn terminate(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = self.stderr_closed.recv_timeout(STDERR_DRAIN_TIMEOUT);
    }
}

/// Parse one estimate response line
///
/// Returns `Ok(None)` for `NOT READY` and an error for any id mismatch or
/// malformed entry.
pub fn parse_response(
    line: &str,
    expected_id: u64,
) -> Result<Option<NodeEstimations>, EstimatorError> {
    let mut parts = line.split(';');

    let id_part = parts.next().unwrap_or_default().trim();
    let id: u64 = id_part
        .parse()
        .map_err(|_| EstimatorError::Protocol(format!("invalid response id `{id_part}`")))?;
    if id != expected_id {
        return Err(EstimatorError::Protocol(format!(
            "response id {id} does not match request {expected_id}"
        )));
    }

    let entries: Vec<&str> = parts.map(str::trim).filter(|p| !p.is_empty()).collect();
    if entries.is_empty() || entries == ["NOT READY"] {
        return Ok(None);
    }

    let mut estimations = NodeEstimations::new();
    for entry in entries {
        let (node, value) = entry
            .split_once('=')
            .ok_or_else(|| EstimatorError::Protocol(format!("malformed entry `{entry}`")))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| EstimatorError::Protocol(format!("invalid value in `{entry}`")))?;
        estimations.insert(node.trim().to_string(), value);
    }
    Ok(Some(estimations))
}

/// Node speed estimator delegating to a subprocess over stdin/stdout
pub struct ProcessEstimator {
    command: String,
    expected_nodes: usize,
    session: Mutex<Option<Session>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl ProcessEstimator {
    /// Start the estimator process
    pub fn spawn(
        command: &str,
        args: &[String],
        expected_nodes: usize,
    ) -> Result<Self, EstimatorError> {
        info!(command = %command, "Spawning estimator process");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EstimatorError::Subprocess {
                message: format!("failed to spawn `{command}`: {e}"),
                stderr: String::new(),
            })?;

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill();
                return Err(EstimatorError::Subprocess {
                    message: "failed to capture estimator process streams".to_string(),
                    stderr: String::new(),
                });
            }
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let tail = Arc::clone(&stderr_tail);
        let (closed_tx, stderr_closed) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            let _ = closed_tx.send(());
        });

        Ok(Self {
            command: command.to_string(),
            expected_nodes,
            session: Mutex::new(Some(Session {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                stderr_closed,
                next_id: 1,
            })),
            stderr_tail,
        })
    }

    /// Most recent lines the process wrote to stderr
    pub fn stderr_tail(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one exchange; any error faults the session
    fn exchange<T>(
        &self,
        f: impl FnOnce(&mut Session) -> Result<T, EstimatorError>,
    ) -> Result<T, EstimatorError> {
        let mut guard = self.session();
        let session = guard.as_mut().ok_or(EstimatorError::Faulted)?;
        f(session).map_err(|e| self.fault(&mut guard, e))
    }

    /// Tear the session down and attach the captured stderr to the cause
    fn fault(&self, session: &mut Option<Session>, cause: EstimatorError) -> EstimatorError {
        if let Some(session) = session.take() {
            session.terminate();
        }
        let stderr = self.stderr_tail();
        let fault = match cause {
            EstimatorError::Subprocess { message, .. } => {
                EstimatorError::Subprocess { message, stderr }
            }
            EstimatorError::Io(e) => EstimatorError::Subprocess {
                message: e.to_string(),
                stderr,
            },
            other => other,
        };
        error!(
            command = %self.command,
            error = %fault,
            stderr = %self.stderr_tail(),
            "Estimator process faulted"
        );
        fault
    }

    /// Send one observation to the process
    pub fn try_add_data_point(&self, observation: &Observation) -> Result<(), EstimatorError> {
        let line = ObservationLine {
            node: &observation.node,
            task: &observation.task,
            rchar: observation.input_size.max(0.0).round() as u64,
            target: observation.target,
        };
        self.exchange(|session| session.send(&line))
    }

    /// Ask the process for estimations
    ///
    /// `Ok(None)` means not ready. Once the session has faulted every call
    /// returns [`EstimatorError::Faulted`].
    pub fn try_estimations(&self) -> Result<Option<NodeEstimations>, EstimatorError> {
        let expected = self.expected_nodes;
        self.exchange(|session| session.request_estimations(expected))
    }
}

impl NodeSpeedEstimator for ProcessEstimator {
    fn name(&self) -> &'static str {
        "process"
    }

    fn add_data_point(&self, observation: &Observation) {
        let _ = self.try_add_data_point(observation);
    }

    fn estimations(&self) -> Option<NodeEstimations> {
        self.try_estimations()
            .ok()
            .flatten()
            .filter(|estimations| estimations.len() >= self.expected_nodes)
    }

    fn is_faulted(&self) -> bool {
        self.session().is_none()
    }
}

impl Drop for ProcessEstimator {
    fn drop(&mut self) {
        if let Some(session) = self.session().take() {
            session.terminate();
        }
    }
}
