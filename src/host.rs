//! Interpreter process that runs rewritten scripts.
//!
//! The script runs in a Python child process. A bootstrap program
//! defines the two names the rewritten script expects (`__queue` and
//! `__queue_reporter_factory`), executes the script in a namespace that
//! holds only those names and the builtins, and reports back over its
//! stdout: one JSON object per line. The script's own prints go to
//! stderr so they cannot corrupt that stream.

use crate::adapter::Invocation;
use crate::channel::StopSignal;
use crate::errors::ExecutionError;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Lines of interpreter stderr kept for error reports.
const STDERR_TAIL: usize = 20;

const BOOTSTRAP: &str = r#"
import io
import json
import os
import sys

_protocol = sys.stdout
sys.stdout = sys.stderr


def _emit(frame):
    _protocol.write(json.dumps(frame) + "\n")
    _protocol.flush()


class _Queue(object):
    def put(self, item):
        if item is None:
            _emit({"kind": "end"})
        else:
            frame = dict(item)
            frame["kind"] = "report"
            _emit(frame)


def _queue_reporter_factory(queue):
    try:
        from openmm.app import StateDataReporter
    except ImportError:
        from simtk.openmm.app import StateDataReporter

    class QueueStateDataReporter(StateDataReporter):
        def __init__(self, file, *args, **kwargs):
            with open(os.devnull, "w") as devnull:
                super(QueueStateDataReporter, self).__init__(devnull, *args, **kwargs)

        def report(self, simulation, state):
            self._out = io.StringIO()
            super(QueueStateDataReporter, self).report(simulation, state)
            queue.put({"separator": self._separator, "text": self._out.getvalue()})

    return QueueStateDataReporter


_source = sys.stdin.read()
_namespace = {
    "__builtins__": __builtins__,
    "__queue": _Queue(),
    "__queue_reporter_factory": _queue_reporter_factory,
}
exec(compile(_source, "<openmm-script>", "exec"), _namespace)
"#;

/// What the host observed while the script ran.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// One reporter callback's captured output.
    Report(Invocation),
    /// The script reached its end-of-stream statement.
    EndOfStream,
}

/// Reply from the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Terminate the script; the handler already knows why.
    Abort,
}

/// Something that can run a rewritten script and report its events.
pub trait ScriptHost: Send {
    /// Run `script` to completion, passing every event to `on_event`.
    ///
    /// Returns `Ok(())` when the script exits cleanly or `on_event` asked
    /// to abort, `Err(ExecutionError::Stopped)` when `stop` fired first.
    fn execute(
        &mut self,
        script: &str,
        stop: &StopSignal,
        on_event: &mut dyn FnMut(HostEvent) -> Flow,
    ) -> Result<(), ExecutionError>;
}

/// Wire format of the bootstrap's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Frame {
    Report {
        #[serde(default)]
        separator: String,
        text: String,
    },
    End,
}

pub fn parse_frame(line: &str) -> Result<HostEvent, ExecutionError> {
    let frame: Frame = serde_json::from_str(line)
        .map_err(|e| ExecutionError::Protocol(format!("{e}: {line}")))?;
    Ok(match frame {
        Frame::Report { separator, text } => HostEvent::Report(Invocation::new(text, separator)),
        Frame::End => HostEvent::EndOfStream,
    })
}

/// Runs scripts with a Python interpreter.
#[derive(Debug, Clone)]
pub struct PythonHost {
    interpreter: String,
    working_dir: Option<PathBuf>,
}

impl PythonHost {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            working_dir: None,
        }
    }

    /// Run the interpreter in `dir`. Relative paths in the script, and
    /// modules beside them, resolve from there.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-u") // unbuffered
            .arg("-c")
            .arg(BOOTSTRAP)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn drive(
        &self,
        script: &str,
        stop: &StopSignal,
        on_event: &mut dyn FnMut(HostEvent) -> Flow,
    ) -> Result<(), ExecutionError> {
        let mut child = self.command().spawn().map_err(|source| ExecutionError::Spawn {
            interpreter: self.interpreter.clone(),
            source,
        })?;
        log::debug!("started {} (pid {:?})", self.interpreter, child.id());

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::Protocol("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Protocol("no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Protocol("no stderr".into()))?;

        // Drain stderr concurrently so a chatty script cannot fill the pipe.
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("script: {}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        stdin.write_all(script.as_bytes()).await?;
        drop(stdin);

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    log::info!("stop requested; killing {}", self.interpreter);
                    child.kill().await?;
                    return Err(ExecutionError::Stopped);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = match parse_frame(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            child.kill().await?;
                            return Err(e);
                        }
                    };
                    if on_event(event) == Flow::Abort {
                        child.kill().await?;
                        return Ok(());
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr_tail: Vec<String> = stderr_task.await.unwrap_or_default().into();
        if !status.success() {
            return Err(ExecutionError::ScriptFailed {
                status: status.to_string(),
                stderr: stderr_tail,
            });
        }
        Ok(())
    }
}

impl Default for PythonHost {
    fn default() -> Self {
        Self::new("python")
    }
}

impl ScriptHost for PythonHost {
    fn execute(
        &mut self,
        script: &str,
        stop: &StopSignal,
        on_event: &mut dyn FnMut(HostEvent) -> Flow,
    ) -> Result<(), ExecutionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.drive(script, stop, on_event))
    }
}
