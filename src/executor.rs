//! Worker thread that runs the rewritten script and feeds the channel.

use crate::adapter::ReporterAdapter;
use crate::channel::{SampleSender, StopSignal};
use crate::errors::{ExecutionError, RunError};
use crate::host::{Flow, HostEvent, ScriptHost};
use std::thread::{self, JoinHandle};

pub const THREAD_NAME: &str = "script-exec";

/// How far the script got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Reporter invocations turned into samples.
    pub reports: u64,
    /// The script ran its end-of-stream statement.
    pub reached_end: bool,
}

/// Producer side of a run. Sends the end-of-stream marker exactly once,
/// on drop at the latest.
struct Producer {
    adapter: ReporterAdapter,
    sender: SampleSender,
    marker_sent: bool,
    reached_end: bool,
    reports: u64,
    error: Option<RunError>,
}

impl Producer {
    fn new(sender: SampleSender) -> Self {
        Self {
            adapter: ReporterAdapter::new(sender.clone()),
            sender,
            marker_sent: false,
            reached_end: false,
            reports: 0,
            error: None,
        }
    }

    fn handle(&mut self, event: HostEvent, stop: &StopSignal) -> Flow {
        if self.marker_sent {
            log::debug!("ignoring {:?} after end of stream", event);
            return Flow::Continue;
        }
        if stop.is_stopped() {
            self.error = Some(ExecutionError::Stopped.into());
            return Flow::Abort;
        }

        match event {
            HostEvent::Report(invocation) => match self.adapter.report(&invocation) {
                Ok(()) => {
                    self.reports += 1;
                    Flow::Continue
                }
                Err(e) => {
                    log::error!("reporter output rejected: {}", e);
                    self.error = Some(e.into());
                    Flow::Abort
                }
            },
            HostEvent::EndOfStream => {
                self.reached_end = true;
                self.send_marker();
                Flow::Continue
            }
        }
    }

    fn send_marker(&mut self) {
        if !self.marker_sent {
            self.marker_sent = true;
            if !self.sender.send_end() {
                log::debug!("plot consumer is gone; end of stream not delivered");
            }
        }
    }

    fn outcome(&self) -> ExecutionOutcome {
        ExecutionOutcome {
            reports: self.reports,
            reached_end: self.reached_end,
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.send_marker();
    }
}

/// Run `script` on the current thread until the host returns.
pub fn run(
    host: &mut dyn ScriptHost,
    script: &str,
    sender: SampleSender,
    stop: &StopSignal,
) -> Result<ExecutionOutcome, RunError> {
    let mut producer = Producer::new(sender);
    let result = host.execute(script, stop, &mut |event| producer.handle(event, stop));
    producer.send_marker();

    let outcome = producer.outcome();
    // An adapter error is why the host was aborted, so it wins.
    if let Some(err) = producer.error.take() {
        return Err(err);
    }
    result?;
    Ok(outcome)
}

/// Start the execution worker.
pub fn spawn(
    mut host: Box<dyn ScriptHost>,
    script: String,
    sender: SampleSender,
    stop: StopSignal,
) -> Result<JoinHandle<Result<ExecutionOutcome, RunError>>, RunError> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            log::debug!("script execution started");
            let result = run(host.as_mut(), &script, sender, &stop);
            match &result {
                Ok(outcome) => log::info!("script finished after {} reports", outcome.reports),
                Err(e) if e.is_stop() => log::info!("script stopped"),
                Err(e) => log::warn!("script execution failed: {}", e),
            }
            result
        })
        .map_err(|source| RunError::Spawn {
            name: THREAD_NAME,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{sample_channel, Message, SampleReceiver};
    use crate::errors::AdapterError;
    use crate::host::scripted::{ScriptedHost, Step};

    const FIRST: &str = "#\"Step\",\"Temperature\"\n10,300.0\n";

    fn drain(rx: &SampleReceiver) -> Vec<Message> {
        rx.try_iter().collect()
    }

    fn assert_single_trailing_marker(messages: &[Message]) {
        let markers = messages
            .iter()
            .filter(|m| **m == Message::EndOfStream)
            .count();
        assert_eq!(markers, 1, "{messages:?}");
        assert_eq!(messages.last(), Some(&Message::EndOfStream));
    }

    #[test]
    fn successful_script_sends_samples_then_marker() {
        let mut host = ScriptedHost::new(vec![
            ScriptedHost::report(FIRST),
            ScriptedHost::report("20,301.0\n"),
            ScriptedHost::report("30,302.0\n"),
            ScriptedHost::end(),
        ]);
        let (tx, rx) = sample_channel();
        let outcome = run(&mut host, "script", tx, &StopSignal::new()).unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome {
                reports: 3,
                reached_end: true
            }
        );
        let messages = drain(&rx);
        assert_eq!(messages.len(), 4);
        assert_single_trailing_marker(&messages);
    }

    #[test]
    fn failing_script_still_ends_stream() {
        let mut host = ScriptedHost::new(vec![
            ScriptedHost::report(FIRST),
            Step::Fail("ZeroDivisionError: division by zero".into()),
        ]);
        let (tx, rx) = sample_channel();
        let err = run(&mut host, "script", tx, &StopSignal::new()).unwrap_err();

        assert!(matches!(
            err,
            RunError::Execution(ExecutionError::ScriptFailed { .. })
        ));
        let messages = drain(&rx);
        assert_eq!(messages.len(), 2);
        assert_single_trailing_marker(&messages);
    }

    #[test]
    fn adapter_error_aborts_the_script() {
        let mut host = ScriptedHost::new(vec![
            ScriptedHost::report(FIRST),
            ScriptedHost::report("20,301.0,7\n"),
            ScriptedHost::report("30,302.0\n"),
            ScriptedHost::end(),
        ]);
        let (tx, rx) = sample_channel();
        let err = run(&mut host, "script", tx, &StopSignal::new()).unwrap_err();

        assert!(matches!(
            err,
            RunError::AdapterParse(AdapterError::FieldCountMismatch {
                headers: 2,
                values: 3
            })
        ));
        let messages = drain(&rx);
        // the first sample, then the marker; nothing from after the abort
        assert_eq!(messages.len(), 2);
        assert_single_trailing_marker(&messages);
    }

    #[test]
    fn short_first_data_line_ends_the_run() {
        let mut host = ScriptedHost::new(vec![
            ScriptedHost::report("#\"Step\",\"Temperature\",\"Potential Energy\"\n10,300.5\n"),
            ScriptedHost::end(),
        ]);
        let (tx, rx) = sample_channel();
        let err = run(&mut host, "script", tx, &StopSignal::new()).unwrap_err();

        assert!(matches!(
            err,
            RunError::AdapterParse(AdapterError::FieldCountMismatch {
                headers: 3,
                values: 2
            })
        ));
        assert_eq!(drain(&rx), vec![Message::EndOfStream]);
    }

    #[test]
    fn events_after_marker_are_ignored() {
        let mut host = ScriptedHost::new(vec![
            ScriptedHost::end(),
            ScriptedHost::report(FIRST),
            ScriptedHost::end(),
        ]);
        let (tx, rx) = sample_channel();
        let outcome = run(&mut host, "script", tx, &StopSignal::new()).unwrap();

        assert_eq!(outcome.reports, 0);
        assert_eq!(drain(&rx), vec![Message::EndOfStream]);
    }

    #[test]
    fn script_without_end_statement_gets_marker() {
        let mut host = ScriptedHost::new(vec![ScriptedHost::report(FIRST)]);
        let (tx, rx) = sample_channel();
        let outcome = run(&mut host, "script", tx, &StopSignal::new()).unwrap();

        assert!(!outcome.reached_end);
        assert_single_trailing_marker(&drain(&rx));
    }

    #[test]
    fn stopped_run_reports_stop() {
        let mut host = ScriptedHost::new(vec![ScriptedHost::report(FIRST), ScriptedHost::end()]);
        let stop = StopSignal::new();
        stop.stop();
        let (tx, rx) = sample_channel();
        let err = run(&mut host, "script", tx, &stop).unwrap_err();

        assert!(err.is_stop());
        assert_eq!(drain(&rx), vec![Message::EndOfStream]);
    }

    #[test]
    fn spawned_worker_passes_script_through() {
        let host = ScriptedHost::new(vec![ScriptedHost::report(FIRST), ScriptedHost::end()]);
        let seen = host.seen_script();
        let (tx, rx) = sample_channel();
        let handle = spawn(Box::new(host), "x = 1\n".into(), tx, StopSignal::new()).unwrap();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome.reports, 1);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("x = 1\n"));
        assert_single_trailing_marker(&drain(&rx));
    }
}
