//! Starts a live run: rewrite, then one execution and one plot worker.

use crate::channel::{sample_channel, StopSignal};
use crate::consumer::{self, new_board, write_board, ConsumerOutcome, PlotConsumer, SharedPlots};
use crate::errors::RunError;
use crate::executor::{self, ExecutionOutcome};
use crate::host::ScriptHost;
use crate::logging::{RunSummary, SampleLogger};
use crate::rewrite::{rewrite, RewriteRule};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub poll_interval: Duration,
    /// JSON Lines file receiving every plotted sample.
    pub sample_log: Option<PathBuf>,
    pub rules: Vec<RewriteRule>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: consumer::DEFAULT_POLL_INTERVAL,
            sample_log: None,
            rules: vec![RewriteRule::reporter_factory()],
        }
    }
}

pub struct ScriptRunner;

impl ScriptRunner {
    /// Rewrite `script` and start running it on `host`.
    ///
    /// A script that cannot be tokenized fails here, before any thread
    /// exists. Every call gets its own channel, stop signal and plots.
    pub fn start(
        script: &str,
        host: Box<dyn ScriptHost>,
        options: RunOptions,
    ) -> Result<RunHandle, RunError> {
        let rewritten = rewrite(script, &options.rules)?;

        let logger = options
            .sample_log
            .as_ref()
            .map(|path| {
                SampleLogger::new(path).map_err(|source| RunError::SampleLog {
                    path: path.clone(),
                    source,
                })
            })
            .transpose()?;

        let (sender, receiver) = sample_channel();
        let stop = StopSignal::new();
        let plots = new_board();

        let mut plot_consumer = PlotConsumer::new(receiver, plots.clone(), stop.clone())
            .with_poll_interval(options.poll_interval);
        if let Some(logger) = logger {
            plot_consumer = plot_consumer.with_logger(logger);
        }
        let consumer = consumer::spawn(plot_consumer)?;

        // If this fails the sender is dropped with the closure and the
        // consumer sees a closed channel.
        let executor = match executor::spawn(host, rewritten, sender, stop.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                stop.stop();
                return Err(e);
            }
        };
        log::info!("run started");

        Ok(RunHandle {
            plots,
            stop,
            executor: Some(executor),
            consumer: Some(consumer),
        })
    }
}

/// Everything a finished run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub execution: Option<ExecutionOutcome>,
    pub samples: u64,
    pub summary: Option<RunSummary>,
    /// Samples written to the sample log.
    pub logged: Option<u64>,
    /// Execution errors first, then plotting errors.
    pub errors: Vec<RunError>,
}

impl RunReport {
    pub fn was_stopped(&self) -> bool {
        self.errors.iter().any(RunError::is_stop)
    }

    /// The first error that was not a requested stop.
    pub fn first_failure(&self) -> Option<&RunError> {
        self.errors.iter().find(|e| !e.is_stop())
    }
}

/// A run in progress. Dropping the handle stops the run.
pub struct RunHandle {
    plots: SharedPlots,
    stop: StopSignal,
    executor: Option<JoinHandle<Result<ExecutionOutcome, RunError>>>,
    consumer: Option<JoinHandle<ConsumerOutcome>>,
}

impl RunHandle {
    pub fn plots(&self) -> SharedPlots {
        self.plots.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A clone of the run's stop signal, for stopping from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        worker_finished(&self.executor) && worker_finished(&self.consumer)
    }

    /// Block until both workers have exited.
    pub fn wait(mut self) -> RunReport {
        let mut report = RunReport::default();

        if let Some(handle) = self.executor.take() {
            match handle.join() {
                Ok(Ok(outcome)) => report.execution = Some(outcome),
                Ok(Err(e)) => report.errors.push(e),
                Err(_) => report.errors.push(RunError::WorkerPanicked(executor::THREAD_NAME)),
            }
        }
        if let Some(handle) = self.consumer.take() {
            match handle.join() {
                Ok(outcome) => {
                    report.samples = outcome.samples;
                    report.summary = outcome.summary;
                    report.logged = outcome.logged;
                    report.errors.extend(outcome.errors);
                }
                Err(_) => report.errors.push(RunError::WorkerPanicked(consumer::THREAD_NAME)),
            }
        }

        // a schema failure stops the script itself; that stop is not news
        if report
            .errors
            .iter()
            .any(|e| matches!(e, RunError::SchemaResolution(_)))
        {
            report.errors.retain(|e| !e.is_stop());
        }
        if let Some(err) = report.first_failure() {
            write_board(&self.plots)
                .error
                .get_or_insert_with(|| err.to_string());
        }
        report
    }
}

fn worker_finished<T>(handle: &Option<JoinHandle<T>>) -> bool {
    handle.as_ref().map_or(true, JoinHandle::is_finished)
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.executor.is_some() || self.consumer.is_some() {
            self.stop.stop();
        }
    }
}
