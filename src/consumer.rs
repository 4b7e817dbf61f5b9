//! Worker thread that drains the sample channel into the plot set.

use crate::channel::{Message, Poll, Sample, SampleReceiver, StopSignal};
use crate::errors::{PlotError, RunError};
use crate::logging::{RunSummary, SampleLogger, SummaryAccumulator};
use crate::plots::PlotSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const THREAD_NAME: &str = "plot-consumer";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    /// No sample seen yet.
    #[default]
    Waiting,
    /// Plots exist and are being filled.
    Active,
    Done,
}

/// What the display reads while a run is in progress.
#[derive(Debug, Default)]
pub struct PlotBoard {
    pub state: ConsumerState,
    pub plots: Option<PlotSet>,
    pub samples: u64,
    /// Why the run failed, if it did. Set as soon as the samples turn out
    /// to be unplottable, otherwise when the run is collected.
    pub error: Option<String>,
}

pub type SharedPlots = Arc<RwLock<PlotBoard>>;

pub fn new_board() -> SharedPlots {
    Arc::new(RwLock::new(PlotBoard::default()))
}

/// Read access that survives a panicked writer.
pub fn read_board(board: &SharedPlots) -> RwLockReadGuard<'_, PlotBoard> {
    board.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_board(board: &SharedPlots) -> RwLockWriteGuard<'_, PlotBoard> {
    board.write().unwrap_or_else(PoisonError::into_inner)
}

/// Result of a finished consumer.
#[derive(Debug, Default)]
pub struct ConsumerOutcome {
    pub samples: u64,
    pub summary: Option<RunSummary>,
    /// Samples written to the sample log, when one was open at the end.
    pub logged: Option<u64>,
    pub errors: Vec<RunError>,
}

pub struct PlotConsumer {
    receiver: SampleReceiver,
    board: SharedPlots,
    stop: StopSignal,
    poll_interval: Duration,
    logger: Option<SampleLogger>,
    accumulator: SummaryAccumulator,
    state: ConsumerState,
    schema_failed: bool,
    samples: u64,
    errors: Vec<RunError>,
}

impl PlotConsumer {
    pub fn new(receiver: SampleReceiver, board: SharedPlots, stop: StopSignal) -> Self {
        Self {
            receiver,
            board,
            stop,
            poll_interval: DEFAULT_POLL_INTERVAL,
            logger: None,
            accumulator: SummaryAccumulator::new(),
            state: ConsumerState::Waiting,
            schema_failed: false,
            samples: 0,
            errors: Vec::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_logger(mut self, logger: SampleLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Wait for one channel item (or the poll interval) and act on it.
    pub fn step(&mut self) -> ConsumerState {
        if self.state == ConsumerState::Done {
            return self.state;
        }

        match self.receiver.poll(self.poll_interval) {
            Poll::Message(Message::Sample(sample)) => self.accept(sample),
            Poll::Message(Message::EndOfStream) => {
                log::debug!("end of stream after {} samples", self.samples);
                self.finish();
            }
            Poll::Idle => {
                // after a schema failure the producer is stopping; wait for its marker
                if self.stop.is_stopped() && !self.schema_failed {
                    log::debug!("stop requested; consumer exiting");
                    self.finish();
                }
            }
            Poll::Disconnected => {
                log::warn!("sample channel closed without an end-of-stream marker");
                self.finish();
            }
        }
        self.state
    }

    /// Consume until done.
    pub fn run(mut self) -> ConsumerOutcome {
        while self.step() != ConsumerState::Done {}

        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.flush() {
                log::warn!("failed to flush sample log: {}", e);
            }
        }
        ConsumerOutcome {
            samples: self.samples,
            summary: self.accumulator.generate_summary(),
            logged: self.logger.as_ref().map(SampleLogger::samples_written),
            errors: self.errors,
        }
    }

    fn accept(&mut self, sample: Sample) {
        if self.schema_failed {
            return;
        }
        if self.state == ConsumerState::Waiting {
            let mut plots = PlotSet::new();
            if let Err(e) = plots.create_plots(&sample.field_names()) {
                self.fail_schema(e);
                return;
            }
            log::info!(
                "plotting {} series against '{}'",
                plots.series().len(),
                plots.axis().unwrap_or_default()
            );
            let mut board = write_board(&self.board);
            board.plots = Some(plots);
            board.state = ConsumerState::Active;
            self.state = ConsumerState::Active;
        }

        {
            let mut board = write_board(&self.board);
            let appended = match board.plots.as_mut() {
                Some(plots) => plots.append_sample(&sample),
                None => Err(PlotError::NotCreated),
            };
            if let Err(e) = appended {
                log::warn!("sample not plotted: {}", e);
                self.errors.push(e.into());
                return;
            }
            self.samples += 1;
            board.samples = self.samples;
        }

        self.accumulator.add_sample(&sample);
        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.log(&sample) {
                log::warn!("sample log disabled after write error: {}", e);
                self.logger = None;
            }
        }
    }

    /// Nothing from this run can be plotted: stop the script.
    fn fail_schema(&mut self, err: PlotError) {
        log::error!("{}", err);
        self.schema_failed = true;
        self.stop.stop();
        let err = RunError::from(err);
        write_board(&self.board).error = Some(err.to_string());
        self.errors.push(err);
    }

    fn finish(&mut self) {
        self.state = ConsumerState::Done;
        write_board(&self.board).state = ConsumerState::Done;
    }
}

/// Start the consumer worker.
pub fn spawn(consumer: PlotConsumer) -> Result<JoinHandle<ConsumerOutcome>, RunError> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || consumer.run())
        .map_err(|source| RunError::Spawn {
            name: THREAD_NAME,
            source,
        })
}
