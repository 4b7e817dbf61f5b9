//! OpenMM Builder - build OpenMM simulation scripts and watch them run.
//!
//! Renders a simulation script from a form, runs it with Python and
//! plots every StateDataReporter field live in the terminal.

mod adapter;
mod channel;
mod config;
mod consumer;
mod display;
mod errors;
mod executor;
mod host;
mod logging;
mod plots;
mod rewrite;
mod runner;
mod template;
mod units;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::{FormConfig, IntegratorKind};
use consumer::{read_board, SharedPlots};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use display::{format_count, format_value};
use host::PythonHost;
use ratatui::{
    layout::{Constraint, Direction, Layout},
    prelude::CrosstermBackend,
    Terminal,
};
use runner::{RunHandle, RunOptions, RunReport, ScriptRunner};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Build OpenMM simulation scripts and plot their reporters live
#[derive(Parser, Debug)]
#[command(name = "openmm-builder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Simulation form (TOML); defaults apply to anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PDB file to simulate (overrides [input] file)
    #[arg(long)]
    pdb: Option<PathBuf>,

    /// Number of time steps (overrides [simulation] n_steps)
    #[arg(long)]
    steps: Option<u64>,

    /// Integrator (overrides [integrator] kind)
    #[arg(long, value_enum)]
    integrator: Option<IntegratorKind>,

    /// Print the rendered script and exit
    #[arg(long)]
    render: bool,

    /// Save the rendered script to a file
    #[arg(short, long)]
    write_script: Option<PathBuf>,

    /// Run an existing script instead of the rendered one
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Python interpreter with OpenMM installed
    #[arg(long, default_value = "python")]
    python: String,

    /// Directory the script runs in; its outputs are written there
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Disable TUI and print samples to stdout
    #[arg(long)]
    no_tui: bool,

    /// Log every sample to a JSON Lines file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Print per-field summary at the end
    #[arg(long)]
    summary: bool,

    /// How often the plot worker checks for samples (milliseconds)
    #[arg(long, default_value = "100")]
    poll_ms: u64,
}

/// Application state
struct App {
    run: Option<RunHandle>,
    plots: SharedPlots,
    script_name: String,
    report: Option<RunReport>,
    samples_printed: u64,
    pending_stop: bool,
    status_message: Option<(String, Instant)>,
    tui_mode: bool,
}

impl App {
    fn new(run: RunHandle, script_name: String) -> Self {
        Self {
            plots: run.plots(),
            run: Some(run),
            script_name,
            report: None,
            samples_printed: 0,
            pending_stop: false,
            status_message: None,
            tui_mode: false,
        }
    }

    fn run_active(&self) -> bool {
        self.run.is_some()
    }

    /// Collect the report once both workers are done.
    fn poll_run(&mut self) {
        if self.run.as_ref().is_some_and(RunHandle::is_finished) {
            self.finish_run();
        }
    }

    /// Wait for the workers and keep their report.
    fn finish_run(&mut self) {
        let Some(run) = self.run.take() else { return };
        let report = run.wait();

        let msg = if let Some(err) = report.first_failure() {
            format!("Run failed: {}", err)
        } else if report.was_stopped() {
            "Run stopped".to_string()
        } else {
            format!("Run finished: {} samples", format_count(report.samples))
        };
        if self.tui_mode {
            self.set_status(&msg);
        } else {
            eprintln!("{}", msg);
        }
        self.report = Some(report);
    }

    fn stop_run(&mut self) {
        if let Some(run) = &self.run {
            run.stop();
            self.set_status("Stopping run...");
        }
    }

    /// Set a temporary status message
    fn set_status(&mut self, msg: &str) {
        self.status_message = Some((msg.to_string(), Instant::now()));
    }

    /// Get current status message if not expired (3 seconds)
    fn get_status(&self) -> Option<&str> {
        self.status_message.as_ref().and_then(|(msg, time)| {
            if time.elapsed().as_secs() < 3 {
                Some(msg.as_str())
            } else {
                None
            }
        })
    }

    /// Print the newest values once per new sample.
    fn print_progress(&mut self) {
        let board = read_board(&self.plots);
        if board.samples <= self.samples_printed {
            return;
        }
        self.samples_printed = board.samples;

        let Some(plots) = board.plots.as_ref() else { return };
        let mut fields = Vec::new();
        let mut axis_value = None;
        for series in plots.series() {
            if let Some((x, y)) = series.last() {
                axis_value = Some(x);
                fields.push(format!("{}={}", series.name, format_value(y)));
            }
        }
        println!(
            "{} {}: {}",
            plots.axis().unwrap_or_default(),
            axis_value.map(format_value).unwrap_or_default(),
            fields.join("  ")
        );
    }

    fn print_summary(&self) {
        let Some(summary) = self.report.as_ref().and_then(|r| r.summary.as_ref()) else {
            println!("No samples were collected.");
            return;
        };
        println!("\n{}", "=".repeat(72));
        println!("                            RUN SUMMARY");
        println!("{}", "=".repeat(72));
        println!(
            "Script: {}  Duration: {:.1}s  Samples: {}",
            self.script_name,
            summary.duration_secs,
            format_count(summary.samples_count)
        );
        println!();
        println!(
            "{:<28} {:>10} {:>10} {:>10} {:>10}",
            "Field", "min", "max", "mean", "last"
        );
        for field in &summary.fields {
            println!(
                "{:<28} {:>10} {:>10} {:>10} {:>10}",
                display::truncate_str(&field.name, 28),
                format_value(field.min),
                format_value(field.max),
                format_value(field.mean),
                format_value(field.last)
            );
        }
        println!("{}", "=".repeat(72));
    }
}

fn run_tui(mut app: App, tick_rate: Duration) -> Result<App> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Messages go to the help bar while the screen is ours
    app.tui_mode = true;

    loop {
        app.poll_run();

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1), // Status
                    Constraint::Min(6),    // Charts
                    Constraint::Length(1), // Help bar
                ])
                .split(f.area());

            let board = read_board(&app.plots);
            display::render_status(f, chunks[0], &board, &app.script_name);
            display::render_plots(f, chunks[1], &board);
            display::render_help_bar(
                f,
                chunks[2],
                app.pending_stop,
                app.get_status(),
                app.run_active(),
            );
        })?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if app.pending_stop {
                        app.pending_stop = false;
                        match key.code {
                            KeyCode::Char('y') | KeyCode::Char('Y') => app.stop_run(),
                            _ => app.set_status("Stop cancelled"),
                        }
                    } else {
                        match key.code {
                            KeyCode::Char('q') => break,
                            KeyCode::Char('s') => {
                                if app.run_active() {
                                    app.pending_stop = true;
                                } else {
                                    app.set_status("No script is running");
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    // Quitting ends the run
    if app.run_active() {
        app.stop_run();
        app.finish_run();
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(app)
}

async fn run_no_tui(mut app: App, tick_rate: Duration) -> Result<App> {
    let stop = match &app.run {
        Some(run) => run.stop_signal(),
        None => return Ok(app),
    };
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while app.run_active() {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, stopping run");
                stop.stop();
            }
            _ = tokio::time::sleep(tick_rate) => {}
        }
        app.print_progress();
        app.poll_run();
    }

    Ok(app)
}

fn load_form(args: &Args) -> Result<FormConfig> {
    let mut config = match &args.config {
        Some(path) => FormConfig::load(path)?,
        None => FormConfig::default(),
    };
    if let Some(pdb) = &args.pdb {
        config.input.file = pdb.clone();
    }
    if let Some(steps) = args.steps {
        config.simulation.n_steps = steps;
    }
    if let Some(kind) = args.integrator {
        config.integrator.kind = kind;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The TUI owns the terminal, so it only logs when asked to
    let default_level = if args.no_tui || args.render { "warn" } else { "off" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let (script, script_name) = match &args.script {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            (text, path.display().to_string())
        }
        None => {
            let config = load_form(&args)?;
            (template::render_script(&config)?, "<rendered>".to_string())
        }
    };

    if let Some(path) = &args.write_script {
        fs::write(path, &script)
            .with_context(|| format!("failed to write script {}", path.display()))?;
        eprintln!("Script written to: {}", path.display());
    }
    if args.render {
        print!("{}", script);
        return Ok(());
    }

    let options = RunOptions {
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        sample_log: args.log.clone(),
        ..RunOptions::default()
    };
    let mut host = PythonHost::new(args.python.clone());
    if let Some(dir) = &args.workdir {
        host = host.with_working_dir(dir.clone());
    }
    log::info!(
        "running {} with {} in {}",
        script_name,
        host.interpreter(),
        host.working_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    );
    let run = ScriptRunner::start(&script, Box::new(host), options)?;
    let app = App::new(run, script_name);

    let tick_rate = Duration::from_millis(100);
    let result = if args.no_tui {
        run_no_tui(app, tick_rate).await
    } else {
        run_tui(app, tick_rate)
    };

    let app = match result {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };

    if args.summary {
        app.print_summary();
    }
    if let Some(ref log_path) = args.log {
        let logged = app.report.as_ref().and_then(|r| r.logged).unwrap_or(0);
        eprintln!(
            "{} samples logged to: {}",
            format_count(logged),
            log_path.display()
        );
    }

    let Some(report) = app.report.as_ref() else {
        return Ok(());
    };
    let failures: Vec<_> = report.errors.iter().filter(|e| !e.is_stop()).collect();
    for err in &failures {
        eprintln!("Error: {}", err);
    }
    if !failures.is_empty() {
        bail!("run failed with {} error(s)", failures.len());
    }
    Ok(())
}
