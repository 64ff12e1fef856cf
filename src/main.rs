//! Probeline CLI - command/response test runner for serial devices
//!
//! Loads a JSON command list, runs it against a serial port (or a simulated
//! device) and reports PASS/FAIL per command and iteration.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use probeline_core::cli::{
    exit_code_for, format_case_table, format_log, format_outcome, format_summary, print_exit_codes,
    CliResult, Console, ExitCodes, OutputFormat,
};
use probeline_core::config::{self, AppConfig};
use probeline_core::core::evaluator::Matcher;
use probeline_core::core::executor::CancelToken;
use probeline_core::core::line_source::LineSource;
use probeline_core::core::logger::{search_file, Logger, SessionLogger};
use probeline_core::core::observer::{ChannelObserver, Observers, RunEvent, RunObserver};
use probeline_core::core::outcome::TestStatus;
use probeline_core::core::report;
use probeline_core::core::runner::RunController;
use probeline_core::core::simulator::{DeviceTemplates, SimulatedDevice};
use probeline_core::core::testcase::{
    CommandList, CommandListError, TestCase, DEFAULT_RETRIES, DEFAULT_WAIT_TILL,
};
use probeline_core::core::transport::{list_ports, LineEnding, SerialConfig, TransportError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Probeline CLI
#[derive(Parser, Debug)]
#[command(
    name = "probeline",
    version,
    about = "Scripted command/response testing for serial-port devices",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true, env = "PROBELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (live device traffic, debug diagnostics)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (summary and errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to send commands
#[derive(clap::Args, Debug, Clone)]
struct Target {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Line ending appended to each command (crlf, lf, cr, none)
    #[arg(long)]
    line_ending: Option<LineEnding>,

    /// Use a simulated device: a JSON rules file, or `at-modem`
    #[arg(long, value_name = "RULES")]
    simulate: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Run a command list
    Run {
        /// JSON command list
        #[arg(short, long)]
        commands: PathBuf,

        #[command(flatten)]
        target: Target,

        /// Passes over the command list
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
        iterations: Option<u32>,

        /// Write an HTML report here
        #[arg(long)]
        html: Option<PathBuf>,

        /// Write a JSON report here
        #[arg(long)]
        json: Option<PathBuf>,

        /// Skip report files
        #[arg(long)]
        no_report: bool,
    },

    /// Send a single command and check the reply
    Send {
        /// Command text
        #[arg(short, long)]
        command: String,

        /// Pass when the reply contains this text
        #[arg(short, long, default_value = "")]
        expected: String,

        /// Pass when the reply matches this regex
        #[arg(short, long, default_value = "")]
        regex: String,

        /// Fail when the reply contains this text
        #[arg(long, default_value = "")]
        negative: String,

        /// Seconds to wait per attempt
        #[arg(short, long, default_value_t = DEFAULT_WAIT_TILL)]
        wait: f64,

        /// Attempts before giving up
        #[arg(long, default_value_t = DEFAULT_RETRIES)]
        retries: u32,

        #[command(flatten)]
        target: Target,
    },

    /// Edit a command list
    Commands {
        #[command(subcommand)]
        action: ListAction,
    },

    /// Session log tools
    Log {
        #[command(subcommand)]
        action: LogAction,
    },

    /// Print the exit code table
    ExitCodes,
}

/// Fields of a command list row
#[derive(clap::Args, Debug, Clone, Default)]
struct CaseFields {
    /// Display name
    #[arg(long)]
    name: Option<String>,
    /// Command text
    #[arg(long)]
    command: Option<String>,
    /// Expected substring
    #[arg(long)]
    expected: Option<String>,
    /// Regex
    #[arg(long)]
    regex: Option<String>,
    /// Forbidden substring
    #[arg(long)]
    negative: Option<String>,
    /// Seconds to wait per attempt
    #[arg(long)]
    wait: Option<f64>,
    /// Attempts
    #[arg(long)]
    retries: Option<u32>,
    /// Note shown next to the result
    #[arg(long)]
    message: Option<String>,
}

impl CaseFields {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.command.is_none()
            && self.expected.is_none()
            && self.regex.is_none()
            && self.negative.is_none()
            && self.wait.is_none()
            && self.retries.is_none()
            && self.message.is_none()
    }

    fn apply(&self, mut case: TestCase) -> TestCase {
        for (field, value) in [
            (&mut case.name, &self.name),
            (&mut case.command, &self.command),
            (&mut case.expected, &self.expected),
            (&mut case.regex, &self.regex),
            (&mut case.negative, &self.negative),
            (&mut case.message, &self.message),
        ] {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
        if let Some(wait) = self.wait {
            case.wait_till = wait;
        }
        if let Some(retries) = self.retries {
            case.retries = retries;
        }
        case
    }
}

const EVENT_HEADROOM: usize = 1024;

/// 1-based row number as shown by `commands show`
type RowArg = u64;

#[derive(Subcommand, Debug)]
enum ListAction {
    /// Create a new command list with a sample row
    Init {
        file: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the command list
    Show { file: PathBuf },
    /// Append a row (a "New Command" placeholder when no fields are given)
    Add {
        file: PathBuf,
        #[command(flatten)]
        fields: CaseFields,
    },
    /// Change fields of a row
    Set {
        file: PathBuf,
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        row: RowArg,
        #[command(flatten)]
        fields: CaseFields,
    },
    /// Copy a row; the copy goes right after it
    Duplicate {
        file: PathBuf,
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        row: RowArg,
    },
    /// Delete a row
    Remove {
        file: PathBuf,
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        row: RowArg,
    },
    /// Move a row to a new position
    Move {
        file: PathBuf,
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        from: RowArg,
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        to: RowArg,
    },
    /// Check every row and regex
    Validate { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum LogAction {
    /// Find lines containing TERM
    Search {
        term: String,
        /// Log file (defaults to the configured session log)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let trace_file = loaded.as_ref().is_ok_and(|c| c.logging.trace_file);
    let _trace_guard = init_tracing(&cli, trace_file);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let console = Console::new(cli.format, cli.quiet);
    match dispatch(&cli, &config, &console) {
        Ok(result) => {
            match (&result, result.message()) {
                (CliResult::Success(_), Some(msg)) => {
                    let _ = console.line(msg);
                }
                (CliResult::Error(..), Some(msg)) => eprintln!("{msg}"),
                _ => {}
            }
            result.to_exit_code()
        }
        Err(e) => {
            debug!("{e:?}");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn init_tracing(cli: &Cli, trace_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut guard = None;
    let file_layer = if trace_file {
        match config::log_dir() {
            Some(dir) => {
                if let Err(e) = config::init_directories() {
                    eprintln!("Cannot create {}: {e}", dir.display());
                }
                let appender = tracing_appender::rolling::daily(dir, "probeline.log");
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            None => None,
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn dispatch(cli: &Cli, config: &AppConfig, console: &Console) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => show_ports(console, *detailed),
        Commands::Run {
            commands,
            target,
            iterations,
            html,
            json,
            no_report,
        } => {
            let mut reports = config.report.clone();
            if *no_report {
                reports.html = None;
                reports.json = None;
            }
            if html.is_some() {
                reports.html.clone_from(html);
            }
            if json.is_some() {
                reports.json.clone_from(json);
            }
            run_list(
                cli,
                config,
                console,
                commands,
                target,
                iterations.unwrap_or(config.run.iterations),
                &reports,
            )
        }
        Commands::Send {
            command,
            expected,
            regex,
            negative,
            wait,
            retries,
            target,
        } => {
            let case = TestCase::new(command.as_str(), command.as_str())
                .expected(expected.as_str())
                .regex(regex.as_str())
                .negative(negative.as_str())
                .wait_till(*wait)
                .retries(*retries);
            send_one(cli, config, console, case, target)
        }
        Commands::Commands { action } => edit_list(console, action),
        Commands::Log {
            action: LogAction::Search { term, file },
        } => {
            let path = file.as_deref().unwrap_or(&config.logging.session_log);
            search_log(console, path, term)
        }
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

fn show_ports(console: &Console, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        return Ok(CliResult::success_with_message("No serial ports found."));
    }

    match console.format() {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            console.always(&serde_json::to_string_pretty(&json)?)?;
        }
        OutputFormat::Text => {
            if detailed {
                console.line("Available Serial Ports:")?;
                console.line(&format!("{:-<60}", ""))?;
                for port in &ports {
                    console.line(&format!("  {} [{:?}]", port.port_name, port.port_type))?;
                }
            } else {
                for port in &ports {
                    console.always(&port.port_name)?;
                }
            }
        }
    }
    Ok(CliResult::success())
}

fn open_session_log(config: &AppConfig) -> anyhow::Result<Logger> {
    let mut logger = SessionLogger::new();
    let path = &config.logging.session_log;
    if !path.as_os_str().is_empty() {
        logger
            .start(path, config.logging.format)
            .with_context(|| format!("opening session log {}", path.display()))?;
    }
    Ok(Arc::new(Mutex::new(logger)))
}

fn connect(
    config: &AppConfig,
    target: &Target,
    sink: Arc<dyn RunObserver>,
) -> anyhow::Result<Arc<LineSource>> {
    let mut serial: SerialConfig = config.serial.clone();
    if let Some(port) = &target.port {
        serial.port.clone_from(port);
    }
    if let Some(baud) = target.baud {
        serial.baud_rate = baud;
    }
    let mut run = config.run.clone();
    if let Some(line_ending) = target.line_ending {
        run.line_ending = line_ending;
    }

    let source = Arc::new(LineSource::new(sink, run.line_source_options(&serial)));
    match target.simulate.as_deref() {
        Some("at-modem") => source.attach(Arc::new(DeviceTemplates::at_modem())),
        Some(rules) => {
            let device = SimulatedDevice::load(Path::new(rules))
                .with_context(|| format!("loading simulator rules {rules}"))?;
            source.attach(Arc::new(device));
        }
        None => {
            if serial.port.is_empty() {
                bail!(TransportError::PortNotFound(
                    "no port given (use --port or set serial.port)".into()
                ));
            }
            let port = serial.port.clone();
            source
                .connect_serial(serial)
                .with_context(|| format!("opening {port}"))?;
        }
    }
    Ok(source)
}

fn run_list(
    cli: &Cli,
    config: &AppConfig,
    console: &Console,
    path: &Path,
    target: &Target,
    iterations: u32,
    reports: &config::ReportConfig,
) -> anyhow::Result<CliResult> {
    let list = CommandList::load_json(path)
        .with_context(|| format!("loading command list {}", path.display()))?;
    if list.is_empty() {
        return Ok(CliResult::error(ExitCodes::VALIDATION_FAILED, "Command list is empty"));
    }

    let session = open_session_log(config)?;
    // Every PENDING row is queued before draining starts.
    let planned = list.len() * iterations as usize;
    let (channel, events) = ChannelObserver::bounded(planned + EVENT_HEADROOM);
    let sink: Arc<dyn RunObserver> = Arc::new(Observers::new().with(session).with(Arc::new(channel)));
    let source = connect(config, target, Arc::clone(&sink))?;

    let controller =
        RunController::new(Arc::clone(&source)).with_settings(config.run.executor_settings());
    let token = controller.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        warn!("Ctrl-C handler not installed: {e}");
    }

    info!(commands = list.len(), iterations, path = %path.display(), "starting run");
    let handle = controller.start(list.into_vec(), iterations, sink)?;

    // Worker and reader threads only ever talk to us through the channel.
    loop {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(RunEvent::Status(outcome)) => {
                if outcome.is_terminal() || cli.format == OutputFormat::Json {
                    console.line(&format_outcome(&outcome, cli.format))?;
                }
            }
            Ok(RunEvent::Log(entry)) => {
                if cli.verbose {
                    console.line(&format_log(&entry, cli.format))?;
                }
            }
            Ok(RunEvent::Finished(_)) => break,
            Err(_) if handle.is_finished() => break,
            Err(_) => {}
        }
    }
    let report = handle.join()?;
    drop(events);
    source.disconnect();

    let summary = report.summary();
    console.always(&format_summary(&summary, cli.format))?;

    if summary.total > 0 {
        if let Some(html) = &reports.html {
            report::write_html(&report, html)?;
            console.line(&format!("HTML report: {}", html.display()))?;
        }
        if let Some(json) = &reports.json {
            report::write_json(&report, json)?;
            console.line(&format!("JSON report: {}", json.display()))?;
        }
    } else {
        warn!("nothing executed, no report written");
    }

    Ok(if report.cancelled {
        CliResult::cancelled()
    } else if summary.failed > 0 {
        CliResult::tests_failed(format!("{} of {} tests failed", summary.failed, summary.total))
    } else {
        CliResult::success()
    })
}

fn send_one(
    cli: &Cli,
    config: &AppConfig,
    console: &Console,
    case: TestCase,
    target: &Target,
) -> anyhow::Result<CliResult> {
    if let Err(e) = case.validate() {
        return Ok(CliResult::error(ExitCodes::INVALID_ARGS, e.to_string()));
    }

    let session = open_session_log(config)?;
    // Drained only after the command completes on this thread.
    let (channel, events) = ChannelObserver::unbounded();
    let sink: Arc<dyn RunObserver> = Arc::new(Observers::new().with(session).with(Arc::new(channel)));
    let source = connect(config, target, Arc::clone(&sink))?;

    let controller =
        RunController::new(Arc::clone(&source)).with_settings(config.run.executor_settings());
    let token = controller.cancel_token();
    let interrupted = CancelToken::new();
    let seen = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        seen.cancel();
        token.cancel();
    }) {
        warn!("Ctrl-C handler not installed: {e}");
    }

    let outcome = controller.execute_single(&case, &*sink)?;
    source.disconnect();

    if cli.verbose {
        for event in events.try_iter() {
            if let RunEvent::Log(entry) = event {
                console.line(&format_log(&entry, cli.format))?;
            }
        }
    }
    console.always(&format_outcome(&outcome, cli.format))?;
    if cli.format == OutputFormat::Text && !outcome.found.is_empty() {
        console.line(&outcome.found)?;
    }

    Ok(if interrupted.is_cancelled() {
        CliResult::cancelled()
    } else if outcome.result == TestStatus::Pass {
        CliResult::success()
    } else {
        CliResult::tests_failed(format!("{} failed", case.name))
    })
}

fn row_index(row: RowArg) -> usize {
    usize::try_from(row.saturating_sub(1)).unwrap_or(usize::MAX)
}

fn edit_list(console: &Console, action: &ListAction) -> anyhow::Result<CliResult> {
    match action {
        ListAction::Init { file, force } => {
            if file.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::INVALID_ARGS,
                    format!("{} already exists (use --force to overwrite)", file.display()),
                ));
            }
            let list = CommandList::from_cases(vec![
                TestCase::new("Ping", "AT").expected("OK"),
                TestCase::new("Firmware version", "AT+GMR").regex(r"^AT version:\S+").negative("ERROR"),
            ])?;
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Created {}", file.display())))
        }
        ListAction::Show { file } => {
            let list = CommandList::load_json(file)?;
            match console.format() {
                OutputFormat::Text => console.always(format_case_table(list.as_slice()).trim_end())?,
                OutputFormat::Json => console.always(&list.to_json_string()?)?,
            }
            Ok(CliResult::success())
        }
        ListAction::Add { file, fields } => {
            let mut list = load_or_new(file)?;
            let index = if fields.is_empty() {
                list.add_placeholder()
            } else {
                list.push(fields.apply(TestCase::placeholder()))?
            };
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Added row {}", index + 1)))
        }
        ListAction::Set { file, row, fields } => {
            let mut list = CommandList::load_json(file)?;
            let index = row_index(*row);
            let current = list
                .get(index)
                .cloned()
                .ok_or(CommandListError::IndexOutOfRange { index, len: list.len() })?;
            list.replace(index, fields.apply(current))?;
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Updated row {row}")))
        }
        ListAction::Duplicate { file, row } => {
            let mut list = CommandList::load_json(file)?;
            let copy = list.duplicate(row_index(*row))?;
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Duplicated row {row} as row {}", copy + 1)))
        }
        ListAction::Remove { file, row } => {
            let mut list = CommandList::load_json(file)?;
            let removed = list.remove(row_index(*row))?;
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Removed row {row} ({})", removed.name)))
        }
        ListAction::Move { file, from, to } => {
            let mut list = CommandList::load_json(file)?;
            list.move_row(row_index(*from), row_index(*to))?;
            list.save_json(file)?;
            Ok(CliResult::success_with_message(format!("Moved row {from} to {to}")))
        }
        ListAction::Validate { file } => validate_list(console, file),
    }
}

fn load_or_new(file: &Path) -> anyhow::Result<CommandList> {
    if file.exists() {
        Ok(CommandList::load_json(file)?)
    } else {
        Ok(CommandList::new())
    }
}

fn validate_list(console: &Console, file: &Path) -> anyhow::Result<CliResult> {
    let list = CommandList::load_json(file)?;
    let mut problems = 0;
    for (i, case) in list.iter().enumerate() {
        if let Err(e) = case.validate() {
            problems += 1;
            console.always(&format!("row {}: {e}", i + 1))?;
        }
        if let (_, Some(e)) = Matcher::compile(&case.rule()) {
            problems += 1;
            console.always(&format!("row {}: {e}", i + 1))?;
        }
        if case.command.trim().is_empty() {
            problems += 1;
            console.always(&format!("row {}: command is empty", i + 1))?;
        }
    }

    if problems == 0 {
        Ok(CliResult::success_with_message(format!("{} commands OK", list.len())))
    } else {
        Ok(CliResult::error(
            ExitCodes::VALIDATION_FAILED,
            format!("{problems} problem(s) in {}", file.display()),
        ))
    }
}

fn search_log(console: &Console, path: &Path, term: &str) -> anyhow::Result<CliResult> {
    let hits = search_file(path, term).with_context(|| format!("reading {}", path.display()))?;
    if hits.is_empty() {
        return Ok(CliResult::success_with_message(format!("No matches for '{term}'")));
    }
    for (line_no, line) in &hits {
        match console.format() {
            OutputFormat::Text => console.always(&format!("{line_no:>6}: {line}"))?,
            OutputFormat::Json => {
                console.always(&serde_json::json!({ "line": line_no, "text": line }).to_string())?;
            }
        }
    }
    Ok(CliResult::success())
}
