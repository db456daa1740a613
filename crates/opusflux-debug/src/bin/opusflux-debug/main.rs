//! Console front end: runs an outline program under the debugger.
//!
//! At every breakpoint the run suspends and waits for a command on stdin:
//! an empty line or `c` continues, `q` aborts.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use opusflux_debug::harness::{OutlineEngine, OutlineProgram};
use opusflux_debug::{
    DebugError, DebugSettings, DesignModel, ExecutionEngine, ExecutionSession, RunOutcome,
    RunReport, UiMessage, UiQueue, ValidationReport,
};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opusflux-debug")]
#[command(about = "Step through outline workflow programs")]
struct Cli {
    /// Debugger settings (`debug.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter; overrides `[log] level`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program, suspending at breakpoints
    Run {
        program: PathBuf,

        /// Node name to break at; repeatable
        #[arg(long = "break", value_name = "NAME")]
        breaks: Vec<String>,

        /// Pause after each step, in milliseconds
        #[arg(long, default_value_t = 0)]
        step_delay_ms: u64,

        /// Print UI messages as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Validate a program and print the location of every node
    Check { program: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let settings = match &cli.config {
        Some(path) => DebugSettings::load(path)?,
        None => DebugSettings::default(),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(settings.log_level.as_str()));

    match cli.command {
        Command::Run {
            program,
            breaks,
            step_delay_ms,
            json,
        } => run_program(
            &program,
            settings,
            &breaks,
            Duration::from_millis(step_delay_ms),
            json,
        ),
        Command::Check { program } => check_program(&program, settings),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_program(path: &Path) -> Result<OutlineProgram> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string());
    OutlineProgram::parse(name, text).map_err(|report| {
        print_report(&report);
        anyhow::anyhow!("{} is not a valid outline", path.display())
    })
}

fn print_report(report: &ValidationReport) {
    for error in &report.errors {
        eprintln!("  {}", error.to_string().yellow());
    }
}

fn check_program(path: &Path, settings: DebugSettings) -> Result<ExitCode> {
    let mut program = load_program(path)?;
    let engine = OutlineEngine::new();
    if let Err(report) = engine.compile(program.text()) {
        print_report(&report);
        return Ok(ExitCode::from(1));
    }
    let (tx, _queue) = opusflux_debug::ui_channel();
    let mut session = ExecutionSession::new(engine, settings, tx);
    session.refresh_design(&mut program);
    for (id, span) in session.design_map().iter() {
        let name = program.find(id).map(|node| node.name()).unwrap_or("?");
        println!("{:<8} {:<16} {span}", id.to_string().cyan(), name);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_program(
    path: &Path,
    settings: DebugSettings,
    breaks: &[String],
    step_delay: Duration,
    json: bool,
) -> Result<ExitCode> {
    let mut program = load_program(path)?;
    let (tx, queue) = opusflux_debug::ui_channel();
    let engine = OutlineEngine::new().with_step_delay(step_delay);
    let mut session = ExecutionSession::new(engine, settings, tx);

    session.refresh_design(&mut program);
    for name in breaks {
        if !program.select_by_name(name) {
            bail!("no node named '{name}'");
        }
        session.toggle_breakpoint(&program)?;
    }

    match session.start(&mut program) {
        Ok(_) => {}
        Err(DebugError::Validation(report)) => {
            print_report(&report);
            bail!("program failed validation");
        }
        Err(err) => return Err(err.into()),
    }

    let report = drive(&mut session, &queue, json)?;
    match report.outcome {
        RunOutcome::Completed { .. } => Ok(ExitCode::SUCCESS),
        RunOutcome::Aborted { .. } => Ok(ExitCode::from(1)),
    }
}

/// Drains the UI queue until the run finishes, prompting at every suspension.
fn drive(
    session: &mut ExecutionSession<OutlineEngine>,
    queue: &UiQueue,
    json: bool,
) -> Result<RunReport> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        let Some(message) = queue.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        if json {
            println!("{}", serde_json::to_string(&message)?);
        } else {
            print_message(session, &message);
        }
        match message {
            UiMessage::Suspended { .. } => {
                if !json {
                    print!("{} ", "(c)ontinue / (q)uit >".dimmed());
                    io::stdout().flush()?;
                }
                let mut line = String::new();
                let read = input.read_line(&mut line)?;
                match line.trim() {
                    "q" | "quit" => {
                        session.abort("aborted from console")?;
                    }
                    _ if read == 0 => {
                        session.abort("stdin closed")?;
                    }
                    _ => {
                        session.resume()?;
                    }
                }
            }
            UiMessage::RunFinished { report } => {
                session.wait(Duration::from_secs(1))?;
                return Ok(report);
            }
            _ => {}
        }
    }
}

fn print_message(session: &ExecutionSession<OutlineEngine>, message: &UiMessage) {
    match message {
        UiMessage::EventRecorded { record } => println!("{record}"),
        UiMessage::Suspended { span, node } => {
            let name = session
                .controller()
                .suspended_at()
                .map(|stop| stop.display_name.to_string())
                .unwrap_or_else(|| node.to_string());
            println!("{} {name} at {span}", "break".red().bold());
        }
        UiMessage::SessionStateChanged { state } => {
            println!("{}", format!("session {state:?}").to_lowercase().dimmed());
        }
        UiMessage::RunFinished { report } => match &report.outcome {
            RunOutcome::Completed { outputs } => {
                println!("{} {}", "completed".green().bold(), report.run);
                for (name, value) in outputs {
                    println!("  {name} = {value}");
                }
            }
            RunOutcome::Aborted { reason } => {
                println!("{} {} ({reason})", "aborted".yellow().bold(), report.run);
            }
        },
        UiMessage::LocationChanged { .. }
        | UiMessage::Resumed
        | UiMessage::RunRejected { .. }
        | UiMessage::BreakpointChanged { .. } => {}
    }
}
