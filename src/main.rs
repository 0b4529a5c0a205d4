//! # Master/Slave Session Entry Point
//!
//! Runs one binary in two roles:
//! - **Controller (default):** interactive menu or `run` subcommand; pins itself to the master
//!   core, spawns the slave, paces `DATA_<n>` messages for the session duration.
//! - **Slave (`--slave`, hidden):** started by the controller; pins to the slave core and answers
//!   every message on stdout.
//!
//! Logging via `RUST_LOG` (env_logger); the slave logs to the inherited stderr.

use std::{
    io::{self, BufRead, Write, stdin, stdout},
    path::PathBuf,
    process::ExitCode,
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use crossbeam::channel::{Receiver, RecvTimeoutError, unbounded};
use log::{error, info};

use core_pinned_session::{
    Role, SessionConfig, SessionCoordinator, SessionObserver, SessionOutcome, SessionSummary,
    SessionUpdate, StartOutcome, UpdateKind,
    config::{MASTER_CORE, SLAVE_CORE},
    shared::workload::{DEFAULT_WORKLOAD, MAX_WORKLOAD, MIN_WORKLOAD, WorkloadRange},
    slave::entry::{self, SlaveArgs},
};

#[derive(Parser, Debug)]
#[command(name = "master_slave")]
#[command(about = "Two-process master/slave messaging with per-role core pinning")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Internal: run as the slave process (used by the controller)
    #[arg(long, hide = true)]
    slave: bool,

    /// Internal: shared workload mapping created by the controller
    #[arg(long, hide = true)]
    workload: Option<PathBuf>,

    /// Internal: core the slave pins itself to
    #[arg(long, hide = true, default_value_t = SLAVE_CORE)]
    core: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single session without the menu
    Run {
        #[arg(long, default_value_t = DEFAULT_WORKLOAD)]
        master_workload: u32,

        #[arg(long, default_value_t = DEFAULT_WORKLOAD)]
        slave_workload: u32,

        /// Session duration in seconds
        #[arg(long, default_value = "60")]
        duration: u64,

        /// Pacing interval between messages in milliseconds
        #[arg(long, default_value = "50")]
        pacing_ms: u64,

        #[arg(long, default_value_t = MASTER_CORE)]
        master_core: usize,

        #[arg(long, default_value_t = SLAVE_CORE)]
        slave_core: usize,

        /// Print every message and ack
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Console stand-in for the scrolling log of a GUI.
struct ConsoleLog {
    verbose: bool,
}

impl SessionObserver for ConsoleLog {
    fn on_update(&mut self, update: &SessionUpdate) {
        match update.kind {
            UpdateKind::Sent(_) | UpdateKind::Acked(_) if !self.verbose => {}
            UpdateKind::State(_) => {}
            _ => println!("{}", update.log_line()),
        }
    }

    fn on_complete(&mut self, summary: &SessionSummary) {
        print_summary(summary);
    }
}

fn print_summary(summary: &SessionSummary) {
    let verdict = match &summary.outcome {
        SessionOutcome::Completed => "Communication finished".to_string(),
        SessionOutcome::Stopped => "Communication stopped".to_string(),
        SessionOutcome::Failed(reason) => format!("Communication failed: {}", reason),
    };
    println!("\n{} after {:.1}s", verdict, summary.elapsed.as_secs_f64());
    println!(
        "  sent={}  acked={}  unacknowledged={}",
        summary.messages_sent, summary.acks_received, summary.unacknowledged
    );
    if let Some(rtt) = &summary.rtt_us {
        println!(
            "  round trip (us): min={:.0} mean={:.0} max={:.0} over {} samples",
            rtt.min, rtt.mean, rtt.max, rtt.count
        );
    }
    if summary.slave_forced {
        println!("  slave process had to be terminated");
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.slave {
        return run_slave(cli.workload, cli.core);
    }

    match cli.command {
        Some(Commands::Run {
            master_workload,
            slave_workload,
            duration,
            pacing_ms,
            master_core,
            slave_core,
            verbose,
        }) => {
            let config = SessionConfig {
                session_duration: Duration::from_secs(duration),
                pacing_interval: Duration::from_millis(pacing_ms),
                master_core,
                slave_core,
                ..SessionConfig::default()
            };
            run_once(config, master_workload, slave_workload, verbose)
        }
        None => run_menu(),
    }
}

fn run_slave(workload: Option<PathBuf>, core: usize) -> ExitCode {
    let Some(workload) = workload else {
        error!("[Slave] --workload is required in slave mode");
        return ExitCode::FAILURE;
    };
    match entry::run(&SlaveArgs { workload, core }) {
        Ok(report) => {
            info!("[Slave] exiting cleanly after {} message(s)", report.processed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("[Slave] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_once(config: SessionConfig, master: u32, slave: u32, verbose: bool) -> ExitCode {
    let mut coordinator = match SessionCoordinator::new(config) {
        Ok(c) => c,
        Err(e) => {
            error!("[Main] cannot initialise: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for (role, value) in Role::ALL.into_iter().zip([master, slave]) {
        if let Err(e) = coordinator.set_workload(role, value) {
            error!("[Main] {}", e);
            return ExitCode::FAILURE;
        }
    }
    coordinator.subscribe(ConsoleLog { verbose });

    if let Err(e) = coordinator.start() {
        error!("[Main] session could not start: {}", e);
        return ExitCode::FAILURE;
    }
    match coordinator.wait() {
        Some(SessionSummary {
            outcome: SessionOutcome::Failed(_),
            ..
        }) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

// interactive menu (controller only)
// Input is read on its own thread so the menu stays live while a session runs: workloads can be
// retuned and the session stopped mid-flight.

/// What the next input line answers.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Choice,
    Workload(Role),
}

fn spawn_input() -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("menu-input".into())
        .spawn(move || {
            for line in stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line.trim().to_string()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn print_menu(coordinator: &SessionCoordinator) {
    let workload = coordinator.workload();
    let status = if coordinator.is_active() { "running" } else { "idle" };
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     MASTER / SLAVE COMMUNICATION            │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Start session                           │");
    println!("│  2) Set master workload [{:>9}]         │", workload.get(Role::Master));
    println!("│  3) Set slave workload  [{:>9}]         │", workload.get(Role::Slave));
    println!("│  4) Stop session                            │");
    println!("│  5) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1-5] (session {}): ", status);
    let _ = stdout().flush();
}

fn prompt_workload(role: Role) {
    print!("Enter {} workload [{}..={}]: ", role, MIN_WORKLOAD, MAX_WORKLOAD);
    let _ = stdout().flush();
}

fn apply_workload(coordinator: &SessionCoordinator, role: Role, input: &str) {
    let Ok(value) = input.parse::<u32>() else {
        println!("Not a number, workload unchanged.");
        return;
    };
    match coordinator.set_workload(role, value) {
        Ok(()) => info!("[Main] {} workload now {}", role, value),
        Err(e) => {
            let clamped = WorkloadRange::clamp(value);
            println!("{}; using {} instead.", e, clamped);
            if let Err(e) = coordinator.set_workload(role, clamped) {
                error!("[Main] {}", e);
            }
        }
    }
}

fn run_menu() -> ExitCode {
    let mut coordinator = match SessionCoordinator::new(SessionConfig::default()) {
        Ok(c) => c,
        Err(e) => {
            error!("[Main] cannot initialise: {}", e);
            eprintln!("This program needs at least 2 CPU cores: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let input = match spawn_input() {
        Ok(rx) => rx,
        Err(e) => {
            error!("[Main] cannot read the terminal: {}", e);
            return ExitCode::FAILURE;
        }
    };
    coordinator.subscribe(ConsoleLog { verbose: true });
    info!("=== MASTER/SLAVE SESSION START ===");

    let tick = coordinator.config().poll_interval;
    let mut pending = Pending::Choice;
    print_menu(&coordinator);

    loop {
        if coordinator.poll().is_some() {
            println!("\nReturning to menu...");
            if let Pending::Choice = pending {
                print_menu(&coordinator);
            }
        }

        let line = match input.recv_timeout(tick) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("[Main] input closed, shutting down");
                coordinator.shutdown();
                return ExitCode::SUCCESS;
            }
        };

        pending = match (pending, line.as_str()) {
            (Pending::Workload(role), value) => {
                apply_workload(&coordinator, role, value);
                Pending::Choice
            }
            (Pending::Choice, "1" | "") => {
                match coordinator.start() {
                    Ok(StartOutcome::Started) => {}
                    Ok(StartOutcome::AlreadyRunning) => println!("A session is already running."),
                    Err(e) => println!("Session could not start: {}", e),
                }
                Pending::Choice
            }
            (Pending::Choice, "2") => Pending::Workload(Role::Master),
            (Pending::Choice, "3") => Pending::Workload(Role::Slave),
            (Pending::Choice, "4") => {
                if !coordinator.stop() {
                    println!("No session is running.");
                }
                Pending::Choice
            }
            (Pending::Choice, "5") => {
                coordinator.shutdown();
                println!("Exiting. Goodbye!");
                info!("=== MASTER/SLAVE SESSION FINISHED ===");
                return ExitCode::SUCCESS;
            }
            (Pending::Choice, other) => {
                println!("Unrecognized option '{}', please try again.", other);
                Pending::Choice
            }
        };

        match pending {
            Pending::Choice => print_menu(&coordinator),
            Pending::Workload(role) => prompt_workload(role),
        }
    }
}
