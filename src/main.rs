//! `blockday` -- fixed-schedule workday timer with task blocks and cloud sync.
//!
//! ```bash
//! # Interactive timer (type start / pause / skip / reset / end / sync / quit)
//! blockday run
//!
//! # Task board
//! blockday add 3 "Review pull requests"
//! blockday complete 3 1
//! blockday board
//!
//! # Another workspace
//! blockday --root ~/blockday-data sync
//! ```

use blockday::application::commands::{
    AppState, add_task_impl, download_impl, get_board_impl, get_timer_state_impl,
    move_from_queue_impl, parse_block_number, parse_task_target, remove_task_impl,
    set_block_completed_impl, set_task_completed_impl, spawn_timer_impl, start_new_day_impl,
    sync_now_impl, test_connection_impl, upload_impl,
};
use blockday::application::cloud_sync::{SyncCounts, SyncReport};
use blockday::application::phase_timer::TimerSnapshot;
use blockday::application::timer_driver::TimerCommand;
use blockday::domain::models::{Task, TaskBoard};
use blockday::infrastructure::config::load_config;
use blockday::infrastructure::error::InfraError;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "blockday", version, about = "Fixed-schedule workday timer with task blocks and cloud sync")]
struct Cli {
    /// Workspace directory holding config.json and the data files.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the timer interactively.
    Run,
    /// Print the task board and timer position.
    Board,
    /// Add a task to `planning`, `queue` or a block number (1-8).
    Add { list: String, text: Vec<String> },
    /// Mark a task done (or not done with --undo). Positions start at 1.
    Complete {
        list: String,
        position: usize,
        #[arg(long)]
        undo: bool,
    },
    /// Delete a task.
    Remove { list: String, position: usize },
    /// Flag a whole block as done.
    BlockDone {
        block: usize,
        #[arg(long)]
        undo: bool,
    },
    /// Move a queued task into a block.
    Move { position: usize, block: usize },
    /// Log today's results, requeue unfinished tasks and clear the board.
    NewDay,
    /// Upload then download every data file.
    Sync,
    Upload,
    Download,
    /// Check that the sync worker answers.
    Probe,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let root = match cli.root.clone() {
        Some(root) => Ok(root),
        None => std::env::current_dir(),
    };
    let root = match root {
        Ok(root) => root,
        Err(error) => {
            eprintln!("Error resolving workspace directory: {error}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&root);

    let state = match AppState::new(root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("Error initializing workspace: {error}");
            return ExitCode::FAILURE;
        }
    };
    for warning in state.config_warnings() {
        eprintln!("warning: {warning}");
    }

    let command_name = command_name(&cli.command);
    match execute(&state, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {}", state.command_error(command_name, &error));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(root: &Path) {
    let log_level = load_config(root)
        .map(|config| config.log_level)
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Run => "run",
        Command::Board => "board",
        Command::Add { .. } => "add_task",
        Command::Complete { .. } => "set_task_completed",
        Command::Remove { .. } => "remove_task",
        Command::BlockDone { .. } => "set_block_completed",
        Command::Move { .. } => "move_from_queue",
        Command::NewDay => "start_new_day",
        Command::Sync => "sync",
        Command::Upload => "upload",
        Command::Download => "download",
        Command::Probe => "probe",
    }
}

async fn execute(state: &AppState, command: Command) -> Result<(), InfraError> {
    match command {
        Command::Run => run_timer(state).await?,
        Command::Board => {
            print_snapshot_line(&get_timer_state_impl(state));
            println!();
            print_board(&get_board_impl(state));
        }
        Command::Add { list, text } => {
            let board = add_task_impl(state, parse_task_target(&list)?, text.join(" "))?;
            print_board(&board);
        }
        Command::Complete {
            list,
            position,
            undo,
        } => {
            let board =
                set_task_completed_impl(state, parse_task_target(&list)?, to_index(position)?, !undo)?;
            print_board(&board);
        }
        Command::Remove { list, position } => {
            let board = remove_task_impl(state, parse_task_target(&list)?, to_index(position)?)?;
            print_board(&board);
        }
        Command::BlockDone { block, undo } => {
            let board = set_block_completed_impl(state, parse_block_number(block)?, !undo)?;
            print_board(&board);
        }
        Command::Move { position, block } => {
            let board = move_from_queue_impl(state, to_index(position)?, parse_block_number(block)?)?;
            print_board(&board);
        }
        Command::NewDay => {
            let summary = start_new_day_impl(state)?;
            println!(
                "Completed: {}/{} tasks. Moved {} tasks to queue.",
                summary.completed, summary.total, summary.moved_to_queue
            );
        }
        Command::Sync => print_sync_report(&sync_now_impl(state).await?),
        Command::Upload => print_counts("upload", upload_impl(state).await?),
        Command::Download => print_counts("download", download_impl(state).await?),
        Command::Probe => {
            if test_connection_impl(state).await? {
                println!("Sync worker reachable.");
            } else {
                println!("Sync worker not reachable.");
            }
        }
    }
    Ok(())
}

fn to_index(position: usize) -> Result<usize, InfraError> {
    position
        .checked_sub(1)
        .ok_or_else(|| InfraError::InvalidInput("positions start at 1".to_string()))
}

async fn run_timer(state: &AppState) -> Result<(), InfraError> {
    let (sender, mut snapshots) = tokio::sync::mpsc::unbounded_channel();
    let (timer, task) = spawn_timer_impl(state, sender);
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            print_snapshot_line(&snapshot);
        }
        println!();
    });

    println!("Commands: start, pause, skip, reset, end, sync, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.trim() {
            "start" | "s" => TimerCommand::Start,
            "pause" | "p" => TimerCommand::Pause,
            "skip" | "n" => TimerCommand::Skip,
            "reset" => TimerCommand::Reset,
            "end" => TimerCommand::EndDay,
            "sync" => {
                match sync_now_impl(state).await {
                    Ok(report) => print_sync_report(&report),
                    Err(error) => eprintln!("Error: {}", state.command_error("sync", &error)),
                }
                continue;
            }
            "quit" | "q" | "exit" => break,
            "" => continue,
            other => {
                eprintln!("unknown command: {other}");
                continue;
            }
        };
        timer.send(command).await?;
    }

    drop(timer);
    let final_state = task
        .await
        .map_err(|error| InfraError::Io(std::io::Error::other(error)))?;
    let _ = printer.await;
    tracing::info!(
        phase = final_state.phase_name(),
        remaining = %final_state.format_time_remaining(),
        "timer stopped"
    );
    Ok(())
}

fn print_snapshot_line(snapshot: &TimerSnapshot) {
    let status = if snapshot.finished {
        "finished"
    } else if snapshot.day_ended {
        "day ended"
    } else if snapshot.state.is_running {
        "running"
    } else {
        "paused"
    };
    print!(
        "\r{:<10} {} [{}] ({})   ",
        snapshot.phase_name,
        snapshot.time_remaining,
        snapshot.phase_kind.as_str(),
        status
    );
    let _ = std::io::stdout().flush();
}

fn print_board(board: &TaskBoard) {
    for container in board.containers() {
        let done = if container.block_completed { " (done)" } else { "" };
        println!("{}{}", container.name, done);
        print_tasks(&container.tasks);
    }
    println!("Queue");
    print_tasks(&board.queue);
}

fn print_tasks(tasks: &[Task]) {
    for (position, task) in tasks.iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        let requeued = if task.times_requeued > 0 {
            format!(" (requeued {}x)", task.times_requeued)
        } else {
            String::new()
        };
        println!("  {}. [{}] {}{}", position + 1, mark, task.text, requeued);
    }
}

fn print_counts(label: &str, counts: SyncCounts) {
    println!(
        "{label}: {} succeeded, {} failed, {} skipped",
        counts.succeeded, counts.failed, counts.skipped
    );
}

fn print_sync_report(report: &SyncReport) {
    print_counts("upload", report.upload);
    print_counts("download", report.download);
    if report.is_success() {
        println!("Sync complete.");
    } else {
        println!("Sync finished with problems ({:?}).", report.availability);
    }
}
