use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace, bootstrap_workspace_with_lookup};
use crate::application::cloud_sync::{SyncCounts, SyncReconciler, SyncReport, SyncRunner};
use crate::application::phase_timer::{PhaseTimer, TimerSnapshot};
use crate::application::task_board::{NewDaySummary, TaskBoardService};
use crate::application::timer_driver::{TimerHandle, TokioTickScheduler, spawn_timer};
use crate::domain::models::{TaskBoard, TaskTarget, WORK_BLOCK_COUNT};
use crate::domain::schedule::TimerState;
use crate::infrastructure::announcer::{AnnouncementSink, build_announcer};
use crate::infrastructure::config::{AppConfig, ConfigWarning};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_store::RemoteStore;
use crate::infrastructure::storage::{DataStore, TimerStateStore};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

pub type AppTimer = PhaseTimer<DataStore, dyn AnnouncementSink, TokioTickScheduler>;

pub struct AppState {
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    warnings: Vec<ConfigWarning>,
    store: DataStore,
    board: TaskBoardService,
    sync: SyncRunner<dyn RemoteStore>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Ok(Self::from_bootstrap(bootstrap_workspace(&workspace_root)?))
    }

    pub fn with_lookup<F>(workspace_root: PathBuf, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self::from_bootstrap(bootstrap_workspace_with_lookup(
            &workspace_root,
            lookup,
        )?))
    }

    fn from_bootstrap(bootstrap: BootstrapResult) -> Self {
        let store = DataStore::new(bootstrap.paths);
        let reconciler = SyncReconciler::from_config(&bootstrap.config, store.clone());
        Self {
            workspace_root: bootstrap.workspace_root,
            logs_dir: bootstrap.logs_dir,
            warnings: bootstrap.warnings,
            config: bootstrap.config,
            board: TaskBoardService::new(store.clone()),
            sync: SyncRunner::new(Arc::new(reconciler)),
            store,
            log_guard: Mutex::new(()),
        }
    }

    /// Routes sync through `remote` regardless of what the config says.
    pub fn with_remote_store(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        let reconciler = SyncReconciler::new(self.store.clone(), remote);
        self.sync = SyncRunner::new(Arc::new(reconciler));
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

/// `planning`, `queue`, or a work block number counted from 1.
pub fn parse_task_target(value: &str) -> Result<TaskTarget, InfraError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "planning" | "p" => Ok(TaskTarget::Planning),
        "queue" | "q" => Ok(TaskTarget::Queue),
        other => {
            let number = other
                .strip_prefix("block")
                .unwrap_or(other)
                .trim()
                .parse::<usize>()
                .map_err(|_| InfraError::InvalidInput(format!("unknown task list: {value}")))?;
            parse_block_number(number).map(TaskTarget::Block)
        }
    }
}

/// Converts a 1-based block number into the board's block index.
pub fn parse_block_number(number: usize) -> Result<usize, InfraError> {
    if (1..=WORK_BLOCK_COUNT).contains(&number) {
        Ok(number - 1)
    } else {
        Err(InfraError::InvalidInput(format!(
            "block number must be between 1 and {WORK_BLOCK_COUNT}, got {number}"
        )))
    }
}

pub fn get_board_impl(state: &AppState) -> TaskBoard {
    state.board.load_board()
}

pub fn add_task_impl(state: &AppState, target: TaskTarget, text: String) -> Result<TaskBoard, InfraError> {
    let board = state.board.add_task(target, &text)?;
    state.log_info("add_task", &format!("added '{}' to {target:?}", text.trim()));
    Ok(board)
}

pub fn set_task_completed_impl(
    state: &AppState,
    target: TaskTarget,
    index: usize,
    completed: bool,
) -> Result<TaskBoard, InfraError> {
    let board = state.board.set_task_completed(target, index, completed)?;
    state.log_info(
        "set_task_completed",
        &format!("{target:?}[{index}] completed={completed}"),
    );
    Ok(board)
}

pub fn remove_task_impl(state: &AppState, target: TaskTarget, index: usize) -> Result<TaskBoard, InfraError> {
    let board = state.board.remove_task(target, index)?;
    state.log_info("remove_task", &format!("removed {target:?}[{index}]"));
    Ok(board)
}

pub fn set_block_completed_impl(
    state: &AppState,
    block: usize,
    completed: bool,
) -> Result<TaskBoard, InfraError> {
    state.board.set_block_completed(block, completed)
}

pub fn move_from_queue_impl(
    state: &AppState,
    queue_index: usize,
    block: usize,
) -> Result<TaskBoard, InfraError> {
    let board = state.board.move_from_queue(queue_index, block)?;
    state.log_info(
        "move_from_queue",
        &format!("queue[{queue_index}] -> block index {block}"),
    );
    Ok(board)
}

pub fn start_new_day_impl(state: &AppState) -> Result<NewDaySummary, InfraError> {
    let summary = state.board.start_new_day()?;
    state.log_info(
        "start_new_day",
        &format!(
            "completed {}/{}, moved {} to queue",
            summary.completed, summary.total, summary.moved_to_queue
        ),
    );
    Ok(summary)
}

/// The persisted timer state as the next timer start would see it.
pub fn get_timer_state_impl(state: &AppState) -> TimerSnapshot {
    let timer_state = match TimerStateStore::load(&state.store) {
        Ok(Some(timer_state)) if timer_state.validate().is_ok() => timer_state,
        Ok(_) => TimerState::initial(),
        Err(error) => {
            tracing::warn!(%error, "timer state unreadable");
            TimerState::initial()
        }
    };
    TimerSnapshot::from(&timer_state)
}

/// Restores the timer from disk and starts its driver loop on the current
/// runtime. Snapshots are published to `observer` after every transition.
pub fn spawn_timer_impl(
    state: &AppState,
    observer: UnboundedSender<TimerSnapshot>,
) -> (TimerHandle, JoinHandle<TimerState>) {
    let scheduler = Arc::new(TokioTickScheduler::default());
    let mut timer: AppTimer = PhaseTimer::new(
        &state.config,
        Arc::new(state.store.clone()),
        build_announcer(&state.config),
        Arc::clone(&scheduler),
    )
    .with_observer(observer);
    timer.restore();
    if !timer.validate_announcements() {
        tracing::info!("announcements will only be logged");
    }
    spawn_timer(timer, scheduler)
}

pub async fn sync_now_impl(state: &AppState) -> Result<SyncReport, InfraError> {
    let receiver = state
        .sync
        .spawn_sync()
        .ok_or_else(|| InfraError::InvalidInput("a sync is already running".to_string()))?;
    let report = receiver
        .await
        .map_err(|_| InfraError::Http("sync task ended without a report".to_string()))?;
    state.log_info(
        "sync",
        &format!(
            "success={} upload={:?} download={:?}",
            report.is_success(),
            report.upload,
            report.download
        ),
    );
    Ok(report)
}

pub async fn upload_impl(state: &AppState) -> Result<SyncCounts, InfraError> {
    ensure_sync_idle(state)?;
    let counts = state.sync.reconciler().upload_all().await;
    state.log_info("upload", &format!("{counts:?}"));
    Ok(counts)
}

pub async fn download_impl(state: &AppState) -> Result<SyncCounts, InfraError> {
    ensure_sync_idle(state)?;
    let counts = state.sync.reconciler().download_all().await;
    state.log_info("download", &format!("{counts:?}"));
    Ok(counts)
}

pub async fn test_connection_impl(state: &AppState) -> Result<bool, InfraError> {
    state.sync.reconciler().test_connection().await
}

fn ensure_sync_idle(state: &AppState) -> Result<(), InfraError> {
    if state.sync.is_running() {
        return Err(InfraError::InvalidInput("a sync is already running".to_string()));
    }
    Ok(())
}
