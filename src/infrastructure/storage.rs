use crate::domain::models::{CompletionRecord, DailyStat, RequeueRecord, TaskBoard};
use crate::domain::schedule::TimerState;
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const DATASETS_DIR: &str = "datasets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFile {
    Config,
    Tasks,
    TimerState,
    CompletedLog,
    IncompleteHistory,
    DailyStats,
}

impl DataFile {
    /// Transfer order: anything a later file refers to goes first.
    pub const SYNC_ORDER: [DataFile; 6] = [
        DataFile::Config,
        DataFile::Tasks,
        DataFile::TimerState,
        DataFile::CompletedLog,
        DataFile::IncompleteHistory,
        DataFile::DailyStats,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config.json",
            Self::Tasks => "tasks.json",
            Self::TimerState => "timer_state.json",
            Self::CompletedLog => "completed_log.json",
            Self::IncompleteHistory => "incomplete_history.json",
            Self::DailyStats => "daily_stats.json",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::SYNC_ORDER
            .into_iter()
            .find(|candidate| candidate.file_name() == name)
    }
}

/// Where each document lives. `config.json` always sits in the workspace
/// root; the rest go in the active dataset's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
    dataset_dir: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl AsRef<Path>, dataset: &str) -> Self {
        let root = root.as_ref().to_path_buf();
        let dataset = dataset.trim();
        let dataset_dir = if dataset.is_empty() || dataset == crate::infrastructure::config::DEFAULT_DATASET {
            root.clone()
        } else {
            root.join(DATASETS_DIR).join(dataset)
        };
        Self { root, dataset_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn path(&self, file: DataFile) -> PathBuf {
        match file {
            DataFile::Config => self.root.join(file.file_name()),
            _ => self.dataset_dir.join(file.file_name()),
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), InfraError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.dataset_dir)?;
        Ok(())
    }
}

/// Writes a uniquely named sibling and renames it over the target, so readers
/// never see a half-written document and concurrent writers never share a
/// temp file. The last rename wins.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<(), InfraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let prefix = format!(
        ".{}.",
        path.file_name().and_then(|name| name.to_str()).unwrap_or("data")
    );
    let mut staged = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)?;
    staged.write_all(content.as_bytes())?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    write_text_atomic(path, &format!("{formatted}\n"))
}

/// `Ok(None)` when the file does not exist; an error when it exists but does
/// not parse.
pub fn read_optional_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InfraError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn read_optional_text(path: &Path) -> Result<Option<String>, InfraError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

pub trait TimerStateStore: Send + Sync {
    fn load(&self) -> Result<Option<TimerState>, InfraError>;
    fn save(&self, state: &TimerState) -> Result<(), InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct DataStore {
    paths: DataPaths,
}

impl DataStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn load_tasks(&self) -> Result<Option<TaskBoard>, InfraError> {
        read_optional_json(&self.paths.path(DataFile::Tasks))
    }

    /// Missing file gives the empty default board; a malformed one is logged
    /// and replaced by the default too.
    pub fn load_tasks_or_default(&self) -> TaskBoard {
        match self.load_tasks() {
            Ok(Some(board)) => board,
            Ok(None) => TaskBoard::default(),
            Err(error) => {
                tracing::warn!(%error, "tasks.json unusable, starting from an empty board");
                TaskBoard::default()
            }
        }
    }

    pub fn save_tasks(&self, board: &TaskBoard) -> Result<(), InfraError> {
        write_json_atomic(&self.paths.path(DataFile::Tasks), board)
    }

    pub fn load_completed_log(&self) -> Result<Vec<CompletionRecord>, InfraError> {
        Ok(read_optional_json(&self.paths.path(DataFile::CompletedLog))?.unwrap_or_default())
    }

    pub fn load_incomplete_history(&self) -> Result<Vec<RequeueRecord>, InfraError> {
        Ok(read_optional_json(&self.paths.path(DataFile::IncompleteHistory))?.unwrap_or_default())
    }

    pub fn load_daily_stats(&self) -> Result<Vec<DailyStat>, InfraError> {
        Ok(read_optional_json(&self.paths.path(DataFile::DailyStats))?.unwrap_or_default())
    }

    pub fn append_completed(&self, records: &[CompletionRecord]) -> Result<(), InfraError> {
        append_records(&self.paths.path(DataFile::CompletedLog), records)
    }

    pub fn append_requeued(&self, records: &[RequeueRecord]) -> Result<(), InfraError> {
        append_records(&self.paths.path(DataFile::IncompleteHistory), records)
    }

    pub fn append_daily_stat(&self, stat: DailyStat) -> Result<(), InfraError> {
        append_records(&self.paths.path(DataFile::DailyStats), &[stat])
    }

    pub fn read_raw(&self, file: DataFile) -> Result<Option<String>, InfraError> {
        read_optional_text(&self.paths.path(file))
    }

    pub fn write_raw(&self, file: DataFile, content: &str) -> Result<(), InfraError> {
        write_text_atomic(&self.paths.path(file), content)
    }
}

impl TimerStateStore for DataStore {
    fn load(&self) -> Result<Option<TimerState>, InfraError> {
        read_optional_json(&self.paths.path(DataFile::TimerState))
    }

    fn save(&self, state: &TimerState) -> Result<(), InfraError> {
        write_json_atomic(&self.paths.path(DataFile::TimerState), state)
    }

    fn clear(&self) -> Result<(), InfraError> {
        match fs::remove_file(self.paths.path(DataFile::TimerState)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

fn append_records<T>(path: &Path, records: &[T]) -> Result<(), InfraError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    if records.is_empty() {
        return Ok(());
    }
    let mut existing: Vec<T> = match read_optional_json(path) {
        Ok(existing) => existing.unwrap_or_default(),
        Err(InfraError::Json(error)) => {
            let backup = path.with_extension("json.bak");
            tracing::warn!(
                %error,
                backup = %backup.display(),
                "log file unreadable, moving it aside and starting a new one"
            );
            fs::rename(path, &backup)?;
            Vec::new()
        }
        Err(error) => return Err(error),
    };
    existing.extend_from_slice(records);
    write_json_atomic(path, &existing)
}

#[derive(Debug, Default)]
pub struct InMemoryTimerStateStore {
    state: Mutex<Option<TimerState>>,
    saves: AtomicUsize,
}

impl InMemoryTimerStateStore {
    pub fn with_state(state: TimerState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl TimerStateStore for InMemoryTimerStateStore {
    fn load(&self) -> Result<Option<TimerState>, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        Ok(state.clone())
    }

    fn save(&self, state: &TimerState) -> Result<(), InfraError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        *guard = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer state lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
