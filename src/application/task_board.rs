use crate::application::phase_timer::NowProvider;
use crate::domain::models::{CompletionRecord, DailyStat, RequeueRecord, Task, TaskBoard, TaskTarget};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{DataStore, TimerStateStore};
use chrono::{Local, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NewDaySummary {
    pub completed: u32,
    pub total: u32,
    pub moved_to_queue: u32,
}

/// Edits to `tasks.json`. Every operation reads the current file, applies one
/// change and writes it back atomically.
pub struct TaskBoardService {
    store: DataStore,
    now_provider: NowProvider,
}

impl TaskBoardService {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn load_board(&self) -> TaskBoard {
        self.store.load_tasks_or_default()
    }

    pub fn add_task(&self, target: TaskTarget, text: &str) -> Result<TaskBoard, InfraError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InfraError::InvalidInput("task text must not be empty".to_string()));
        }
        let now = (self.now_provider)();
        self.update(|board| {
            tasks_mut(board, target)?.push(Task::new(text, now));
            Ok(())
        })
    }

    pub fn set_task_completed(
        &self,
        target: TaskTarget,
        index: usize,
        completed: bool,
    ) -> Result<TaskBoard, InfraError> {
        let now = (self.now_provider)();
        self.update(|board| {
            let task = task_mut(board, target, index)?;
            if completed {
                if !task.completed {
                    task.complete(now);
                }
            } else {
                task.reopen();
            }
            Ok(())
        })
    }

    pub fn remove_task(&self, target: TaskTarget, index: usize) -> Result<TaskBoard, InfraError> {
        self.update(|board| {
            let tasks = tasks_mut(board, target)?;
            if index >= tasks.len() {
                return Err(missing_task(target, index));
            }
            tasks.remove(index);
            Ok(())
        })
    }

    pub fn set_block_completed(&self, block: usize, completed: bool) -> Result<TaskBoard, InfraError> {
        self.update(|board| {
            let container = board
                .blocks
                .get_mut(block)
                .ok_or_else(|| InfraError::InvalidInput(format!("no block at index {block}")))?;
            container.block_completed = completed;
            Ok(())
        })
    }

    pub fn move_from_queue(&self, queue_index: usize, block: usize) -> Result<TaskBoard, InfraError> {
        self.update(|board| {
            if block >= board.blocks.len() {
                return Err(InfraError::InvalidInput(format!("no block at index {block}")));
            }
            if queue_index >= board.queue.len() {
                return Err(missing_task(TaskTarget::Queue, queue_index));
            }
            let task = board.queue.remove(queue_index);
            board.blocks[block].tasks.push(task);
            Ok(())
        })
    }

    /// Closes out the day: finished tasks go to the completion log, the rest
    /// are requeued, every container is emptied, and the timer starts over at
    /// planning next time it loads.
    pub fn start_new_day(&self) -> Result<NewDaySummary, InfraError> {
        let now = (self.now_provider)();
        let mut board = self.load_board();
        let mut completed_records = Vec::new();
        let mut requeue_records = Vec::new();
        let mut requeued = Vec::new();
        let mut summary = NewDaySummary {
            completed: 0,
            total: 0,
            moved_to_queue: 0,
        };

        for container in board.containers_mut() {
            for mut task in container.tasks.drain(..) {
                if !task.has_text() {
                    continue;
                }
                summary.total += 1;
                if task.completed {
                    summary.completed += 1;
                    completed_records.push(CompletionRecord {
                        task: task.text.clone(),
                        block: container.name.clone(),
                        completed_at: task.completed_at,
                        times_requeued: task.times_requeued,
                    });
                } else {
                    task.times_requeued += 1;
                    requeue_records.push(RequeueRecord {
                        task: task.text.clone(),
                        original_block: container.name.clone(),
                        queued_count: task.times_requeued,
                        queued_at: now,
                    });
                    requeued.push(task);
                }
            }
            container.clear();
        }
        summary.moved_to_queue = u32::try_from(requeued.len()).unwrap_or(u32::MAX);
        board.queue.extend(requeued);

        self.store.append_completed(&completed_records)?;
        self.store.append_requeued(&requeue_records)?;
        if summary.total > 0 {
            let date = now.with_timezone(&Local).date_naive();
            self.store
                .append_daily_stat(DailyStat::new(date, summary.completed, summary.total))?;
        }
        self.store.save_tasks(&board)?;
        TimerStateStore::clear(&self.store)?;

        tracing::info!(
            completed = summary.completed,
            total = summary.total,
            moved_to_queue = summary.moved_to_queue,
            "new day started"
        );
        Ok(summary)
    }

    fn update<F>(&self, change: F) -> Result<TaskBoard, InfraError>
    where
        F: FnOnce(&mut TaskBoard) -> Result<(), InfraError>,
    {
        let mut board = self.load_board();
        change(&mut board)?;
        self.store.save_tasks(&board)?;
        Ok(board)
    }
}

fn tasks_mut(board: &mut TaskBoard, target: TaskTarget) -> Result<&mut Vec<Task>, InfraError> {
    board
        .tasks_mut(target)
        .ok_or_else(|| InfraError::InvalidInput(format!("no such task list: {target:?}")))
}

fn task_mut(board: &mut TaskBoard, target: TaskTarget, index: usize) -> Result<&mut Task, InfraError> {
    tasks_mut(board, target)?
        .get_mut(index)
        .ok_or_else(|| missing_task(target, index))
}

fn missing_task(target: TaskTarget, index: usize) -> InfraError {
    InfraError::InvalidInput(format!("no task at index {index} in {target:?}"))
}
