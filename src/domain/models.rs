use crate::domain::timestamp;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const PLANNING_NAME: &str = "Planning";
pub const WORK_BLOCK_COUNT: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "times_queued")]
    pub times_requeued: u32,
}

impl Task {
    pub fn new(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            completed: false,
            created_at,
            completed_at: None,
            times_requeued: 0,
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(now);
    }

    pub fn reopen(&mut self) {
        self.completed = false;
        self.completed_at = None;
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.text, "task.text")?;
        if self.completed_at.is_some() && !self.completed {
            return Err("task.completed_at requires task.completed".to_string());
        }
        if let Some(completed_at) = self.completed_at {
            if completed_at < self.created_at {
                return Err("task.completed_at must be >= task.created_at".to_string());
            }
        }
        Ok(())
    }
}

/// A named block of tasks. The planning container and the eight work blocks
/// share this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskContainer {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub block_completed: bool,
}

impl TaskContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            block_completed: false,
        }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.block_completed = false;
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "block.name")?;
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTarget {
    Planning,
    /// Zero-based work block index.
    Block(usize),
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskBoard {
    pub planning: TaskContainer,
    #[serde(default)]
    pub blocks: Vec<TaskContainer>,
    #[serde(default)]
    pub queue: Vec<Task>,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self {
            planning: TaskContainer::new(PLANNING_NAME),
            blocks: (1..=WORK_BLOCK_COUNT)
                .map(|number| TaskContainer::new(format!("Block {number}")))
                .collect(),
            queue: Vec::new(),
        }
    }
}

impl TaskBoard {
    /// Planning first, then the work blocks in order.
    pub fn containers(&self) -> impl Iterator<Item = &TaskContainer> {
        std::iter::once(&self.planning).chain(self.blocks.iter())
    }

    pub fn containers_mut(&mut self) -> impl Iterator<Item = &mut TaskContainer> {
        std::iter::once(&mut self.planning).chain(self.blocks.iter_mut())
    }

    pub fn tasks(&self, target: TaskTarget) -> Option<&Vec<Task>> {
        match target {
            TaskTarget::Planning => Some(&self.planning.tasks),
            TaskTarget::Block(index) => self.blocks.get(index).map(|block| &block.tasks),
            TaskTarget::Queue => Some(&self.queue),
        }
    }

    pub fn tasks_mut(&mut self, target: TaskTarget) -> Option<&mut Vec<Task>> {
        match target {
            TaskTarget::Planning => Some(&mut self.planning.tasks),
            TaskTarget::Block(index) => self.blocks.get_mut(index).map(|block| &mut block.tasks),
            TaskTarget::Queue => Some(&mut self.queue),
        }
    }

    pub fn task_count(&self) -> usize {
        self.containers().map(|container| container.tasks.len()).sum::<usize>() + self.queue.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        for container in self.containers() {
            container.validate()?;
        }
        for task in &self.queue {
            task.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionRecord {
    pub task: String,
    pub block: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(alias = "times_queued")]
    pub times_requeued: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequeueRecord {
    pub task: String,
    pub original_block: String,
    pub queued_count: u32,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStat {
    pub date: String,
    pub completed: u32,
    pub total: u32,
    pub completion_rate: f64,
}

impl DailyStat {
    pub fn new(date: NaiveDate, completed: u32, total: u32) -> Self {
        let completion_rate = if total == 0 {
            0.0
        } else {
            (f64::from(completed) / f64::from(total) * 1000.0).round() / 10.0
        };
        Self {
            date: date.format("%Y-%m-%d").to_string(),
            completed,
            total,
            completion_rate,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.date, "daily_stat.date")?;
        if self.completed > self.total {
            return Err("daily_stat.completed must be <= daily_stat.total".to_string());
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
