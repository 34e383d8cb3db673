//! Completed-state-wins merge of two copies of the task board.
//!
//! The cloud copy supplies order and membership. A task is identified by its
//! text; when both sides hold it, completion is OR-ed. Tasks only the local
//! side knows about are appended so nothing is dropped.

use crate::domain::models::{Task, TaskBoard, TaskContainer};
use std::collections::{HashMap, HashSet};

pub fn merge_task_list(local: &[Task], cloud: &[Task]) -> Vec<Task> {
    let mut local_by_text: HashMap<&str, &Task> = HashMap::new();
    for task in local.iter().filter(|task| task.has_text()) {
        local_by_text
            .entry(task.text.as_str())
            .and_modify(|existing| {
                if task.completed && !existing.completed {
                    *existing = task;
                }
            })
            .or_insert(task);
    }

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(cloud.len().max(local.len()));
    for task in cloud {
        seen.insert(task.text.as_str());
        let mut entry = task.clone();
        if let Some(local_task) = local_by_text.get(task.text.as_str()) {
            if local_task.completed && !entry.completed {
                entry.completed = true;
                entry.completed_at = local_task.completed_at;
            }
        }
        merged.push(entry);
    }

    for task in local {
        if task.has_text() && !seen.contains(task.text.as_str()) {
            tracing::debug!(text = %preview(&task.text), "preserved local-only task");
            merged.push(task.clone());
        }
    }
    merged
}

/// Merges every container pair: planning, blocks by position, and the queue.
/// Local blocks past the cloud's block count are carried over whole.
pub fn merge_boards(local: &TaskBoard, cloud: TaskBoard) -> TaskBoard {
    let mut merged = cloud;
    let mut cloud_lens = Vec::with_capacity(merged.blocks.len().max(local.blocks.len()) + 2);

    cloud_lens.push(merged.planning.tasks.len());
    merged.planning.tasks = merge_task_list(&local.planning.tasks, &merged.planning.tasks);
    merged.planning.block_completed |= local.planning.block_completed;

    for (index, block) in merged.blocks.iter_mut().enumerate() {
        cloud_lens.push(block.tasks.len());
        let local_block = local.blocks.get(index);
        let local_tasks = local_block.map(|candidate| candidate.tasks.as_slice()).unwrap_or(&[]);
        block.tasks = merge_task_list(local_tasks, &block.tasks);
        block.block_completed |= local_block.is_some_and(|candidate| candidate.block_completed);
    }

    let cloud_block_count = merged.blocks.len();
    for extra in local.blocks.iter().skip(cloud_block_count) {
        cloud_lens.push(0);
        merged.blocks.push(TaskContainer {
            name: extra.name.clone(),
            tasks: merge_task_list(&extra.tasks, &[]),
            block_completed: extra.block_completed,
        });
    }

    cloud_lens.push(merged.queue.len());
    merged.queue = merge_task_list(&local.queue, &merged.queue);

    fold_duplicate_identities(&mut merged, &cloud_lens);
    merged
}

/// Parses both task documents, merges them and renders the result. Any
/// structural problem is returned so the caller can fall back to the cloud copy.
pub fn merge_task_documents(local_json: &str, cloud_json: &str) -> Result<String, serde_json::Error> {
    let local: TaskBoard = serde_json::from_str(local_json)?;
    let cloud: TaskBoard = serde_json::from_str(cloud_json)?;
    let merged = merge_boards(&local, cloud);
    serde_json::to_string_pretty(&merged)
}

/// A task moved between containers on one machine shows up twice after the
/// per-container pass: once where the cloud has it, once appended where the
/// local copy has it. Keep the cloud placement and carry completion over.
fn fold_duplicate_identities(board: &mut TaskBoard, cloud_lens: &[usize]) {
    let mut sequences: Vec<&mut Vec<Task>> = std::iter::once(&mut board.planning.tasks)
        .chain(board.blocks.iter_mut().map(|block| &mut block.tasks))
        .chain(std::iter::once(&mut board.queue))
        .collect();

    let mut placed: HashMap<String, (usize, usize)> = HashMap::new();
    for (sequence_index, sequence) in sequences.iter().enumerate() {
        let cloud_len = cloud_lens.get(sequence_index).copied().unwrap_or(0);
        for (position, task) in sequence.iter().take(cloud_len).enumerate() {
            if task.has_text() {
                placed
                    .entry(task.text.clone())
                    .or_insert((sequence_index, position));
            }
        }
    }

    for sequence_index in 0..sequences.len() {
        let cloud_len = cloud_lens
            .get(sequence_index)
            .copied()
            .unwrap_or(0)
            .min(sequences[sequence_index].len());
        let appended = sequences[sequence_index].split_off(cloud_len);
        for task in appended {
            match placed.get(&task.text).copied() {
                Some((target_sequence, target_position)) => {
                    let target = &mut sequences[target_sequence][target_position];
                    if task.completed && !target.completed {
                        target.completed = true;
                        target.completed_at = task.completed_at;
                    }
                    tracing::debug!(
                        text = %preview(&task.text),
                        "dropped duplicate of task already placed elsewhere"
                    );
                }
                None => {
                    placed.insert(
                        task.text.clone(),
                        (sequence_index, sequences[sequence_index].len()),
                    );
                    sequences[sequence_index].push(task);
                }
            }
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn open_task(text: &str) -> Task {
        Task::new(text, fixed_time("2026-02-16T08:00:00Z"))
    }

    fn done_task(text: &str, at: &str) -> Task {
        let mut task = open_task(text);
        task.complete(fixed_time(at));
        task
    }

    #[test]
    fn local_completion_wins_and_cloud_only_tasks_survive() {
        let local = vec![done_task("Buy milk", "2026-02-16T10:00:00Z")];
        let cloud = vec![open_task("Buy milk"), open_task("Call Bob")];

        let merged = merge_task_list(&local, &cloud);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "Buy milk");
        assert!(merged[0].completed);
        assert_eq!(
            merged[0].completed_at,
            Some(fixed_time("2026-02-16T10:00:00Z"))
        );
        assert_eq!(merged[1].text, "Call Bob");
        assert!(!merged[1].completed);
    }

    #[test]
    fn local_only_task_is_appended_after_cloud_tasks() {
        let local = vec![open_task("Draft memo")];
        let cloud = vec![open_task("Call Bob"), open_task("Buy milk")];

        let merged = merge_task_list(&local, &cloud);

        let texts = merged.iter().map(|task| task.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["Call Bob", "Buy milk", "Draft memo"]);
    }

    #[test]
    fn cloud_completion_is_kept_when_local_is_open() {
        let local = vec![open_task("Review PR")];
        let cloud = vec![done_task("Review PR", "2026-02-16T11:00:00Z")];

        let merged = merge_task_list(&local, &cloud);
        assert!(merged[0].completed);
        assert_eq!(
            merged[0].completed_at,
            Some(fixed_time("2026-02-16T11:00:00Z"))
        );
    }

    #[test]
    fn blank_local_tasks_are_not_carried() {
        let local = vec![open_task("   ")];
        let merged = merge_task_list(&local, &[]);
        assert!(merged.is_empty());
    }

    #[test]
    fn extra_local_blocks_are_kept_as_local_only() {
        let mut local = TaskBoard::default();
        local.blocks.push(TaskContainer::new("Block 9"));
        local.blocks[8].tasks.push(open_task("Late extra"));

        let cloud = TaskBoard::default();
        let merged = merge_boards(&local, cloud);

        assert_eq!(merged.blocks.len(), 9);
        assert_eq!(merged.blocks[8].name, "Block 9");
        assert_eq!(merged.blocks[8].tasks[0].text, "Late extra");
    }

    #[test]
    fn blocks_merge_by_position_and_queue_merges_too() {
        let mut local = TaskBoard::default();
        local.blocks[2]
            .tasks
            .push(done_task("Ship release", "2026-02-16T12:00:00Z"));
        local.queue.push(open_task("Someday"));

        let mut cloud = TaskBoard::default();
        cloud.blocks[2].tasks.push(open_task("Ship release"));
        cloud.queue.push(open_task("Backlog item"));

        let merged = merge_boards(&local, cloud);

        assert!(merged.blocks[2].tasks[0].completed);
        let queue = merged.queue.iter().map(|task| task.text.as_str()).collect::<Vec<_>>();
        assert_eq!(queue, vec!["Backlog item", "Someday"]);
    }

    #[test]
    fn task_moved_locally_is_not_duplicated_and_keeps_completion() {
        let mut local = TaskBoard::default();
        local.blocks[1]
            .tasks
            .push(done_task("Moved task", "2026-02-16T13:00:00Z"));

        let mut cloud = TaskBoard::default();
        cloud.blocks[0].tasks.push(open_task("Moved task"));

        let merged = merge_boards(&local, cloud);

        assert_eq!(merged.task_count(), 1);
        assert_eq!(merged.blocks[0].tasks[0].text, "Moved task");
        assert!(merged.blocks[0].tasks[0].completed);
        assert!(merged.blocks[1].tasks.is_empty());
    }

    #[test]
    fn block_completion_flag_is_monotonic() {
        let mut local = TaskBoard::default();
        local.blocks[4].block_completed = true;
        let merged = merge_boards(&local, TaskBoard::default());
        assert!(merged.blocks[4].block_completed);
    }

    #[test]
    fn documents_merge_or_report_structural_errors() {
        let mut local = TaskBoard::default();
        local
            .planning
            .tasks
            .push(done_task("Plan day", "2026-02-16T08:30:00Z"));
        let mut cloud = TaskBoard::default();
        cloud.planning.tasks.push(open_task("Plan day"));

        let local_json = serde_json::to_string(&local).expect("serialize local");
        let cloud_json = serde_json::to_string(&cloud).expect("serialize cloud");
        let merged_json = merge_task_documents(&local_json, &cloud_json).expect("merge documents");
        let merged: TaskBoard = serde_json::from_str(&merged_json).expect("parse merged");
        assert!(merged.planning.tasks[0].completed);

        assert!(merge_task_documents(&local_json, "{not json").is_err());
        assert!(merge_task_documents(&local_json, r#"{"blocks": []}"#).is_err());
    }

    #[test]
    fn documents_with_zone_less_timestamps_merge() {
        let local = r#"{
            "planning": {"name": "Planning", "tasks": []},
            "blocks": [{"name": "Block 1", "tasks": [
                {"text": "Buy milk", "completed": true,
                 "created_at": "2026-02-16T08:00:00.123456",
                 "completed_at": "2026-02-16T10:00:00.000001", "times_queued": 0},
                {"text": "Draft memo", "completed": false,
                 "created_at": "2026-02-16T08:01:00.5", "completed_at": null, "times_queued": 0}
            ]}],
            "queue": []
        }"#;
        let cloud = r#"{
            "planning": {"name": "Planning", "tasks": []},
            "blocks": [{"name": "Block 1", "tasks": [
                {"text": "Buy milk", "completed": false,
                 "created_at": "2026-02-16T08:00:00.123456", "completed_at": null, "times_queued": 0},
                {"text": "Call Bob", "completed": false,
                 "created_at": "2026-02-16T09:00:00", "completed_at": null, "times_queued": 2}
            ]}],
            "queue": []
        }"#;

        let merged_json = merge_task_documents(local, cloud).expect("merge legacy documents");
        let merged: TaskBoard = serde_json::from_str(&merged_json).expect("parse merged");
        let block = &merged.blocks[0].tasks;
        let texts = block
            .iter()
            .map(|task| (task.text.as_str(), task.completed))
            .collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![("Buy milk", true), ("Call Bob", false), ("Draft memo", false)]
        );
        assert!(block[0].completed_at.is_some());
        assert_eq!(block[1].times_requeued, 2);
    }

    fn task_strategy(texts: Vec<String>) -> impl Strategy<Value = Vec<Task>> {
        let count = texts.len();
        prop::collection::vec((any::<bool>(), 0i64..600i64), count).prop_map(move |flags| {
            let base = DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc);
            texts
                .iter()
                .zip(flags)
                .map(|(text, (completed, offset))| {
                    let mut task = Task::new(text.clone(), base);
                    if completed {
                        task.complete(base + Duration::minutes(offset));
                    }
                    task
                })
                .collect()
        })
    }

    fn unique_texts() -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set("[a-e]{1,3}", 0..8).prop_map(|set| set.into_iter().collect())
    }

    fn sides() -> impl Strategy<Value = (Vec<Task>, Vec<Task>)> {
        (unique_texts(), unique_texts())
            .prop_flat_map(|(local_texts, cloud_texts)| {
                (task_strategy(local_texts), task_strategy(cloud_texts))
            })
    }

    proptest! {
        #[test]
        fn merging_a_list_with_itself_is_identity(tasks in unique_texts().prop_flat_map(task_strategy)) {
            let merged = merge_task_list(&tasks, &tasks);
            prop_assert_eq!(merged, tasks);
        }

        #[test]
        fn completion_is_or_of_both_sides((local, cloud) in sides()) {
            let merged = merge_task_list(&local, &cloud);
            for cloud_task in &cloud {
                if let Some(local_task) = local.iter().find(|task| task.text == cloud_task.text) {
                    let result = merged
                        .iter()
                        .find(|task| task.text == cloud_task.text)
                        .expect("shared task present in merge");
                    prop_assert_eq!(result.completed, local_task.completed || cloud_task.completed);
                }
            }
        }

        #[test]
        fn merge_never_loses_tasks((local, cloud) in sides()) {
            let merged = merge_task_list(&local, &cloud);
            prop_assert!(merged.len() >= local.len().max(cloud.len()));
            let all_local_in_cloud = local
                .iter()
                .all(|task| cloud.iter().any(|candidate| candidate.text == task.text));
            prop_assert_eq!(merged.len() == cloud.len(), all_local_in_cloud);
            prop_assert_eq!(&merged[..cloud.len()].iter().map(|t| t.text.clone()).collect::<Vec<_>>(),
                &cloud.iter().map(|t| t.text.clone()).collect::<Vec<_>>());
        }
    }
}
