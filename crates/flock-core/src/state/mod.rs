mod entry;
pub(crate) use entry::{ProcessHandle, TaskEntry};

use std::{collections::HashMap, time::SystemTime};

use flock_model::{TaskCounts, TaskId, TaskPage, TaskQuery, TaskSnapshot, TaskStatus};

/// In-memory task registry.
///
/// Iteration follows insertion order, which is also admission order.
/// Entries leave only through [`TaskRegistry::prune_finished`].
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    /// Tasks indexed by TaskId.
    tasks: HashMap<TaskId, TaskEntry>,
    /// Submission order.
    order: Vec<TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: TaskEntry) {
        let id = entry.id.clone();
        if self.tasks.insert(id.clone(), entry).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskEntry> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskEntry> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Oldest task still waiting for admission.
    pub fn first_pending(&self) -> Option<TaskId> {
        self.iter()
            .find(|e| e.status == TaskStatus::Pending)
            .map(|e| e.id.clone())
    }

    pub fn running_count(&self) -> usize {
        self.iter()
            .filter(|e| e.status == TaskStatus::Running)
            .count()
    }

    /// Ids of Pending and Running tasks, oldest first.
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.iter()
            .filter(|e| e.status.is_active())
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.iter().map(TaskEntry::snapshot).collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for e in self.iter() {
            counts.record(e.status);
        }
        counts
    }

    /// Query tasks with combined filters and pagination.
    ///
    /// `total` in the result reflects the count *after* filtering, *before* pagination.
    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskSnapshot> {
        let filtered: Vec<&TaskEntry> = self
            .iter()
            .filter(|e| q.script.as_deref().is_none_or(|s| e.script == s))
            .filter(|e| q.status.is_none_or(|s| e.status == s))
            .collect();
        let total = filtered.len();

        let items = filtered
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .map(TaskEntry::snapshot)
            .collect();

        TaskPage { items, total }
    }

    /// Remove terminal tasks that ended at or before `cutoff`.
    pub fn prune_finished(&mut self, cutoff: SystemTime) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, e| {
            !(e.status.is_terminal() && e.ended_at.is_some_and(|t| t <= cutoff))
        });
        let tasks = &self.tasks;
        self.order.retain(|id| tasks.contains_key(id));
        before - self.tasks.len()
    }
}
