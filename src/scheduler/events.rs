//! Scheduler state changes broadcast to listeners

use crate::indexer::{IndexerProgress, TaskId};

/// Events emitted by the indexer scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A task was queued behind `position` others
    TaskQueued { task: TaskId, files: usize, position: usize },
    /// An urgent task was taken over by the running task
    TaskAbsorbed { task: TaskId, into: TaskId },
    TaskStarted { task: TaskId, files: usize },
    TaskCompleted { task: TaskId, progress: IndexerProgress },
    TaskCancelled { task: TaskId },
    TaskFailed { task: TaskId, error: String },
    /// The queue drained
    Idle,
}

impl SchedulerEvent {
    pub fn task(&self) -> Option<TaskId> {
        match self {
            SchedulerEvent::TaskQueued { task, .. }
            | SchedulerEvent::TaskAbsorbed { task, .. }
            | SchedulerEvent::TaskStarted { task, .. }
            | SchedulerEvent::TaskCompleted { task, .. }
            | SchedulerEvent::TaskCancelled { task }
            | SchedulerEvent::TaskFailed { task, .. } => Some(*task),
            SchedulerEvent::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_task() {
        let id = TaskId::new();
        let event = SchedulerEvent::TaskCancelled { task: id };
        assert_eq!(event.task(), Some(id));
        assert_eq!(SchedulerEvent::Idle.task(), None);
    }
}
