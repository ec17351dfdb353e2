//! Thread-local view of "which worker am I, and which task am I running".

use std::cell::Cell;

use crate::types::TaskId;

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Id of the task executing on this thread. `None` outside of worker threads
/// or between tasks.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK.with(|c| c.get())
}

/// Index of the scheduler worker this thread belongs to.
pub fn current_worker_index() -> Option<usize> {
    CURRENT_WORKER.with(|c| c.get())
}

pub fn is_worker_thread() -> bool {
    current_worker_index().is_some()
}

pub(crate) fn set_worker_index(index: Option<usize>) {
    CURRENT_WORKER.with(|c| c.set(index));
}

/// Marks a task as current for the lifetime of the guard, unwinding included.
pub(crate) struct TaskScope {
    previous: Option<TaskId>,
}

impl TaskScope {
    pub(crate) fn enter(id: TaskId) -> Self {
        let previous = CURRENT_TASK.with(|c| c.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        CURRENT_TASK.with(|c| c.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_sets_and_restores() {
        assert_eq!(current_task_id(), None);
        let id = TaskId::next();
        {
            let _scope = TaskScope::enter(id);
            assert_eq!(current_task_id(), Some(id));
        }
        assert_eq!(current_task_id(), None);
    }

    #[test]
    fn scope_restores_on_unwind() {
        let id = TaskId::next();
        let result = std::panic::catch_unwind(|| {
            let _scope = TaskScope::enter(id);
            panic!("inside task");
        });
        assert!(result.is_err());
        assert_eq!(current_task_id(), None);
    }

    #[test]
    fn plain_threads_are_not_workers() {
        assert!(!is_worker_thread());
        set_worker_index(Some(2));
        assert_eq!(current_worker_index(), Some(2));
        set_worker_index(None);
        assert!(!is_worker_thread());
    }
}
