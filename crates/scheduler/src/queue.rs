//! Sorted priority queue used for both the waiting and the pending task sets.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::task::ScheduledTask;

/// Min-ordered priority queue: the smallest element is the most urgent.
///
/// Backed by a `Vec` kept sorted in descending order, so the head lives at the
/// end and `pop` is O(1). Insertion is a binary search plus a shift, which is
/// fine for the handful of in-flight tasks a scheduler holds. Arbitrary lookups
/// (`position`, `remove_first`) are linear scans.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: Vec<T>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Ord> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        // Equal elements go below existing ones, so the earlier push pops first.
        let index = self.items.partition_point(|probe| probe > &item);
        self.items.insert(index, item);
    }

    /// Most urgent element.
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the first element (in urgency order) matching `pred`.
    pub fn position<P>(&self, mut pred: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.items.iter().rposition(|item| pred(item))
    }

    /// Remove the element at an index returned by [`position`](Self::position).
    pub fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    pub fn remove_first<P>(&mut self, pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        self.position(pred).map(|index| self.remove(index))
    }

    /// Iterate from most to least urgent.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Remove everything, most urgent first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..).rev()
    }
}

/// A task record parked in a queue together with the instant it becomes due.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub due: Instant,
    pub task: Arc<ScheduledTask>,
}

impl QueuedTask {
    pub fn new(due: Instant, task: Arc<ScheduledTask>) -> Self {
        Self { due, task }
    }

    fn by_priority(&self, other: &Self) -> Ordering {
        self.task
            .priority()
            .cmp(&other.task.priority())
            .then_with(|| self.due.cmp(&other.due))
            .then_with(|| self.task.id().cmp(&other.task.id()))
    }

    fn by_due(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.task.priority().cmp(&other.task.priority()))
            .then_with(|| self.task.id().cmp(&other.task.id()))
    }
}

/// Pending-queue slot: priority, then due time, then submission order.
#[derive(Debug, Clone)]
pub struct Ready(pub QueuedTask);

/// Waiting-queue slot: due time first, so the head is always the next task to promote.
#[derive(Debug, Clone)]
pub struct Waiting(pub QueuedTask);

macro_rules! slot_ordering {
    ($slot:ident, $cmp:ident) => {
        impl PartialEq for $slot {
            fn eq(&self, other: &Self) -> bool {
                self.cmp(other) == Ordering::Equal
            }
        }

        impl Eq for $slot {}

        impl PartialOrd for $slot {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $slot {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.$cmp(&other.0)
            }
        }
    };
}

slot_ordering!(Ready, by_priority);
slot_ordering!(Waiting, by_due);
