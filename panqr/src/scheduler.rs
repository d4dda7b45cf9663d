//! The dependency-driven worker pool.
//!
//! Workers share two queues. `ready` holds tasks whose dependencies are
//! satisfied, either FIFO or ordered by [`Task::priority`]. `wait` holds
//! tasks whose left-neighbor flag was not yet set when they were produced;
//! each worker re-examines at most one waiting task per iteration, between
//! useful pops of the ready queue, so an unready task never busy-blocks the
//! pool. Workers spin rather than park, and every worker exits once the
//! final panel's factor flag is observed.

use crate::graph::{DependencyTable, Task, TaskKind, TaskTable};
use crate::QueueKind;
use crossbeam_queue::ArrayQueue;
use panqr_core::householder::{apply_reflectors, factor_panel, ReflectorsPtr};
use panqr_core::MatPtr;
use parking_lot::Mutex;
use std::collections::BinaryHeap;

/// Max-heap ordering for priority mode: higher weight first, then smaller
/// column.
struct Prioritized<'a>(&'a Task);

impl PartialEq for Prioritized<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.j == other.0.j
    }
}
impl Eq for Prioritized<'_> {}

impl PartialOrd for Prioritized<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prioritized<'_> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.j.cmp(&self.0.j))
    }
}

enum ReadyQueue<'a> {
    Fifo(ArrayQueue<&'a Task>),
    Priority(Mutex<BinaryHeap<Prioritized<'a>>>),
}

impl<'a> ReadyQueue<'a> {
    fn new(kind: QueueKind, capacity: usize) -> Self {
        match kind {
            QueueKind::Fifo => Self::Fifo(ArrayQueue::new(capacity)),
            QueueKind::Priority => Self::Priority(Mutex::new(BinaryHeap::with_capacity(capacity))),
        }
    }

    #[inline]
    fn push(&self, task: &'a Task) {
        match self {
            Self::Fifo(queue) => {
                let pushed = queue.push(task);
                debug_assert!(pushed.is_ok(), "ready queue sized to the task grid");
            }
            Self::Priority(heap) => heap.lock().push(Prioritized(task)),
        }
    }

    #[inline]
    fn pop(&self) -> Option<&'a Task> {
        match self {
            Self::Fifo(queue) => queue.pop(),
            Self::Priority(heap) => heap.lock().pop().map(|task| task.0),
        }
    }
}

pub(crate) struct Scheduler<'a> {
    table: &'a TaskTable,
    deps: &'a DependencyTable,
    ready: ReadyQueue<'a>,
    wait: ArrayQueue<&'a Task>,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(table: &'a TaskTable, deps: &'a DependencyTable, kind: QueueKind) -> Self {
        Self {
            table,
            deps,
            ready: ReadyQueue::new(kind, table.len()),
            wait: ArrayQueue::new(table.len()),
        }
    }

    /// Seeds task `(0, 0)`, runs `workers` spinning workers to completion of
    /// the final panel's factor, and joins them.
    ///
    /// # Safety
    ///
    /// `mat` and `refl` must stay valid for the duration of the call, cover
    /// the ranges named by every task of the table, and be accessed by
    /// nothing else while the pool runs.
    pub(crate) unsafe fn run(&self, mat: MatPtr, refl: ReflectorsPtr, workers: usize) {
        self.ready.push(self.table.get(0, 0));
        std::thread::scope(|scope| {
            for worker in 0..workers {
                scope.spawn(move || unsafe { self.worker_loop(worker, mat, refl) });
            }
        });
    }

    unsafe fn worker_loop(&self, worker: usize, mat: MatPtr, refl: ReflectorsPtr) {
        let (term_i, term_j) = self.table.terminal();

        loop {
            let mut idle = true;

            if let Some(task) = self.ready.pop() {
                idle = false;
                log::trace!(
                    "worker {worker}: {:?} ({}, {}) pivots [{}, {}) rows [{}, {})",
                    task.kind,
                    task.i,
                    task.j,
                    task.piv_start,
                    task.piv_end,
                    task.upd_start,
                    task.upd_end,
                );
                match task.kind {
                    TaskKind::Factor => {
                        factor_panel(mat, refl, task.piv_start, task.piv_end, task.upd_end)
                    }
                    TaskKind::Update => apply_reflectors(
                        mat,
                        refl,
                        task.piv_start,
                        task.piv_end,
                        task.upd_start,
                        task.upd_end,
                    ),
                }
                self.deps.set(task.i, task.j);
                self.enqueue_successors(task);
            }

            // One unready task gets its left neighbor re-checked per
            // iteration.
            if let Some(task) = self.wait.pop() {
                idle = false;
                if self.deps.get(task.i, task.j - 1) {
                    self.ready.push(task);
                } else {
                    let pushed = self.wait.push(task);
                    debug_assert!(pushed.is_ok(), "wait queue sized to the task grid");
                }
            }

            if self.deps.get(term_i, term_j) {
                log::trace!("worker {worker}: terminal flag observed, exiting");
                break;
            }

            if idle {
                std::hint::spin_loop();
            }
        }
    }

    fn enqueue_successors(&self, task: &'a Task) {
        let task_rows = self.table.task_rows();
        let task_cols = self.table.task_cols();
        let r = self.table.blocks_per_panel();

        match task.kind {
            // The panel's reflectors now exist: hand each of its pivot
            // blocks to every lower panel, gated on that panel having
            // absorbed the previous block.
            TaskKind::Factor => {
                for k in task.i + 1..task_rows {
                    for j in task.j..usize::min(task.j + r, task_cols) {
                        let successor = self.table.get(k, j);
                        if j == 0 || self.deps.get(k, j - 1) {
                            self.ready.push(successor);
                        } else {
                            let pushed = self.wait.push(successor);
                            debug_assert!(pushed.is_ok(), "wait queue sized to the task grid");
                        }
                    }
                }
            }
            // The panel to the right of this task is fully caught up: its
            // factor is ready.
            TaskKind::Update => {
                if task.unlocks_next_factor && task.j + 1 < task_cols {
                    self.ready.push(self.table.get((task.j + 1) / r, task.j + 1));
                }
            }
        }
    }
}
