//! The task grid and its completion flags.
//!
//! The factorization of an `M`-row matrix with panel height `BETA` and block
//! height `ALPHA` is a grid of `TR × TC` tasks, `TR = ceil(M / BETA)` and
//! `TC = ceil(M / ALPHA)`. Grid row `i` owns the target panel (the `BETA`
//! matrix rows the task writes); grid column `j` names the pivot block (the
//! `ALPHA` pivot rows whose reflectors the task applies). The diagonal task
//! `(i, i·R)`, `R = BETA / ALPHA`, factors panel `i` in place; tasks left of
//! it replay earlier pivot blocks onto the panel, in increasing column order.
//! Columns right of the diagonal name reflectors of rows below the panel,
//! which are never applied upward; those descriptors exist but are never
//! scheduled.

use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Factors a panel's pivot rows and applies each reflector inside the
    /// panel.
    Factor,
    /// Applies an earlier pivot block's reflectors to the panel.
    Update,
}

/// Immutable descriptor of one cell of the task grid.
#[derive(Debug)]
pub struct Task {
    pub kind: TaskKind,
    /// Grid coordinates.
    pub i: usize,
    pub j: usize,
    /// Pivot rows this task factors (`Factor`) or replays (`Update`).
    pub piv_start: usize,
    pub piv_end: usize,
    /// Matrix rows this task writes.
    pub upd_start: usize,
    pub upd_end: usize,
    /// Critical-path weight for the priority-ordered ready queue: factors
    /// outrank updates, earlier panels outrank later ones.
    pub priority: u32,
    /// Set on the task immediately left of its own row's factor; completing
    /// it makes that factor ready.
    pub unlocks_next_factor: bool,
}

fn div_ceil(a: usize, b: usize) -> usize {
    let (div, rem) = (a / b, a % b);
    if rem == 0 {
        div
    } else {
        div + 1
    }
}

/// The full task grid, built once and shared read-only by every worker.
pub struct TaskTable {
    tasks: Vec<Task>,
    task_rows: usize,
    task_cols: usize,
    blocks_per_panel: usize,
}

impl TaskTable {
    /// Builds the grid for an `m`-row matrix. `beta` must be a positive
    /// multiple of `alpha`; the driver validates this before calling.
    pub fn new(m: usize, alpha: usize, beta: usize) -> Self {
        let task_rows = div_ceil(m, beta);
        let task_cols = div_ceil(m, alpha);
        let r = beta / alpha;

        let mut tasks = Vec::with_capacity(task_rows * task_cols);
        for i in 0..task_rows {
            let panel_start = i * beta;
            let panel_end = usize::min((i + 1) * beta, m);
            for j in 0..task_cols {
                let kind = if j == i * r {
                    TaskKind::Factor
                } else {
                    TaskKind::Update
                };
                let (piv_start, piv_end) = match kind {
                    TaskKind::Factor => (panel_start, panel_end),
                    TaskKind::Update => (j * alpha, usize::min((j + 1) * alpha, m)),
                };
                let priority = ((task_rows - i) * 2 + (kind == TaskKind::Factor) as usize) as u32;
                tasks.push(Task {
                    kind,
                    i,
                    j,
                    piv_start,
                    piv_end,
                    upd_start: panel_start,
                    upd_end: panel_end,
                    priority,
                    unlocks_next_factor: kind == TaskKind::Update && j + 1 == i * r,
                });
            }
        }

        Self {
            tasks,
            task_rows,
            task_cols,
            blocks_per_panel: r,
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> &Task {
        &self.tasks[i * self.task_cols + j]
    }

    #[inline]
    pub fn task_rows(&self) -> usize {
        self.task_rows
    }

    #[inline]
    pub fn task_cols(&self) -> usize {
        self.task_cols
    }

    /// `R = BETA / ALPHA`: pivot blocks per panel.
    #[inline]
    pub fn blocks_per_panel(&self) -> usize {
        self.blocks_per_panel
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Coordinates of the final panel's factor task; its completion flag is
    /// the global termination predicate.
    #[inline]
    pub fn terminal(&self) -> (usize, usize) {
        (
            self.task_rows - 1,
            self.blocks_per_panel * (self.task_rows - 1),
        )
    }
}

/// Per-task completion flags. Each flag transitions false→true exactly once,
/// set by the worker that executed the task.
pub struct DependencyTable {
    flags: Vec<AtomicBool>,
    task_cols: usize,
}

impl DependencyTable {
    pub fn new(task_rows: usize, task_cols: usize) -> Self {
        let mut flags = Vec::with_capacity(task_rows * task_cols);
        flags.resize_with(task_rows * task_cols, || AtomicBool::new(false));
        Self { flags, task_cols }
    }

    /// Store-release: publishes every prior write of the completed task.
    #[inline]
    pub fn set(&self, i: usize, j: usize) {
        self.flags[i * self.task_cols + j].store(true, Ordering::Release);
    }

    /// Load-acquire: a true result makes the task's writes visible.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> bool {
        self.flags[i * self.task_cols + j].load(Ordering::Acquire)
    }
}
