//! In-place blocked Householder QR factorization driven by a dependency-graph
//! worker pool.
//!
//! The matrix is cut into horizontal panels of `BETA` rows; each panel is
//! factored by one task and pushed into every lower panel in pivot blocks of
//! `ALPHA` rows by update tasks. The tasks form a finite acyclic grid (see
//! [`graph`]) executed by `W` spinning workers over a shared buffer; all
//! writes to a given matrix row are totally ordered by the grid's
//! left-neighbor gating, so the output is bitwise independent of the worker
//! count and of the ready-queue flavor.
//!
//! # Example
//! ```
//! use panqr::{factorize, FactorParams, Mat, QueueKind};
//!
//! let mut mat = Mat::from_fn(6, 6, |i, j| 1.0 / (i + j + 1) as f64);
//! let params = FactorParams {
//!     alpha: 2,
//!     beta: 2,
//!     workers: 4,
//!     queue: QueueKind::Fifo,
//! };
//! let reflectors = factorize(mat.as_mut(), &params).unwrap();
//! assert_eq!(reflectors.len(), 6);
//! ```
//!
//! The factored storage holds the triangular coefficients on and below the
//! diagonal and the reflector tails above it; the scalar heads are returned
//! as [`Reflectors`].

use thiserror::Error;

pub mod graph;
pub mod io;
mod scheduler;

pub use panqr_core::householder::Reflectors;
pub use panqr_core::{Mat, MatMut, MatRef};

use graph::{DependencyTable, TaskTable};
use scheduler::Scheduler;

/// Ready-queue flavor; see the module docs of [`graph`] for the priority
/// weights.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueKind {
    /// First-in first-out.
    Fifo,
    /// Highest [`priority`](graph::Task::priority) first; favors
    /// critical-path factor tasks when workers outnumber runnable updates.
    Priority,
}

/// Blocking and pool parameters of one factorization.
#[derive(Copy, Clone, Debug)]
pub struct FactorParams {
    /// Pivot-block height (rows per update task).
    pub alpha: usize,
    /// Panel height (rows per factor task); must be a multiple of `alpha`.
    pub beta: usize,
    /// Worker count.
    pub workers: usize,
    pub queue: QueueKind,
}

impl FactorParams {
    /// FIFO scheduling with one worker per available core.
    pub fn new(alpha: usize, beta: usize) -> Self {
        Self {
            alpha,
            beta,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue: QueueKind::Fifo,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactorError {
    #[error("matrix dimensions must be nonzero (got {nrows} x {ncols})")]
    EmptyMatrix { nrows: usize, ncols: usize },
    #[error("panel height {beta} must be a positive multiple of the block height {alpha}")]
    BadBlocking { alpha: usize, beta: usize },
    #[error("worker count must be nonzero")]
    NoWorkers,
    #[error(
        "matrix must be at least as wide as it is tall (got {nrows} x {ncols}): \
         the pivot scan reads the diagonal and the trailing columns of each row"
    )]
    TooFewColumns { nrows: usize, ncols: usize },
}

/// Factors `mat` in place and returns the scalar reflector pairs.
///
/// On return, the coefficients on and below the diagonal hold the triangular
/// factor and the trailing entries of each pivot row hold its reflector
/// tail. Degenerate pivots (zero trailing row) are skipped and leave their
/// reflector slot zeroed.
///
/// Fails fast on invalid blocking, an empty or too-narrow matrix, or a zero
/// worker count; there are no recoverable per-task errors.
pub fn factorize(mut mat: MatMut<'_>, params: &FactorParams) -> Result<Reflectors, FactorError> {
    let nrows = mat.nrows();
    let ncols = mat.ncols();

    if nrows == 0 || ncols == 0 {
        return Err(FactorError::EmptyMatrix { nrows, ncols });
    }
    if params.alpha == 0 || params.beta == 0 || params.beta % params.alpha != 0 {
        return Err(FactorError::BadBlocking {
            alpha: params.alpha,
            beta: params.beta,
        });
    }
    if params.workers == 0 {
        return Err(FactorError::NoWorkers);
    }
    if ncols < nrows {
        return Err(FactorError::TooFewColumns { nrows, ncols });
    }

    let mut reflectors = Reflectors::zeroed(nrows);
    let table = TaskTable::new(nrows, params.alpha, params.beta);
    let deps = DependencyTable::new(table.task_rows(), table.task_cols());
    log::debug!(
        "factorizing {nrows} x {ncols}: {} x {} task grid, {} workers, {:?} queue",
        table.task_rows(),
        table.task_cols(),
        params.workers,
        params.queue,
    );

    let scheduler = Scheduler::new(&table, &deps, params.queue);
    let mat_ptr = mat.as_mat_ptr();
    let refl_ptr = reflectors.as_refl_ptr();
    // Safety: the task grid only names rows of `mat` and slots of
    // `reflectors`, both of which outlive the pool and are accessed by
    // nothing else until it joins.
    unsafe { scheduler.run(mat_ptr, refl_ptr, params.workers) };

    Ok(reflectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::prelude::*;
    use std::cell::RefCell;

    thread_local! {
        static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
    }

    fn random_value() -> f64 {
        RNG.with(|rng| rng.borrow_mut().gen::<f64>() - 0.5)
    }

    fn params(alpha: usize, beta: usize, workers: usize, queue: QueueKind) -> FactorParams {
        FactorParams {
            alpha,
            beta,
            workers,
            queue,
        }
    }

    fn run(mat: &mut Mat, p: &FactorParams) -> Reflectors {
        factorize(mat.as_mut(), p).unwrap()
    }

    fn reconstruct(factored: &Mat, refl: &Reflectors) -> Mat {
        let m = factored.nrows();
        let n = factored.ncols();
        let mut out = Mat::from_fn(m, n, |i, j| if j <= i { factored[(i, j)] } else { 0.0 });

        for p in (0..m.min(n)).rev() {
            let up = refl.up()[p];
            let b = refl.b()[p];
            if b == 0.0 {
                continue;
            }
            for r in 0..m {
                let mut sm = out[(r, p)] * up;
                for k in p + 1..n {
                    sm += out[(r, k)] * factored[(p, k)];
                }
                sm *= b;
                out[(r, p)] += sm * up;
                for k in p + 1..n {
                    out[(r, k)] += sm * factored[(p, k)];
                }
            }
        }
        out
    }

    fn assert_reconstructs(orig: &Mat, factored: &Mat, refl: &Reflectors) {
        let m = orig.nrows();
        let n = orig.ncols();
        let rebuilt = reconstruct(factored, refl);
        let tol = (m * n) as f64 * 1e-10;
        for i in 0..m {
            for j in 0..n {
                assert_approx_eq!(rebuilt[(i, j)], orig[(i, j)], tol);
            }
        }
    }

    #[test]
    fn identity_factors_to_signed_diagonal() {
        let m = 4;
        let mut mat = Mat::from_fn(m, m, |i, j| if i == j { 1.0 } else { 0.0 });
        run(&mut mat, &params(2, 2, 2, QueueKind::Fifo));

        for i in 0..m {
            for j in 0..m {
                let expected = if i == j { -1.0 } else { 0.0 };
                assert_eq!(mat[(i, j)], expected);
            }
        }
    }

    #[test]
    fn hilbert_reconstructs_with_decreasing_diagonal() {
        let m = 6;
        let orig = Mat::from_fn(m, m, |i, j| 1.0 / (i + j + 1) as f64);
        let mut mat = orig.clone();
        let refl = run(&mut mat, &params(2, 2, 4, QueueKind::Fifo));

        assert_reconstructs(&orig, &mat, &refl);
        for p in 1..m {
            assert!(
                mat[(p, p)].abs() < mat[(p - 1, p - 1)].abs(),
                "diagonal magnitudes should decrease for the Hilbert matrix"
            );
        }
    }

    #[test]
    fn random_square_reconstructs() {
        for (m, alpha, beta) in [(6, 2, 2), (8, 2, 4), (12, 3, 6), (9, 3, 3)] {
            let orig = Mat::from_fn(m, m, |_, _| random_value());
            let mut mat = orig.clone();
            let refl = run(&mut mat, &params(alpha, beta, 4, QueueKind::Fifo));
            assert_reconstructs(&orig, &mat, &refl);
        }
    }

    #[test]
    fn ones_first_pivot_is_negative_sqrt_m() {
        let m = 8;
        let orig = Mat::from_fn(m, m, |_, _| 1.0);
        let mut mat = orig.clone();
        let refl = run(&mut mat, &params(2, 4, 4, QueueKind::Fifo));

        assert_approx_eq!(mat[(0, 0)], -(8.0f64).sqrt(), 1e-12);
        assert_reconstructs(&orig, &mat, &refl);
    }

    #[test]
    fn priority_and_fifo_agree_bitwise() {
        let m = 8;
        let orig = Mat::from_fn(m, m, |_, _| random_value());

        let mut fifo = orig.clone();
        let refl_fifo = run(&mut fifo, &params(2, 2, 4, QueueKind::Fifo));
        let mut prio = orig.clone();
        let refl_prio = run(&mut prio, &params(2, 2, 4, QueueKind::Priority));

        assert_eq!(fifo, prio);
        assert_eq!(refl_fifo.up(), refl_prio.up());
        assert_eq!(refl_fifo.b(), refl_prio.b());
    }

    #[test]
    fn output_is_worker_count_invariant() {
        let m = 12;
        let orig = Mat::from_fn(m, m, |_, _| random_value());

        let mut single = orig.clone();
        let refl_single = run(&mut single, &params(3, 6, 1, QueueKind::Fifo));
        let mut pool = orig.clone();
        let refl_pool = run(&mut pool, &params(3, 6, 8, QueueKind::Fifo));

        assert_eq!(single, pool);
        assert_eq!(refl_single.up(), refl_pool.up());
        assert_eq!(refl_single.b(), refl_pool.b());
    }

    #[test]
    fn zero_pivot_row_leaves_slot_empty() {
        let m = 10;
        let zero_row = 3;
        let orig = Mat::from_fn(m, m, |i, _| if i == zero_row { 0.0 } else { random_value() });
        let mut mat = orig.clone();
        let refl = run(&mut mat, &params(2, 4, 4, QueueKind::Fifo));

        assert_eq!(refl.up()[zero_row], 0.0);
        assert_eq!(refl.b()[zero_row], 0.0);
        for k in 0..m {
            assert_eq!(mat[(zero_row, k)], 0.0);
        }
        assert_reconstructs(&orig, &mat, &refl);
    }

    #[test]
    fn single_panel_matches_sequential_kernel() {
        let m = 4;
        let orig = Mat::from_fn(m, m, |_, _| random_value());

        // M == BETA: one factor task, no updates.
        let mut pooled = orig.clone();
        let refl_pooled = run(&mut pooled, &params(2, 4, 3, QueueKind::Fifo));

        let mut sequential = orig.clone();
        let mut refl_seq = panqr_core::householder::Reflectors::zeroed(m);
        let ptr = sequential.as_mut().as_mat_ptr();
        unsafe {
            panqr_core::householder::factor_panel(ptr, refl_seq.as_refl_ptr(), 0, m, m);
        }

        assert_eq!(pooled, sequential);
        assert_eq!(refl_pooled.up(), refl_seq.up());
        assert_eq!(refl_pooled.b(), refl_seq.b());
    }

    #[test]
    fn ragged_last_panel_reconstructs() {
        let m = 7;
        let orig = Mat::from_fn(m, m, |_, _| random_value());
        let mut mat = orig.clone();
        let refl = run(&mut mat, &params(3, 3, 2, QueueKind::Fifo));
        assert_reconstructs(&orig, &mat, &refl);
    }

    #[test]
    fn invalid_parameters_fail_fast() {
        let mut mat = Mat::zeros(4, 4);

        let err = factorize(mat.as_mut(), &params(3, 4, 2, QueueKind::Fifo));
        assert_eq!(err.unwrap_err(), FactorError::BadBlocking { alpha: 3, beta: 4 });

        let err = factorize(mat.as_mut(), &params(0, 4, 2, QueueKind::Fifo));
        assert_eq!(err.unwrap_err(), FactorError::BadBlocking { alpha: 0, beta: 4 });

        let err = factorize(mat.as_mut(), &params(2, 2, 0, QueueKind::Fifo));
        assert_eq!(err.unwrap_err(), FactorError::NoWorkers);

        let mut empty = Mat::zeros(0, 0);
        let err = factorize(empty.as_mut(), &params(2, 2, 2, QueueKind::Fifo));
        assert_eq!(err.unwrap_err(), FactorError::EmptyMatrix { nrows: 0, ncols: 0 });

        let mut tall = Mat::zeros(5, 3);
        let err = factorize(tall.as_mut(), &params(1, 1, 2, QueueKind::Fifo));
        assert_eq!(
            err.unwrap_err(),
            FactorError::TooFewColumns { nrows: 5, ncols: 3 }
        );
    }

    #[test]
    fn wide_matrix_is_accepted() {
        let (m, n) = (4, 6);
        let orig = Mat::from_fn(m, n, |_, _| random_value());
        let mut mat = orig.clone();
        let refl = run(&mut mat, &params(2, 2, 2, QueueKind::Fifo));
        assert_reconstructs(&orig, &mat, &refl);
    }

    #[test]
    fn default_params_use_fifo() {
        let p = FactorParams::new(2, 4);
        assert_eq!(p.queue, QueueKind::Fifo);
        assert!(p.workers >= 1);
        let mut mat = Mat::from_fn(8, 8, |_, _| random_value());
        let refl = factorize(mat.as_mut(), &p).unwrap();
        assert_eq!(refl.len(), 8);
    }
}
