//! Householder panel kernels.
//!
//! A pivot row `p` defines a reflector `H = I + b·u·uᵀ` with
//! `u = (up, M[p, p+1..n))`: the scalar head is kept out of the matrix while
//! the tail stays in place in row `p`'s trailing columns. Applying `H` from
//! the right maps row `p` to `(cl, 0, …, 0)` and mixes every later row with
//! row `p`. [`factor_panel`] produces the reflectors of a panel and applies
//! them inside it; [`apply_reflectors`] replays already-produced reflectors
//! onto a disjoint row range.

use crate::MatPtr;
use assert2::debug_assert as fancy_debug_assert;

/// Scalar reflector pairs, one slot per matrix row.
///
/// Slots start zeroed. A slot is written at most once, by the panel-factor
/// task that owns its row; a zero `b` therefore denotes "no reflector" and
/// makes every later application of that slot a no-op.
#[derive(Clone, Debug)]
pub struct Reflectors {
    up: Vec<f64>,
    b: Vec<f64>,
}

impl Reflectors {
    pub fn zeroed(len: usize) -> Self {
        Self {
            up: vec![0.0; len],
            b: vec![0.0; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.up.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    #[inline]
    pub fn up(&self) -> &[f64] {
        &self.up
    }

    #[inline]
    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Unchecked shared view for the worker pool; see [`ReflectorsPtr`].
    #[inline]
    pub fn as_refl_ptr(&mut self) -> ReflectorsPtr {
        ReflectorsPtr {
            up: self.up.as_mut_ptr(),
            b: self.b.as_mut_ptr(),
            len: self.up.len(),
        }
    }
}

/// Unchecked shared view over the reflector arrays.
///
/// Same contract as [`MatPtr`](crate::MatPtr): single writer per slot, and
/// the write must be published through a release/acquire edge before any
/// reader loads it.
pub struct ReflectorsPtr {
    up: *mut f64,
    b: *mut f64,
    len: usize,
}

impl Copy for ReflectorsPtr {}
impl Clone for ReflectorsPtr {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}
unsafe impl Send for ReflectorsPtr {}
unsafe impl Sync for ReflectorsPtr {}

impl ReflectorsPtr {
    #[inline]
    pub fn len(self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// `row < self.len()`, and the slot's producer has been published.
    #[inline]
    pub unsafe fn load(self, row: usize) -> (f64, f64) {
        fancy_debug_assert!(row < self.len);
        (*self.up.add(row), *self.b.add(row))
    }

    /// # Safety
    ///
    /// `row < self.len()`, single writer per slot.
    #[inline]
    pub unsafe fn store(self, row: usize, up: f64, b: f64) {
        fancy_debug_assert!(row < self.len);
        *self.up.add(row) = up;
        *self.b.add(row) = b;
    }
}

/// Factors the pivot rows `[row_start, row_end)` in place and applies each
/// accepted reflector to the rows `(p, upd_end)` of the same panel.
///
/// A start index of 1 denotes the top panel and is treated as 0. Pivots whose
/// trailing row is entirely zero (`cl <= 0`), or whose reflector would be
/// orthogonally degenerate (`b >= 0`), are skipped and leave their slot
/// zeroed. Trailing loops run over the full column count.
///
/// # Safety
///
/// All of `row_start`, `row_end`, `upd_end` must be at most `mat.nrows()`,
/// `row_end <= mat.ncols()` (the pivot scan reads the diagonal), and no other
/// task may concurrently access rows `[min(row_start, 1), upd_end)` of `mat`
/// nor slots `[row_start, row_end)` of `refl`.
pub unsafe fn factor_panel(
    mat: MatPtr,
    refl: ReflectorsPtr,
    row_start: usize,
    row_end: usize,
    upd_end: usize,
) {
    let n = mat.ncols();
    let row_start = if row_start == 1 { 0 } else { row_start };

    for p in row_start..row_end {
        let mut cl = mat.read(p, p).abs();
        let mut sm1 = 0.0;
        for k in p + 1..n {
            let sm = mat.read(p, k).abs();
            sm1 += sm * sm;
            cl = sm.max(cl);
        }

        if cl <= 0.0 {
            continue;
        }
        let clinv = 1.0 / cl;

        let d = mat.read(p, p) * clinv;
        let sm = d * d + sm1 * clinv * clinv;
        cl *= sm.sqrt();
        if mat.read(p, p) > 0.0 {
            cl = -cl;
        }

        let up = mat.read(p, p) - cl;
        mat.write(p, p, cl);

        let mut b = up * cl;
        if b >= 0.0 {
            continue;
        }
        b = 1.0 / b;
        refl.store(p, up, b);

        for j in p + 1..upd_end {
            let mut sm = mat.read(j, p) * up;
            for i in p + 1..n {
                sm += mat.read(j, i) * mat.read(p, i);
            }
            if sm == 0.0 {
                continue;
            }
            sm *= b;
            mat.write(j, p, mat.read(j, p) + sm * up);
            for i in p + 1..n {
                mat.write(j, i, mat.read(j, i) + sm * mat.read(p, i));
            }
        }
    }
}

/// Applies the already-produced reflectors of the pivot rows
/// `[piv_start, piv_end)` to the rows `[upd_start, upd_end)`.
///
/// Start indices of 1 are treated as 0, as in [`factor_panel`]. Zero slots
/// (skipped or not-yet-owned pivots) contribute nothing.
///
/// # Safety
///
/// `piv_end <= min(mat.nrows(), mat.ncols(), refl.len())` and
/// `upd_end <= mat.nrows()`. The pivot rows and their reflector slots must
/// have been published by their producing task; no other task may
/// concurrently access rows `[min(upd_start, 1), upd_end)` of `mat`.
pub unsafe fn apply_reflectors(
    mat: MatPtr,
    refl: ReflectorsPtr,
    piv_start: usize,
    piv_end: usize,
    upd_start: usize,
    upd_end: usize,
) {
    let n = mat.ncols();
    let piv_start = if piv_start == 1 { 0 } else { piv_start };
    let upd_start = if upd_start == 1 { 0 } else { upd_start };

    for p in piv_start..piv_end {
        let (up, b) = refl.load(p);

        for j in upd_start..upd_end {
            let mut sm = mat.read(j, p) * up;
            for i in p + 1..n {
                sm += mat.read(j, i) * mat.read(p, i);
            }
            if sm == 0.0 {
                continue;
            }
            sm *= b;
            mat.write(j, p, mat.read(j, p) + sm * up);
            for i in p + 1..n {
                mat.write(j, i, mat.read(j, i) + sm * mat.read(p, i));
            }
        }
    }
}
