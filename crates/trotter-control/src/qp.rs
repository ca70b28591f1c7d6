//! Quadratic program container and the solver seam.
//!
//! Problems have the form
//!
//! ```text
//! minimize    ½ zᵀ P z + qᵀ z
//! subject to  A_eq z  = b_eq      (first n_eq rows)
//!             A_in z <= b_in      (remaining n_ineq rows)
//! ```

use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

/// Gap and feasibility tolerance handed to the interior-point solver.
const SOLVER_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Sparse assembly
// ---------------------------------------------------------------------------

/// Sparse matrix collected as `(row, col, value)` entries.
///
/// Exact zeros are skipped and repeated coordinates are summed when the
/// matrix is compressed.
#[derive(Clone, Debug)]
pub struct TripletMatrix {
    nrows: usize,
    ncols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl TripletMatrix {
    pub const fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(nrows: usize, ncols: usize, capacity: usize) -> Self {
        Self {
            nrows,
            ncols,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.nrows && col < self.ncols, "entry ({row}, {col}) out of bounds");
        if value != 0.0 {
            self.entries.push((row, col, value));
        }
    }

    /// Add `scale * block` with its top-left corner at (`row`, `col`).
    pub fn push_block(&mut self, row: usize, col: usize, block: &DMatrix<f64>, scale: f64) {
        for (j, column) in block.column_iter().enumerate() {
            for (i, &v) in column.iter().enumerate() {
                self.push(row + i, col + j, scale * v);
            }
        }
    }

    /// Compress into column-major CSC.
    pub fn into_csc(mut self) -> CscMatrix<f64> {
        self.entries
            .sort_unstable_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));

        let mut colptr = vec![0; self.ncols + 1];
        let mut rowval = Vec::with_capacity(self.entries.len());
        let mut nzval: Vec<f64> = Vec::with_capacity(self.entries.len());
        let mut last = None;
        for (row, col, value) in self.entries {
            if last == Some((row, col)) {
                if let Some(v) = nzval.last_mut() {
                    *v += value;
                }
                continue;
            }
            last = Some((row, col));
            rowval.push(row);
            nzval.push(value);
            colptr[col + 1] += 1;
        }
        for j in 0..self.ncols {
            colptr[j + 1] += colptr[j];
        }
        CscMatrix::new(self.nrows, self.ncols, colptr, rowval, nzval)
    }
}

/// `m * x` for a CSC matrix.
fn csc_mul(m: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(m.m);
    for col in 0..m.n {
        for idx in m.colptr[col]..m.colptr[col + 1] {
            y[m.rowval[idx]] += m.nzval[idx] * x[col];
        }
    }
    y
}

/// `P * x` where only the upper triangle of the symmetric `P` is stored.
fn csc_mul_symmetric_upper(p: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(p.m);
    for col in 0..p.n {
        for idx in p.colptr[col]..p.colptr[col + 1] {
            let (row, v) = (p.rowval[idx], p.nzval[idx]);
            y[row] += v * x[col];
            if row != col {
                y[col] += v * x[row];
            }
        }
    }
    y
}

// ---------------------------------------------------------------------------
// Problem / solution
// ---------------------------------------------------------------------------

/// Sparse QP in the layout the interior-point solver consumes.
#[derive(Clone, Debug)]
pub struct QpProblem {
    /// Upper triangle of the cost Hessian.
    pub p_matrix: CscMatrix<f64>,
    pub q_vector: DVector<f64>,
    /// Constraint matrix, equalities stacked on top of inequalities.
    pub a_matrix: CscMatrix<f64>,
    pub b_vector: DVector<f64>,
    pub n_eq: usize,
    pub n_ineq: usize,
}

impl QpProblem {
    pub fn num_variables(&self) -> usize {
        self.q_vector.len()
    }

    /// Objective value at `z`.
    pub fn objective(&self, z: &DVector<f64>) -> f64 {
        0.5 * z.dot(&csc_mul_symmetric_upper(&self.p_matrix, z)) + self.q_vector.dot(z)
    }

    /// Largest constraint violation at `z` (0 when feasible).
    pub fn max_violation(&self, z: &DVector<f64>) -> f64 {
        let r = csc_mul(&self.a_matrix, z) - &self.b_vector;
        let eq = r.rows(0, self.n_eq).amax();
        let ineq = r
            .rows(self.n_eq, self.n_ineq)
            .iter()
            .fold(0.0_f64, |m, &v| m.max(v));
        eq.max(ineq)
    }
}

/// Outcome classification of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QpStatus {
    Solved,
    /// Converged to reduced accuracy.
    Inaccurate,
    Infeasible,
    MaxIterations,
    TimeLimit,
    Failed,
}

impl QpStatus {
    /// Whether the returned point can be used.
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Solved | Self::Inaccurate)
    }
}

/// Solver output.
#[derive(Clone, Debug)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub status: QpStatus,
    pub iterations: u32,
    pub objective: f64,
    pub solve_time_us: u64,
}

impl QpSolution {
    pub const fn converged(&self) -> bool {
        self.status.is_usable()
    }

    fn failed(n: usize, solve_time_us: u64) -> Self {
        Self {
            x: DVector::zeros(n),
            status: QpStatus::Failed,
            iterations: 0,
            objective: f64::NAN,
            solve_time_us,
        }
    }
}

/// Narrow seam between the MPC and the numerical solver.
pub trait QpSolver {
    fn solve(&mut self, problem: &QpProblem) -> QpSolution;
}

// ---------------------------------------------------------------------------
// Clarabel
// ---------------------------------------------------------------------------

/// Interior-point solver backed by Clarabel.
#[derive(Clone, Debug)]
pub struct ClarabelQp {
    max_iter: u32,
    time_limit: Option<f64>,
}

impl ClarabelQp {
    /// `time_limit` is a per-solve wall-clock cap in seconds; `None` leaves
    /// the iteration cap as the only bound.
    pub const fn new(max_iter: u32, time_limit: Option<f64>) -> Self {
        Self {
            max_iter,
            time_limit,
        }
    }
}

impl QpSolver for ClarabelQp {
    fn solve(&mut self, problem: &QpProblem) -> QpSolution {
        let start = Instant::now();
        let n = problem.num_variables();
        let elapsed_us = |s: Instant| u64::try_from(s.elapsed().as_micros()).unwrap_or(u64::MAX);

        let Ok(settings) = DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .time_limit(self.time_limit.unwrap_or(f64::INFINITY))
            .verbose(false)
            .tol_gap_abs(SOLVER_TOLERANCE)
            .tol_gap_rel(SOLVER_TOLERANCE)
            .tol_feas(SOLVER_TOLERANCE)
            .build()
        else {
            return QpSolution::failed(n, elapsed_us(start));
        };

        let q: Vec<f64> = problem.q_vector.iter().copied().collect();
        let b: Vec<f64> = problem.b_vector.iter().copied().collect();
        let cones = [ZeroConeT(problem.n_eq), NonnegativeConeT(problem.n_ineq)];

        let Ok(mut solver) = DefaultSolver::new(&problem.p_matrix, &q, &problem.a_matrix, &b, &cones, settings) else {
            return QpSolution::failed(n, elapsed_us(start));
        };
        solver.solve();
        let sol = &solver.solution;

        let status = match sol.status {
            SolverStatus::Solved => QpStatus::Solved,
            SolverStatus::AlmostSolved => QpStatus::Inaccurate,
            SolverStatus::PrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::AlmostDualInfeasible => QpStatus::Infeasible,
            SolverStatus::MaxIterations => QpStatus::MaxIterations,
            SolverStatus::MaxTime => QpStatus::TimeLimit,
            _ => QpStatus::Failed,
        };

        QpSolution {
            x: DVector::from_column_slice(&sol.x),
            status,
            iterations: sol.iterations,
            objective: sol.obj_val,
            solve_time_us: elapsed_us(start),
        }
    }
}
