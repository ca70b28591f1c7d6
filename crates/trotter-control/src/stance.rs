//! Stance-leg controller: convex MPC over ground reaction forces.
//!
//! On solve ticks the controller builds a sparse (non-condensed) QP over the
//! rigid-body model in the yaw-aligned frame:
//!
//! ```text
//! z = [x_1, ..., x_H, u_0, ..., u_{H-1}]
//! min  Σ ½ (x_k - x_ref_k)ᵀ Q (x_k - x_ref_k) + ½ r ‖u_k‖²
//! s.t. x_{k+1} = A_d x_k + B_d u_k
//!      f = 0                         (leg predicted in swing at knot k)
//!      |fx|, |fy| <= μ fz, f_min <= fz <= f_max   (stance)
//! ```
//!
//! Only the first-knot forces are kept. They are held unchanged until the
//! next successful solve and mapped to joint torques every tick.

use clarabel::algebra::CscMatrix;
use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use trotter_core::{
    ContactState, ControlError, DesiredCommand, DynamicsParams, JOINTS_PER_LEG, LegIndex,
    MotorCommand, MpcWeights, N_LEGS, RobotState, StanceConfig,
};

use crate::centroidal::{
    BodyState, ReferenceTrajectory, STATE_DIM, build_continuous_dynamics, discretize_matrix_exp,
};
use crate::kinematics::{RobotKinematics, roll_pitch_rotation};
use crate::qp::{ClarabelQp, QpProblem, QpSolver, QpStatus, TripletMatrix};

/// Lower bound on the force regularization weight so the QP stays strictly convex.
pub const MIN_FORCE_REGULARIZATION: f64 = 1e-6;

/// Summary of a successful MPC solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveReport {
    pub status: QpStatus,
    pub iterations: u32,
    pub objective: f64,
    pub solve_time_us: u64,
    /// Sum of the first-knot normal forces.
    pub total_normal_force: f64,
}

impl SolveReport {
    pub const fn converged(&self) -> bool {
        self.status.is_usable()
    }
}

/// Convex-MPC stance controller with a held-force cache.
pub struct StanceController {
    config: StanceConfig,
    solver: Box<dyn QpSolver>,
    held: Option<[Vector3<f64>; N_LEGS]>,
}

impl std::fmt::Debug for StanceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StanceController")
            .field("config", &self.config)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

impl StanceController {
    /// Controller backed by the Clarabel interior-point solver.
    pub fn new(config: StanceConfig) -> Self {
        let solver = ClarabelQp::new(config.max_solver_iters, config.time_limit);
        Self::with_solver(config, Box::new(solver))
    }

    pub fn with_solver(config: StanceConfig, solver: Box<dyn QpSolver>) -> Self {
        Self {
            config,
            solver,
            held: None,
        }
    }

    pub const fn config(&self) -> &StanceConfig {
        &self.config
    }

    /// Drop the cached solution.
    pub fn reset(&mut self) {
        self.held = None;
    }

    /// First-knot forces of the last successful solve (yaw-aligned frame).
    pub const fn held_forces(&self) -> Option<&[Vector3<f64>; N_LEGS]> {
        self.held.as_ref()
    }

    /// Held force of one leg; zero before the first successful solve.
    pub fn held_force(&self, leg: LegIndex) -> Vector3<f64> {
        self.held.map_or_else(Vector3::zeros, |f| f[leg.index()])
    }

    /// Solve the MPC and replace the held forces.
    ///
    /// `contacts[k]` is the predicted contact state of every leg at knot `k`;
    /// it must cover the whole horizon. On any error the previous held
    /// forces are kept.
    pub fn solve(
        &mut self,
        robot: &RobotState,
        contacts: &[[ContactState; N_LEGS]],
        command: &DesiredCommand,
        weights: &MpcWeights,
        dynamics: &DynamicsParams,
    ) -> Result<SolveReport, ControlError> {
        let problem = self.build_problem(robot, contacts, command, weights, dynamics)?;
        let solution = self.solver.solve(&problem);

        if !solution.converged() {
            return Err(ControlError::Optimization(format!(
                "QP not solved ({:?} after {} iterations)",
                solution.status, solution.iterations
            )));
        }
        if solution.x.len() != problem.num_variables() || !solution.x.iter().all(|v| v.is_finite()) {
            return Err(ControlError::Numerical("QP solution contains NaN or Inf"));
        }

        let u0 = STATE_DIM * self.config.horizon;
        let forces = LegIndex::ALL.map(|leg| {
            let o = u0 + 3 * leg.index();
            let raw = Vector3::new(solution.x[o], solution.x[o + 1], solution.x[o + 2]);
            match contacts[0][leg.index()] {
                ContactState::Stance => self.project_to_friction_pyramid(raw),
                ContactState::Swing => Vector3::zeros(),
            }
        });
        self.held = Some(forces);

        let report = SolveReport {
            status: solution.status,
            iterations: solution.iterations,
            objective: solution.objective,
            solve_time_us: solution.solve_time_us,
            total_normal_force: forces.iter().map(|f| f.z).sum(),
        };
        debug!(
            iterations = report.iterations,
            objective = report.objective,
            solve_time_us = report.solve_time_us,
            total_fz = report.total_normal_force,
            "MPC solved"
        );
        Ok(report)
    }

    /// Torque-only commands realising the held force of `leg`.
    pub fn leg_command(
        &self,
        leg: LegIndex,
        robot: &RobotState,
        kinematics: &RobotKinematics,
    ) -> [MotorCommand; JOINTS_PER_LEG] {
        let tau = kinematics.map_force_to_torque(leg, &self.held_force(leg), robot);
        std::array::from_fn(|j| MotorCommand::torque(tau[j]))
    }

    /// Clip a force into the friction pyramid and normal-force bounds.
    fn project_to_friction_pyramid(&self, f: Vector3<f64>) -> Vector3<f64> {
        let fz = f.z.clamp(self.config.f_min, self.config.f_max);
        let limit = self.config.friction_coeff * fz;
        Vector3::new(f.x.clamp(-limit, limit), f.y.clamp(-limit, limit), fz)
    }

    // -----------------------------------------------------------------------
    // QP assembly
    // -----------------------------------------------------------------------

    /// Assemble the MPC problem for the current state.
    pub fn build_problem(
        &self,
        robot: &RobotState,
        contacts: &[[ContactState; N_LEGS]],
        command: &DesiredCommand,
        weights: &MpcWeights,
        dynamics: &DynamicsParams,
    ) -> Result<QpProblem, ControlError> {
        let h = self.config.horizon;
        if h == 0 {
            return Err(ControlError::Optimization("MPC horizon must be at least one knot".into()));
        }
        if contacts.len() != h {
            return Err(ControlError::Optimization(format!(
                "contact schedule covers {} knots, horizon is {h}",
                contacts.len()
            )));
        }
        weights.validate()?;
        let dynamics = dynamics.validated()?;
        let gravity = self.config.gravity;

        // Lever arms and inertia in the yaw-aligned frame.
        let r_rp = roll_pitch_rotation(&robot.orientation);
        let lever_arms = robot.foot_positions.map(|p| r_rp * p);
        let inertia = r_rp.matrix() * dynamics.inertia * r_rp.matrix().transpose();

        let stance_z: Vec<f64> = LegIndex::ALL
            .iter()
            .filter(|leg| contacts[0][leg.index()].is_stance())
            .map(|leg| lever_arms[leg.index()].z)
            .collect();
        let height = if stance_z.is_empty() {
            robot.com_position.z
        } else {
            -stance_z.iter().sum::<f64>() / stance_z.len() as f64
        };

        let (a_c, b_c) = build_continuous_dynamics(0.0, &lever_arms, &inertia, dynamics.mass)?;
        let (a_d, b_d) = discretize_matrix_exp(&a_c, &b_c, self.config.dt);

        let x0 = BodyState::yaw_aligned(robot, height).to_state_vector(gravity);
        let reference = ReferenceTrajectory::from_command(
            &command.velocity3(),
            command.yaw_rate,
            self.config.desired_height,
            h,
            self.config.dt,
            gravity,
        );

        let r = weights.force_regularization.max(MIN_FORCE_REGULARIZATION);
        let (p_matrix, q_vector) = build_cost(h, &weights.state, r, &reference);
        let (a_matrix, b_vector, n_eq, n_ineq) = self.build_constraints(&a_d, &b_d, &x0, contacts);

        Ok(QpProblem {
            p_matrix,
            q_vector,
            a_matrix,
            b_vector,
            n_eq,
            n_ineq,
        })
    }

    /// Dynamics and swing equalities, then friction/force-bound inequalities.
    fn build_constraints(
        &self,
        a_d: &DMatrix<f64>,
        b_d: &DMatrix<f64>,
        x0: &DVector<f64>,
        contacts: &[[ContactState; N_LEGS]],
    ) -> (CscMatrix<f64>, DVector<f64>, usize, usize) {
        let h = self.config.horizon;
        let n_u_step = 3 * N_LEGS;
        let n_x = STATE_DIM * h;
        let n_z = n_x + n_u_step * h;

        let n_stance: usize = contacts
            .iter()
            .map(|knot| knot.iter().filter(|s| s.is_stance()).count())
            .sum();
        let n_swing = h * N_LEGS - n_stance;
        let n_eq = n_x + 3 * n_swing;
        let n_ineq = 6 * n_stance;

        let nnz = h * STATE_DIM * (1 + STATE_DIM + n_u_step) + 3 * n_swing + 10 * n_stance;
        let mut a = TripletMatrix::with_capacity(n_eq + n_ineq, n_z, nnz);
        let mut b = DVector::zeros(n_eq + n_ineq);
        let mut row = 0;

        // x_{k+1} - A_d x_k - B_d u_k = 0, with x_0 moved to the right side.
        for k in 0..h {
            let x_next = k * STATE_DIM;
            let u_k = n_x + k * n_u_step;
            for i in 0..STATE_DIM {
                a.push(row + i, x_next + i, 1.0);
            }
            a.push_block(row, u_k, b_d, -1.0);
            if k == 0 {
                b.rows_mut(row, STATE_DIM).copy_from(&(a_d * x0));
            } else {
                a.push_block(row, (k - 1) * STATE_DIM, a_d, -1.0);
            }
            row += STATE_DIM;
        }

        for (k, knot) in contacts.iter().enumerate() {
            for (leg, state) in knot.iter().enumerate() {
                if !state.is_stance() {
                    let u = n_x + k * n_u_step + 3 * leg;
                    for j in 0..3 {
                        a.push(row, u + j, 1.0);
                        row += 1;
                    }
                }
            }
        }
        debug_assert_eq!(row, n_eq);

        let mu = self.config.friction_coeff;
        for (k, knot) in contacts.iter().enumerate() {
            for (leg, state) in knot.iter().enumerate() {
                if !state.is_stance() {
                    continue;
                }
                let fx = n_x + k * n_u_step + 3 * leg;
                let (fy, fz) = (fx + 1, fx + 2);
                for (tangential, sign) in [(fx, 1.0), (fx, -1.0), (fy, 1.0), (fy, -1.0)] {
                    // ±f_t - μ fz <= 0
                    a.push(row, tangential, sign);
                    a.push(row, fz, -mu);
                    row += 1;
                }
                a.push(row, fz, -1.0);
                b[row] = -self.config.f_min;
                row += 1;
                a.push(row, fz, 1.0);
                b[row] = self.config.f_max;
                row += 1;
            }
        }
        debug_assert_eq!(row, n_eq + n_ineq);

        (a.into_csc(), b, n_eq, n_ineq)
    }
}

/// Diagonal cost: Q on each predicted state, r on each force.
fn build_cost(
    h: usize,
    q_weights: &[f64; 12],
    r: f64,
    reference: &ReferenceTrajectory,
) -> (CscMatrix<f64>, DVector<f64>) {
    let n_x = STATE_DIM * h;
    let n_z = n_x + 3 * N_LEGS * h;
    let mut p = TripletMatrix::with_capacity(n_z, n_z, n_z);
    let mut q = DVector::zeros(n_z);

    for k in 0..h {
        let o = k * STATE_DIM;
        for (i, &w) in q_weights.iter().enumerate() {
            p.push(o + i, o + i, w);
            q[o + i] = -w * reference.states[o + i];
        }
    }
    for i in n_x..n_z {
        p.push(i, i, r);
    }
    (p.into_csc(), q)
}
