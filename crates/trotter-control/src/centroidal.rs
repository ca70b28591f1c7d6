//! Single-rigid-body model used by the stance MPC.
//!
//! State (13):
//!
//! ```text
//! x = [Θ_rpy(3), p_xyz(3), ω_xyz(3), v_xyz(3), g(1)]
//! ```
//!
//! Continuous dynamics, linearised for small roll/pitch:
//! - Θ̇ = R_z(yaw)ᵀ ω
//! - ṗ = v
//! - ω̇ = I⁻¹ Σ rᵢ × fᵢ
//! - v̇ = Σ fᵢ / m − g e_z
//! - ġ = 0
//!
//! The controller expresses everything in the yaw-aligned frame, so it
//! builds the model at yaw 0 with lever arms `rᵢ` taken from the current
//! foot positions relative to the COM.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use trotter_core::{ControlError, RobotState};

/// Number of model states: [Θ(3), p(3), ω(3), v(3), g(1)].
pub const STATE_DIM: usize = 13;

/// Body state of the rigid-body model.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyState {
    /// Roll, pitch, yaw.
    pub orientation: Vector3<f64>,
    pub position: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    pub linear_velocity: Vector3<f64>,
}

impl BodyState {
    /// Model state in the yaw-aligned frame: yaw and horizontal position are
    /// zeroed, height is given by the caller.
    pub fn yaw_aligned(robot: &RobotState, height: f64) -> Self {
        Self {
            orientation: Vector3::new(robot.orientation.x, robot.orientation.y, 0.0),
            position: Vector3::new(0.0, 0.0, height),
            angular_velocity: robot.angular_velocity_yaw_frame(),
            linear_velocity: robot.com_velocity_yaw_frame(),
        }
    }

    /// Pack into the 13-element state vector.
    pub fn to_state_vector(&self, gravity: f64) -> DVector<f64> {
        let mut x = DVector::zeros(STATE_DIM);
        x.fixed_rows_mut::<3>(0).copy_from(&self.orientation);
        x.fixed_rows_mut::<3>(3).copy_from(&self.position);
        x.fixed_rows_mut::<3>(6).copy_from(&self.angular_velocity);
        x.fixed_rows_mut::<3>(9).copy_from(&self.linear_velocity);
        x[12] = gravity;
        x
    }
}

/// Stacked reference states `[x_ref_1, ..., x_ref_H]`.
#[derive(Clone, Debug)]
pub struct ReferenceTrajectory {
    pub states: DVector<f64>,
}

impl ReferenceTrajectory {
    /// Reference for a planar velocity + yaw-rate command in the yaw-aligned
    /// frame: level body at `desired_height`, yaw and position integrating the
    /// command from the current origin.
    pub fn from_command(
        velocity: &Vector3<f64>,
        yaw_rate: f64,
        desired_height: f64,
        horizon: usize,
        dt: f64,
        gravity: f64,
    ) -> Self {
        let mut states = DVector::zeros(STATE_DIM * horizon);
        for k in 0..horizon {
            let t = (k + 1) as f64 * dt;
            let o = k * STATE_DIM;
            states[o + 2] = yaw_rate * t;
            states[o + 3] = velocity.x * t;
            states[o + 4] = velocity.y * t;
            states[o + 5] = desired_height;
            states[o + 8] = yaw_rate;
            states[o + 9] = velocity.x;
            states[o + 10] = velocity.y;
            states[o + 12] = gravity;
        }
        Self { states }
    }
}

/// Continuous-time `A_c` (13×13) and `B_c` (13×3n).
///
/// `lever_arms` are foot positions relative to the COM; `inertia` is the body
/// inertia already expressed in the model frame.
pub fn build_continuous_dynamics(
    yaw: f64,
    lever_arms: &[Vector3<f64>],
    inertia: &Matrix3<f64>,
    mass: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), ControlError> {
    let n_u = 3 * lever_arms.len();
    let mut a_c = DMatrix::zeros(STATE_DIM, STATE_DIM);
    let mut b_c = DMatrix::zeros(STATE_DIM, n_u);

    let r_yaw = yaw_rotation_matrix(yaw);
    let i_inv = (r_yaw * inertia * r_yaw.transpose())
        .try_inverse()
        .ok_or(ControlError::Numerical("inertia tensor is singular"))?;

    a_c.fixed_view_mut::<3, 3>(0, 6).copy_from(&r_yaw.transpose());
    a_c.fixed_view_mut::<3, 3>(3, 9).fill_with_identity();
    a_c[(11, 12)] = -1.0;

    let force_to_accel = Matrix3::identity() / mass;
    for (i, r) in lever_arms.iter().enumerate() {
        b_c.fixed_view_mut::<3, 3>(6, 3 * i).copy_from(&(i_inv * skew_symmetric(r)));
        b_c.fixed_view_mut::<3, 3>(9, 3 * i).copy_from(&force_to_accel);
    }

    Ok((a_c, b_c))
}

/// Zero-order-hold discretisation via the augmented matrix exponential:
///
/// ```text
/// [A_d  B_d] = expm(dt · [A_c  B_c])
/// [ 0    I ]             [ 0    0 ]
/// ```
pub fn discretize_matrix_exp(
    a_c: &DMatrix<f64>,
    b_c: &DMatrix<f64>,
    dt: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n_x = a_c.nrows();
    let n_u = b_c.ncols();
    let mut aug = DMatrix::zeros(n_x + n_u, n_x + n_u);
    aug.view_mut((0, 0), (n_x, n_x)).copy_from(a_c);
    aug.view_mut((0, n_x), (n_x, n_u)).copy_from(b_c);
    aug *= dt;

    let e = matrix_exp(&aug);
    (
        e.view((0, 0), (n_x, n_x)).clone_owned(),
        e.view((0, n_x), (n_x, n_u)).clone_owned(),
    )
}

fn yaw_rotation_matrix(yaw: f64) -> Matrix3<f64> {
    let (sy, cy) = yaw.sin_cos();
    Matrix3::new(cy, -sy, 0.0, sy, cy, 0.0, 0.0, 0.0, 1.0)
}

/// Matrix exponential by scaling and squaring with a truncated Taylor series.
fn matrix_exp(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    let norm_inf = m
        .row_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0_f64, f64::max);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let squarings = if norm_inf > 0.5 {
        (norm_inf.log2().ceil() as i32 + 1).max(1) as u32
    } else {
        0
    };
    let scaled = m / f64::from(2u32.pow(squarings));

    let mut result = DMatrix::identity(n, n);
    let mut term = DMatrix::identity(n, n);
    for k in 1..=14 {
        term = &term * &scaled / f64::from(k);
        result += &term;
        if term.amax() < 1e-17 {
            break;
        }
    }
    for _ in 0..squarings {
        result = &result * &result;
    }
    result
}

/// Cross-product matrix: `skew_symmetric(a) * b == a × b`.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
