//! Analytical leg kinematics for a 3-DOF quadruped leg.
//!
//! Each leg has an abduction joint (rotation about the body x axis), a hip
//! joint and a knee joint (both rotating about the leg's lateral axis). The
//! thigh and calf lengths plus a signed lateral abduction offset fully define
//! the chain, so forward kinematics, the Jacobian and inverse kinematics are
//! all closed form.
//!
//! Frames:
//! - *hip frame*: origin at the abduction joint, axes parallel to the base.
//! - *base frame*: origin at the COM, x forward, y left, z up.
//! - *yaw-aligned frame*: base frame rotated by roll and pitch so that z is
//!   vertical; stance forces are expressed here.

use nalgebra::{Matrix3, Rotation3, Vector3};

use trotter_core::{LegIndex, RobotConfig, RobotState};

/// Damping factor for the least-squares Jacobian inverse.
const DLS_DAMPING: f64 = 0.01;

/// Result of an inverse kinematics query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkSolution {
    /// Joint angles [abduction, hip, knee].
    pub angles: Vector3<f64>,
    /// Base-frame foot position actually reached by `angles`.
    pub reached: Vector3<f64>,
    /// False when the target had to be clamped into the workspace.
    pub feasible: bool,
}

impl IkSolution {
    /// Distance between the requested target and the reached point.
    pub fn error(&self, target: &Vector3<f64>) -> f64 {
        (self.reached - target).norm()
    }
}

/// Closed-form kinematics of all four legs.
#[derive(Clone, Debug)]
pub struct RobotKinematics {
    hip_offsets: [Vector3<f64>; 4],
    abduction_length: f64,
    upper: f64,
    lower: f64,
    min_leg_length: f64,
    max_leg_length: f64,
}

impl RobotKinematics {
    pub fn new(config: &RobotConfig) -> Self {
        let upper = config.upper_leg_length;
        let lower = config.lower_leg_length;
        let [knee_lo, knee_hi] = config.knee_range;
        let la = leg_length(upper, lower, knee_lo);
        let lb = leg_length(upper, lower, knee_hi);
        Self {
            hip_offsets: config.hip_offsets.map(Vector3::from),
            abduction_length: config.abduction_length,
            upper,
            lower,
            min_leg_length: la.min(lb),
            max_leg_length: la.max(lb),
        }
    }

    /// Abduction joint position in the base frame.
    pub fn hip_offset(&self, leg: LegIndex) -> Vector3<f64> {
        self.hip_offsets[leg.index()]
    }

    /// Lateral abduction offset, negative for right legs.
    pub fn signed_abduction_length(&self, leg: LegIndex) -> f64 {
        self.abduction_length * leg.hip_sign()
    }

    /// Nominal foot position under the thigh joint (hip offset plus the
    /// lateral abduction offset), in the base frame at zero height.
    pub fn nominal_foot_offset(&self, leg: LegIndex) -> Vector3<f64> {
        self.hip_offset(leg) + Vector3::new(0.0, self.signed_abduction_length(leg), 0.0)
    }

    /// Leg length limits implied by the knee range.
    pub const fn leg_length_range(&self) -> (f64, f64) {
        (self.min_leg_length, self.max_leg_length)
    }

    // -----------------------------------------------------------------------
    // Forward kinematics
    // -----------------------------------------------------------------------

    /// Foot position relative to the abduction joint.
    pub fn foot_position_in_hip_frame(&self, leg: LegIndex, angles: &Vector3<f64>) -> Vector3<f64> {
        let (t_ab, t_hip, t_knee) = (angles.x, angles.y, angles.z);
        let l_hip = self.signed_abduction_length(leg);
        let length = leg_length(self.upper, self.lower, t_knee);
        let eff = t_hip + t_knee * 0.5;

        let x = -length * eff.sin();
        let z_plane = -length * eff.cos();
        let (s1, c1) = t_ab.sin_cos();
        Vector3::new(x, c1 * l_hip - s1 * z_plane, s1 * l_hip + c1 * z_plane)
    }

    /// Foot position in the base frame.
    pub fn forward_kinematics(&self, leg: LegIndex, angles: &Vector3<f64>) -> Vector3<f64> {
        self.foot_position_in_hip_frame(leg, angles) + self.hip_offset(leg)
    }

    /// Base-frame foot positions of all legs from the measured joint angles.
    pub fn foot_positions_in_base_frame(&self, state: &RobotState) -> [Vector3<f64>; 4] {
        LegIndex::ALL.map(|leg| self.forward_kinematics(leg, &state.leg_angles(leg)))
    }

    // -----------------------------------------------------------------------
    // Jacobian
    // -----------------------------------------------------------------------

    /// Analytical Jacobian d(foot position)/d(joint angles), base frame.
    pub fn leg_jacobian(&self, leg: LegIndex, angles: &Vector3<f64>) -> Matrix3<f64> {
        let (t1, t2, t3) = (angles.x, angles.y, angles.z);
        let l_hip = self.signed_abduction_length(leg);
        let lu = self.upper;
        let ll = self.lower;
        let length = leg_length(lu, ll, t3).max(1e-9);
        let eff = t2 + t3 * 0.5;
        let (s_eff, c_eff) = eff.sin_cos();
        let (s1, c1) = t1.sin_cos();
        let s3 = t3.sin();
        // dL/dt3 = -lu*ll*sin(t3)/L
        let dl = -lu * ll * s3 / length;

        let mut j = Matrix3::zeros();
        j[(0, 1)] = -length * c_eff;
        j[(0, 2)] = -dl * s_eff - length * c_eff * 0.5;

        j[(1, 0)] = -l_hip * s1 + length * c1 * c_eff;
        j[(1, 1)] = -length * s1 * s_eff;
        j[(1, 2)] = dl * s1 * c_eff - length * s1 * s_eff * 0.5;

        j[(2, 0)] = l_hip * c1 + length * s1 * c_eff;
        j[(2, 1)] = length * s_eff * c1;
        j[(2, 2)] = -dl * c1 * c_eff + length * s_eff * c1 * 0.5;
        j
    }

    /// Jacobian of one leg at the measured joint angles.
    pub fn compute_jacobian(&self, leg: LegIndex, state: &RobotState) -> Matrix3<f64> {
        self.leg_jacobian(leg, &state.leg_angles(leg))
    }

    /// Joint velocities producing `foot_velocity` (base frame), via a damped
    /// least-squares inverse of the Jacobian.
    pub fn joint_velocities_for(
        &self,
        leg: LegIndex,
        angles: &Vector3<f64>,
        foot_velocity: &Vector3<f64>,
    ) -> Vector3<f64> {
        let j = self.leg_jacobian(leg, angles);
        let damped = j * j.transpose() + Matrix3::identity() * (DLS_DAMPING * DLS_DAMPING);
        damped
            .cholesky()
            .map_or_else(Vector3::zeros, |chol| j.transpose() * chol.solve(foot_velocity))
    }

    /// Joint torques realising a ground reaction force.
    ///
    /// `force` is the force the ground applies to the body through this foot,
    /// expressed in the yaw-aligned frame. The foot must push the opposite
    /// way, so `tau = -J^T R_rp^T F`.
    pub fn map_force_to_torque(
        &self,
        leg: LegIndex,
        force: &Vector3<f64>,
        state: &RobotState,
    ) -> Vector3<f64> {
        let j = self.compute_jacobian(leg, state);
        let force_base = roll_pitch_rotation(&state.orientation).inverse() * force;
        -(j.transpose() * force_base)
    }

    // -----------------------------------------------------------------------
    // Inverse kinematics
    // -----------------------------------------------------------------------

    /// Closed-form IK for a base-frame foot target.
    ///
    /// Never fails: unreachable targets are projected onto the workspace
    /// boundary (abduction cylinder, then leg-length limits) and flagged.
    pub fn inverse_kinematics(&self, leg: LegIndex, foot_in_base: &Vector3<f64>) -> IkSolution {
        let p = foot_in_base - self.hip_offset(leg);
        let a = self.signed_abduction_length(leg);
        let mut clamped = false;

        // Distance from the abduction axis within the leg plane.
        let w_sq = p.y * p.y + p.z * p.z - a * a;
        let mut w = if w_sq > 0.0 {
            w_sq.sqrt()
        } else {
            clamped = true;
            0.0
        };
        let mut x = p.x;

        let length = x.hypot(w);
        if length < 1e-9 {
            clamped = true;
            x = 0.0;
            w = self.min_leg_length;
        } else if length < self.min_leg_length - 1e-12 || length > self.max_leg_length + 1e-12 {
            clamped = true;
            let scale = length.clamp(self.min_leg_length, self.max_leg_length) / length;
            x *= scale;
            w *= scale;
        }
        let length = x.hypot(w);

        let t_ab = (w * p.y + a * p.z).atan2(a * p.y - w * p.z);
        let cos_knee = (length * length - self.upper * self.upper - self.lower * self.lower)
            / (2.0 * self.upper * self.lower);
        let t_knee = -cos_knee.clamp(-1.0, 1.0).acos();
        let eff = (-x).atan2(w);
        let t_hip = eff - t_knee * 0.5;

        let angles = Vector3::new(t_ab, t_hip, t_knee);
        IkSolution {
            angles,
            reached: self.forward_kinematics(leg, &angles),
            feasible: !clamped,
        }
    }
}

/// Distance from hip joint to foot for a given knee angle.
fn leg_length(upper: f64, lower: f64, knee: f64) -> f64 {
    (upper * upper + lower * lower + 2.0 * upper * lower * knee.cos())
        .max(0.0)
        .sqrt()
}

/// Rotation from the base frame to the yaw-aligned frame (roll and pitch only).
pub fn roll_pitch_rotation(orientation: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_euler_angles(orientation.x, orientation.y, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use trotter_core::{N_JOINTS, N_LEGS};

    fn kin() -> RobotKinematics {
        RobotKinematics::new(&RobotConfig::default())
    }

    fn state_with_angles(angles: Vector3<f64>, orientation: Vector3<f64>) -> RobotState {
        let mut joint_angles = [0.0; N_JOINTS];
        for leg in 0..N_LEGS {
            joint_angles[leg * 3..leg * 3 + 3].copy_from_slice(angles.as_slice());
        }
        RobotState {
            time: 0.0,
            com_position: Vector3::new(0.0, 0.0, 0.3),
            com_velocity: Vector3::zeros(),
            orientation,
            angular_velocity: Vector3::zeros(),
            joint_angles,
            joint_velocities: [0.0; N_JOINTS],
            foot_positions: [Vector3::zeros(); N_LEGS],
        }
    }

    #[test]
    fn straight_leg_points_down() {
        let k = kin();
        let p = k.foot_position_in_hip_frame(LegIndex::FrontLeft, &Vector3::zeros());
        assert_relative_eq!(p, Vector3::new(0.0, 0.08505, -0.4), epsilon = 1e-12);
        let p = k.foot_position_in_hip_frame(LegIndex::RearRight, &Vector3::zeros());
        assert_relative_eq!(p.y, -0.08505, epsilon = 1e-12);
    }

    #[test]
    fn ik_round_trip_inside_workspace() {
        let k = kin();
        let samples = [
            Vector3::new(0.0, 0.9, -1.8),
            Vector3::new(0.1, 0.6, -1.2),
            Vector3::new(-0.15, 1.1, -2.2),
            Vector3::new(0.05, 0.3, -1.0),
        ];
        for leg in LegIndex::ALL {
            for q in &samples {
                let target = k.forward_kinematics(leg, q);
                let sol = k.inverse_kinematics(leg, &target);
                assert!(sol.feasible, "{leg:?} {q:?}");
                assert_relative_eq!(sol.reached, target, epsilon = 1e-9);
                assert_relative_eq!(sol.angles, *q, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn ik_round_trip_stance_target() {
        let k = kin();
        for leg in LegIndex::ALL {
            let target = k.nominal_foot_offset(leg) + Vector3::new(0.03, 0.0, -0.29);
            let sol = k.inverse_kinematics(leg, &target);
            assert!(sol.feasible);
            assert!(sol.error(&target) < 1e-9);
        }
    }

    #[test]
    fn ik_clamps_out_of_reach_target() {
        let k = kin();
        let leg = LegIndex::FrontRight;
        let target = k.hip_offset(leg) + Vector3::new(0.0, -0.08505, -1.0);
        let sol = k.inverse_kinematics(leg, &target);
        assert!(!sol.feasible);
        assert!(sol.angles.iter().all(|a| a.is_finite()));
        let (_, max_len) = k.leg_length_range();
        let reach = (sol.reached - k.hip_offset(leg)).norm();
        assert_relative_eq!(reach, 0.08505_f64.hypot(max_len), epsilon = 1e-9);
        // Clamped toward the target direction in the abduction plane.
        let rel = sol.reached - k.hip_offset(leg);
        assert_relative_eq!(rel.y / rel.z, -0.08505 / -1.0, epsilon = 1e-9);
    }

    #[test]
    fn ik_clamps_inside_abduction_cylinder() {
        let k = kin();
        let leg = LegIndex::RearLeft;
        let sol = k.inverse_kinematics(leg, &k.hip_offset(leg));
        assert!(!sol.feasible);
        assert!(sol.angles.iter().all(|a| a.is_finite()));
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let k = kin();
        let q = Vector3::new(0.12, 0.7, -1.5);
        let eps = 1e-6;
        for leg in LegIndex::ALL {
            let j = k.leg_jacobian(leg, &q);
            for col in 0..3 {
                let mut qp = q;
                let mut qm = q;
                qp[col] += eps;
                qm[col] -= eps;
                let fd = (k.forward_kinematics(leg, &qp) - k.forward_kinematics(leg, &qm))
                    / (2.0 * eps);
                for row in 0..3 {
                    assert_relative_eq!(j[(row, col)], fd[row], epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn dls_inverse_recovers_joint_velocity() {
        let k = kin();
        let q = Vector3::new(0.0, 0.8, -1.6);
        let qd = Vector3::new(0.3, -0.5, 1.0);
        let leg = LegIndex::FrontLeft;
        let v = k.leg_jacobian(leg, &q) * qd;
        let recovered = k.joint_velocities_for(leg, &q, &v);
        assert_relative_eq!(recovered, qd, epsilon = 1e-2);
    }

    #[test]
    fn upward_force_gives_torque_pushing_foot_down() {
        let k = kin();
        let q = Vector3::new(0.0, 0.8, -1.6);
        let state = state_with_angles(q, Vector3::zeros());
        let force = Vector3::new(0.0, 0.0, 30.0);
        let leg = LegIndex::FrontRight;
        let tau = k.map_force_to_torque(leg, &force, &state);
        // Foot velocity under tau must point down: the leg pushes on the ground.
        let foot_dir = k.compute_jacobian(leg, &state) * tau;
        assert!(foot_dir.z < 0.0);
        // Power balance: tau . qd == -F . v for any qd
        let qd = Vector3::new(0.2, -0.1, 0.4);
        let v = k.compute_jacobian(leg, &state) * qd;
        assert_relative_eq!(tau.dot(&qd), -force.dot(&v), epsilon = 1e-9);
    }

    #[test]
    fn torque_mapping_accounts_for_pitch() {
        let k = kin();
        let q = Vector3::new(0.0, 0.8, -1.6);
        let pitched = state_with_angles(q, Vector3::new(0.0, 0.2, 0.0));
        let force = Vector3::new(0.0, 0.0, 30.0);
        let leg = LegIndex::RearLeft;
        let tau = k.map_force_to_torque(leg, &force, &pitched);
        let j = k.compute_jacobian(leg, &pitched);
        let force_base = roll_pitch_rotation(&pitched.orientation).transpose() * force;
        assert_relative_eq!(tau, -(j.transpose() * force_base), epsilon = 1e-12);
        assert!(force_base.x.abs() > 1.0);
    }
}
