//! Core types shared by the controller, the plant and the CLI.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of legs.
pub const N_LEGS: usize = 4;
/// Actuated joints per leg: hip abduction, thigh, calf.
pub const JOINTS_PER_LEG: usize = 3;
/// Total actuated joints.
pub const N_JOINTS: usize = N_LEGS * JOINTS_PER_LEG;
/// Values per joint in the flat hybrid action: position, velocity, kp, kd, torque.
pub const COMMAND_FIELDS: usize = 5;
/// Number of MPC weights: 12 state-tracking weights + 1 force regularization.
pub const MPC_WEIGHT_COUNT: usize = 13;

// ---------------------------------------------------------------------------
// LegIndex
// ---------------------------------------------------------------------------

/// Leg ordering used everywhere: joint indexing, foot arrays, gait tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LegIndex {
    FrontRight,
    FrontLeft,
    RearRight,
    RearLeft,
}

impl LegIndex {
    /// All legs in index order.
    pub const ALL: [Self; N_LEGS] = [
        Self::FrontRight,
        Self::FrontLeft,
        Self::RearRight,
        Self::RearLeft,
    ];

    /// Position in the fixed ordering (0..4).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Leg from its index. Returns `None` for out-of-range values.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::FrontRight),
            1 => Some(Self::FrontLeft),
            2 => Some(Self::RearRight),
            3 => Some(Self::RearLeft),
            _ => None,
        }
    }

    /// Lateral side: -1 for right legs, +1 for left legs.
    #[must_use]
    pub const fn hip_sign(self) -> f64 {
        match self {
            Self::FrontRight | Self::RearRight => -1.0,
            Self::FrontLeft | Self::RearLeft => 1.0,
        }
    }

    /// Index of this leg's first joint in the 12-joint vector.
    #[must_use]
    pub const fn first_joint(self) -> usize {
        self.index() * JOINTS_PER_LEG
    }
}

// ---------------------------------------------------------------------------
// Contact / gait state
// ---------------------------------------------------------------------------

/// Contact state of a leg: the per-leg dispatch tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    Swing,
    Stance,
}

impl ContactState {
    /// The other state.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Swing => Self::Stance,
            Self::Stance => Self::Swing,
        }
    }

    #[must_use]
    pub const fn is_stance(self) -> bool {
        matches!(self, Self::Stance)
    }
}

/// Snapshot of one leg's gait state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaitState {
    /// Progress within the current contact state, in [0, 1).
    pub phase: f64,
    pub contact_state: ContactState,
    /// Full stance + swing period in seconds.
    pub cycle_length: f64,
    pub duty_factor: f64,
}

// ---------------------------------------------------------------------------
// RobotState
// ---------------------------------------------------------------------------

/// Measured robot state, read once per tick from the simulation.
///
/// Velocities are expressed in the world frame. Joint arrays are ordered
/// leg-major (FR, FL, RR, RL), joint-minor (hip, thigh, calf).
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    /// Simulation clock (seconds since reset).
    pub time: f64,
    pub com_position: Vector3<f64>,
    pub com_velocity: Vector3<f64>,
    /// Roll, pitch, yaw (radians, ZYX convention).
    pub orientation: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    pub joint_angles: [f64; N_JOINTS],
    pub joint_velocities: [f64; N_JOINTS],
    /// Foot positions relative to the base, in the base frame.
    pub foot_positions: [Vector3<f64>; N_LEGS],
}

impl RobotState {
    /// Joint angles of one leg.
    #[must_use]
    pub fn leg_angles(&self, leg: LegIndex) -> Vector3<f64> {
        let j = leg.first_joint();
        Vector3::new(
            self.joint_angles[j],
            self.joint_angles[j + 1],
            self.joint_angles[j + 2],
        )
    }

    /// Joint velocities of one leg.
    #[must_use]
    pub fn leg_velocities(&self, leg: LegIndex) -> Vector3<f64> {
        let j = leg.first_joint();
        Vector3::new(
            self.joint_velocities[j],
            self.joint_velocities[j + 1],
            self.joint_velocities[j + 2],
        )
    }

    /// True when every field is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.time.is_finite()
            && vec_finite(&self.com_position)
            && vec_finite(&self.com_velocity)
            && vec_finite(&self.orientation)
            && vec_finite(&self.angular_velocity)
            && self.joint_angles.iter().all(|v| v.is_finite())
            && self.joint_velocities.iter().all(|v| v.is_finite())
            && self.foot_positions.iter().all(vec_finite)
    }

    /// COM velocity rotated into the yaw-aligned frame.
    #[must_use]
    pub fn com_velocity_yaw_frame(&self) -> Vector3<f64> {
        let (s, c) = self.orientation.z.sin_cos();
        let v = &self.com_velocity;
        Vector3::new(c * v.x + s * v.y, -s * v.x + c * v.y, v.z)
    }

    /// Angular velocity rotated into the yaw-aligned frame.
    #[must_use]
    pub fn angular_velocity_yaw_frame(&self) -> Vector3<f64> {
        let (s, c) = self.orientation.z.sin_cos();
        let w = &self.angular_velocity;
        Vector3::new(c * w.x + s * w.y, -s * w.x + c * w.y, w.z)
    }
}

fn vec_finite(v: &Vector3<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

// ---------------------------------------------------------------------------
// DesiredCommand
// ---------------------------------------------------------------------------

/// Desired planar motion in the yaw-aligned body frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DesiredCommand {
    pub linear_velocity: Vector2<f64>,
    pub yaw_rate: f64,
}

impl DesiredCommand {
    #[must_use]
    pub const fn new(linear_velocity: Vector2<f64>, yaw_rate: f64) -> Self {
        Self {
            linear_velocity,
            yaw_rate,
        }
    }

    /// Planar velocity as a 3-vector with zero z.
    #[must_use]
    pub fn velocity3(&self) -> Vector3<f64> {
        Vector3::new(self.linear_velocity.x, self.linear_velocity.y, 0.0)
    }
}

// ---------------------------------------------------------------------------
// MPC inputs
// ---------------------------------------------------------------------------

/// Cost weights supplied per solve tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpcWeights {
    /// State tracking weights: [roll, pitch, yaw, px, py, pz, wx, wy, wz, vx, vy, vz].
    pub state: [f64; 12],
    /// Force-magnitude regularization weight.
    pub force_regularization: f64,
}

impl Default for MpcWeights {
    fn default() -> Self {
        Self {
            state: [1.0, 1.0, 0.0, 0.0, 0.0, 50.0, 0.0, 0.0, 1.0, 0.2, 0.2, 0.1],
            force_regularization: 1e-5,
        }
    }
}

impl MpcWeights {
    /// Parse the 13-element weight vector (12 state weights then the force weight).
    pub fn from_slice(values: &[f64]) -> Result<Self, ValidationError> {
        if values.len() != MPC_WEIGHT_COUNT {
            return Err(ValidationError::WeightCount {
                expected: MPC_WEIGHT_COUNT,
                got: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ValidationError::NonFinite);
        }
        if let Some(i) = values.iter().position(|&v| v < 0.0) {
            return Err(ValidationError::NegativeWeight(i));
        }
        let mut state = [0.0; 12];
        state.copy_from_slice(&values[..12]);
        Ok(Self {
            state,
            force_regularization: values[12],
        })
    }

    /// Check weights already in typed form.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let all = self.state.iter().chain(std::iter::once(&self.force_regularization));
        for (i, &v) in all.enumerate() {
            if !v.is_finite() {
                return Err(ValidationError::NonFinite);
            }
            if v < 0.0 {
                return Err(ValidationError::NegativeWeight(i));
            }
        }
        Ok(())
    }
}

/// Dynamics parameters of the single-rigid-body model, supplied per solve tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsParams {
    pub mass: f64,
    /// Body-frame inertia about the COM (symmetric positive definite).
    pub inertia: Matrix3<f64>,
}

impl DynamicsParams {
    /// Unitree A1 trunk parameters used by the reference harness.
    #[must_use]
    pub fn a1() -> Self {
        Self {
            mass: 12.454,
            inertia: Matrix3::from_diagonal(&Vector3::new(0.07335, 0.25068, 0.25447)),
        }
    }

    /// Build from a mass and 9 row-major inertia values.
    ///
    /// The inertia is symmetrized and must be positive definite.
    pub fn from_slice(mass: f64, inertia: &[f64]) -> Result<Self, ValidationError> {
        if inertia.len() != 9 {
            return Err(ValidationError::InertiaCount(inertia.len()));
        }
        let params = Self {
            mass,
            inertia: Matrix3::from_row_slice(inertia),
        };
        params.validated()
    }

    /// Check mass and inertia, returning a copy with a symmetrized inertia.
    pub fn validated(&self) -> Result<Self, ValidationError> {
        if !self.mass.is_finite() || !self.inertia.iter().all(|v| v.is_finite()) {
            return Err(ValidationError::NonFinite);
        }
        if self.mass <= 0.0 {
            return Err(ValidationError::NonPositiveMass(self.mass));
        }
        let sym = (self.inertia + self.inertia.transpose()) * 0.5;
        if sym.cholesky().is_none() {
            return Err(ValidationError::InertiaNotPositiveDefinite);
        }
        Ok(Self {
            mass: self.mass,
            inertia: sym,
        })
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Hybrid position/torque command for one joint.
///
/// The motor applies `kp * (position - q) + kd * (velocity - qd) + torque`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorCommand {
    pub position: f64,
    pub velocity: f64,
    pub kp: f64,
    pub kd: f64,
    pub torque: f64,
}

impl MotorCommand {
    /// Pure torque command (zero gains).
    #[must_use]
    pub const fn torque(torque: f64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            kp: 0.0,
            kd: 0.0,
            torque,
        }
    }

    /// Torque the motor would produce at joint position `q` and velocity `qd`.
    #[must_use]
    pub fn effort(&self, q: f64, qd: f64) -> f64 {
        self.kp * (self.position - q) + self.kd * (self.velocity - qd) + self.torque
    }

    /// True when the command uses position/velocity feedback.
    #[must_use]
    pub fn is_position_mode(&self) -> bool {
        self.kp > 0.0 || self.kd > 0.0
    }
}

/// Full 12-joint controller output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HybridAction {
    /// Leg-major (FR, FL, RR, RL), joint-minor (hip, thigh, calf).
    pub commands: [MotorCommand; N_JOINTS],
}

impl HybridAction {
    /// The three joint commands of one leg.
    #[must_use]
    pub fn leg(&self, leg: LegIndex) -> &[MotorCommand] {
        let j = leg.first_joint();
        &self.commands[j..j + JOINTS_PER_LEG]
    }

    /// Write the three joint commands of one leg.
    pub fn set_leg(&mut self, leg: LegIndex, commands: [MotorCommand; JOINTS_PER_LEG]) {
        let j = leg.first_joint();
        self.commands[j..j + JOINTS_PER_LEG].copy_from_slice(&commands);
    }

    /// Flatten to `[position, velocity, kp, kd, torque]` per joint.
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        self.commands
            .iter()
            .flat_map(|c| [c.position, c.velocity, c.kp, c.kd, c.torque])
            .collect()
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.to_flat().iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn leg_index_ordering() {
        for (i, leg) in LegIndex::ALL.iter().enumerate() {
            assert_eq!(leg.index(), i);
            assert_eq!(LegIndex::from_index(i), Some(*leg));
        }
        assert_eq!(LegIndex::from_index(4), None);
        assert_eq!(LegIndex::RearRight.first_joint(), 6);
        assert!(LegIndex::FrontRight.hip_sign() < 0.0);
        assert!(LegIndex::RearLeft.hip_sign() > 0.0);
    }

    #[test]
    fn weights_from_slice() {
        let mut raw = vec![1.0; 12];
        raw.push(1e-5);
        let w = MpcWeights::from_slice(&raw).unwrap();
        assert_relative_eq!(w.force_regularization, 1e-5);

        let err = MpcWeights::from_slice(&raw[..12]).unwrap_err();
        assert_eq!(err, ValidationError::WeightCount { expected: 13, got: 12 });

        raw[3] = f64::NAN;
        assert_eq!(MpcWeights::from_slice(&raw).unwrap_err(), ValidationError::NonFinite);

        raw[3] = -0.5;
        assert_eq!(
            MpcWeights::from_slice(&raw).unwrap_err(),
            ValidationError::NegativeWeight(3)
        );
    }

    #[test]
    fn dynamics_params_validation() {
        let ok = DynamicsParams::from_slice(12.0, &[0.07, 0.0, 0.0, 0.0, 0.25, 0.0, 0.0, 0.0, 0.25]);
        assert!(ok.is_ok());

        let bad_mass = DynamicsParams::from_slice(0.0, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(bad_mass.unwrap_err(), ValidationError::NonPositiveMass(0.0));

        let not_pd = DynamicsParams::from_slice(1.0, &[1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(not_pd.unwrap_err(), ValidationError::InertiaNotPositiveDefinite);

        let short = DynamicsParams::from_slice(1.0, &[1.0; 8]);
        assert_eq!(short.unwrap_err(), ValidationError::InertiaCount(8));
    }

    #[test]
    fn dynamics_params_symmetrizes_inertia() {
        let p = DynamicsParams::from_slice(1.0, &[1.0, 0.2, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            .unwrap();
        assert_relative_eq!(p.inertia[(0, 1)], 0.1);
        assert_relative_eq!(p.inertia[(1, 0)], 0.1);
    }

    #[test]
    fn hybrid_action_flat_layout() {
        let mut action = HybridAction::default();
        action.set_leg(
            LegIndex::FrontLeft,
            [
                MotorCommand { position: 1.0, velocity: 2.0, kp: 3.0, kd: 4.0, torque: 5.0 },
                MotorCommand::torque(6.0),
                MotorCommand::torque(7.0),
            ],
        );
        let flat = action.to_flat();
        assert_eq!(flat.len(), N_JOINTS * COMMAND_FIELDS);
        // FrontLeft hip is joint 3 -> offset 15
        assert_eq!(&flat[15..20], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_relative_eq!(flat[24], 6.0);
        assert_eq!(action.leg(LegIndex::FrontLeft)[2].torque, 7.0);
    }

    #[test]
    fn motor_effort() {
        let cmd = MotorCommand { position: 1.0, velocity: 0.0, kp: 100.0, kd: 2.0, torque: 0.5 };
        assert_relative_eq!(cmd.effort(0.9, 1.0), 100.0 * 0.1 - 2.0 + 0.5, epsilon = 1e-12);
        assert!(cmd.is_position_mode());
        assert!(!MotorCommand::torque(1.0).is_position_mode());
    }

    #[test]
    fn yaw_frame_rotation() {
        let state = RobotState {
            time: 0.0,
            com_position: Vector3::zeros(),
            com_velocity: Vector3::new(0.0, 1.0, 0.0),
            orientation: Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            angular_velocity: Vector3::zeros(),
            joint_angles: [0.0; N_JOINTS],
            joint_velocities: [0.0; N_JOINTS],
            foot_positions: [Vector3::zeros(); N_LEGS],
        };
        // Facing +y and moving +y means moving forward in the body frame.
        let v = state.com_velocity_yaw_frame();
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-12);
        assert!(state.is_finite());
    }
}
