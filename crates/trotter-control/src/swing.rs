//! Swing-leg controller: touchdown placement, foot trajectory and joint targets.
//!
//! A swing foot travels from where it lifted off to a Raibert-style touchdown
//! target. The horizontal motion and the height bump are both degree-11
//! Bezier curves whose first and last three control points coincide, so the
//! foot leaves and lands with zero velocity and acceleration.

use nalgebra::{Rotation3, Vector3};

use trotter_core::{
    ContactState, ControlError, DesiredCommand, JOINTS_PER_LEG, LegIndex, MotorCommand, N_LEGS, RobotConfig,
    RobotState, SwingConfig,
};

use crate::kinematics::RobotKinematics;

// Horizontal S-curve, 0 -> 1.
const BEZIER_S: [f64; 12] = [0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0];

// Height bump, 0 at both ends.
const BEZIER_H: [f64; 12] = [0.0, 0.0, 0.0, 0.9, 0.9, 1.0, 1.0, 0.9, 0.9, 0.0, 0.0, 0.0];

// bezier(BEZIER_H, 0.5); dividing by it makes the bump peak at exactly `clearance`.
const BEZIER_H_PEAK: f64 = 0.886_230_468_75;

/// De Casteljau evaluation of a degree-11 Bezier curve.
fn bezier(points: &[f64; 12], t: f64) -> f64 {
    let mut w = *points;
    for k in 1..12 {
        for i in 0..(12 - k) {
            w[i] = w[i] * (1.0 - t) + w[i + 1] * t;
        }
    }
    w[0]
}

/// d/dt of a degree-11 Bezier curve (hodograph on the forward differences).
fn bezier_derivative(points: &[f64; 12], t: f64) -> f64 {
    let mut d = [0.0; 11];
    for i in 0..11 {
        d[i] = points[i + 1] - points[i];
    }
    for k in 1..11 {
        for i in 0..(11 - k) {
            d[i] = d[i] * (1.0 - t) + d[i + 1] * t;
        }
    }
    11.0 * d[0]
}

// ---------------------------------------------------------------------------
// SwingTrajectory
// ---------------------------------------------------------------------------

/// One swing from lift-off to touchdown, parametrised by progress in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwingTrajectory {
    pub start: Vector3<f64>,
    pub target: Vector3<f64>,
    /// Peak height of the bump above the start/target line.
    pub clearance: f64,
    /// Swing duration in seconds, used to scale velocities.
    pub duration: f64,
}

impl SwingTrajectory {
    pub fn position(&self, progress: f64) -> Vector3<f64> {
        let t = progress.clamp(0.0, 1.0);
        let s = bezier(&BEZIER_S, t);
        let bump = bezier(&BEZIER_H, t) * (self.clearance / BEZIER_H_PEAK);
        let mut p = self.start + (self.target - self.start) * s;
        p.z += bump;
        p
    }

    /// Time derivative of [`position`](Self::position).
    pub fn velocity(&self, progress: f64) -> Vector3<f64> {
        if self.duration < 1e-9 {
            return Vector3::zeros();
        }
        let t = progress.clamp(0.0, 1.0);
        let inv_dur = 1.0 / self.duration;
        let ds = bezier_derivative(&BEZIER_S, t) * inv_dur;
        let dh = bezier_derivative(&BEZIER_H, t) * (self.clearance / BEZIER_H_PEAK) * inv_dur;
        let mut v = (self.target - self.start) * ds;
        v.z += dh;
        v
    }
}

// ---------------------------------------------------------------------------
// SwingController
// ---------------------------------------------------------------------------

/// Swing-leg controller state: lift-off memory and the last per-leg outputs.
#[derive(Clone, Debug)]
pub struct SwingController {
    config: SwingConfig,
    desired_height: f64,
    kp: [f64; JOINTS_PER_LEG],
    kd: [f64; JOINTS_PER_LEG],
    lift_off: [Option<Vector3<f64>>; N_LEGS],
    previous: [Option<ContactState>; N_LEGS],
    targets: [Option<Vector3<f64>>; N_LEGS],
}

impl SwingController {
    pub fn new(config: SwingConfig, robot: &RobotConfig, desired_height: f64) -> Self {
        Self {
            config,
            desired_height,
            kp: robot.motor_kp,
            kd: robot.motor_kd,
            lift_off: [None; N_LEGS],
            previous: [None; N_LEGS],
            targets: [None; N_LEGS],
        }
    }

    /// Clear lift-off memory; the next swing tick of each leg records anew.
    pub fn reset(&mut self) {
        self.lift_off = [None; N_LEGS];
        self.previous = [None; N_LEGS];
        self.targets = [None; N_LEGS];
    }

    /// Record lift-off positions for legs entering swing.
    pub fn update_lift_off(&mut self, states: &[ContactState; N_LEGS], robot: &RobotState) {
        for leg in LegIndex::ALL {
            let i = leg.index();
            match states[i] {
                ContactState::Swing => {
                    if self.previous[i] != Some(ContactState::Swing) || self.lift_off[i].is_none() {
                        self.lift_off[i] = Some(robot.foot_positions[i]);
                    }
                }
                ContactState::Stance => {
                    self.lift_off[i] = None;
                    self.targets[i] = None;
                }
            }
            self.previous[i] = Some(states[i]);
        }
    }

    /// Base-frame lift-off position of a swinging leg.
    pub fn lift_off_position(&self, leg: LegIndex) -> Option<Vector3<f64>> {
        self.lift_off[leg.index()]
    }

    /// Last touchdown target computed for `leg` during the current swing.
    pub fn touchdown_target(&self, leg: LegIndex) -> Option<Vector3<f64>> {
        self.targets[leg.index()]
    }

    /// Raibert touchdown target in the base frame.
    ///
    /// The neutral point under the thigh joint is rotated by the yaw the body
    /// will turn through in half a stance, shifted by the distance the COM
    /// covers in half a stance and corrected by the hip velocity error.
    pub fn raibert_target(
        &self,
        leg: LegIndex,
        robot: &RobotState,
        command: &DesiredCommand,
        stance_duration: f64,
        kinematics: &RobotKinematics,
    ) -> Vector3<f64> {
        let hip = kinematics.nominal_foot_offset(leg);
        let half_stance = stance_duration * 0.5;

        let mut v_com = robot.com_velocity_yaw_frame();
        v_com.z = 0.0;
        let yaw_rate = robot.angular_velocity.z;
        let v_hip = v_com + Vector3::new(-yaw_rate * hip.y, yaw_rate * hip.x, 0.0);
        let v_hip_des = command.velocity3()
            + Vector3::new(-command.yaw_rate * hip.y, command.yaw_rate * hip.x, 0.0);

        let turned = Rotation3::from_axis_angle(&Vector3::z_axis(), command.yaw_rate * half_stance) * hip;
        let mut target = turned + v_com * half_stance + (v_hip - v_hip_des) * self.config.raibert_kv;

        let mut offset = Vector3::new(target.x - hip.x, target.y - hip.y, 0.0);
        let reach = offset.norm();
        if reach > self.config.max_step_length {
            offset *= self.config.max_step_length / reach;
            target.x = hip.x + offset.x;
            target.y = hip.y + offset.y;
        }
        target.z = -(self.desired_height - self.config.foot_clearance);
        target
    }

    /// Joint commands for a swinging leg.
    ///
    /// The commands are always usable. When the foot target lies outside
    /// the workspace the IK result is clamped and the miss is returned as
    /// [`ControlError::Kinematics`].
    #[allow(clippy::too_many_arguments)]
    pub fn leg_command(
        &mut self,
        leg: LegIndex,
        progress: f64,
        swing_duration: f64,
        stance_duration: f64,
        robot: &RobotState,
        command: &DesiredCommand,
        kinematics: &RobotKinematics,
    ) -> ([MotorCommand; JOINTS_PER_LEG], Option<ControlError>) {
        let i = leg.index();
        let start = *self.lift_off[i].get_or_insert(robot.foot_positions[i]);
        let target = self.raibert_target(leg, robot, command, stance_duration, kinematics);
        self.targets[i] = Some(target);

        let trajectory = SwingTrajectory {
            start,
            target,
            clearance: self.config.max_clearance,
            duration: swing_duration,
        };
        let foot = trajectory.position(progress);
        let foot_vel = trajectory.velocity(progress);

        let ik = kinematics.inverse_kinematics(leg, &foot);
        let qd = kinematics.joint_velocities_for(leg, &ik.angles, &foot_vel);

        let commands = std::array::from_fn(|j| MotorCommand {
            position: ik.angles[j],
            velocity: qd[j],
            kp: self.kp[j],
            kd: self.kd[j],
            torque: 0.0,
        });
        let clamped = (!ik.feasible).then(|| ControlError::Kinematics {
            leg,
            distance: ik.error(&foot),
        });
        (commands, clamped)
    }
}
