//! Deterministic stand-in for the simulation environment.
//!
//! The trunk is a single rigid body; legs are massless. Each leg realises
//! its motor command in one of two ways:
//!
//! - **position mode** (any kp or kd > 0): the leg is in the air and its joints
//!   follow the position/velocity targets exactly. No ground force.
//! - **torque mode**: the foot is pinned to the flat ground at z = 0 where it
//!   first touched down. Joint angles follow from IK of the pinned foot; the
//!   motor torque `kp(q* - q) + kd(q̇* - q̇) + τ` is converted to a ground
//!   reaction through `J⁻ᵀ`, dropped if it would pull the body down and
//!   clipped to the friction cone.
//!
//! Integration is semi-implicit Euler.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use trotter_control::RobotKinematics;
use trotter_core::{
    DynamicsParams, HybridAction, JOINTS_PER_LEG, LegIndex, N_JOINTS, N_LEGS, RobotConfig,
    RobotState,
};

const JACOBIAN_DAMPING: f64 = 1e-3;

/// Physical parameters of the plant.
#[derive(Clone, Debug, PartialEq)]
pub struct PlantConfig {
    pub dynamics: DynamicsParams,
    pub gravity: f64,
    pub friction_coeff: f64,
    /// Initial COM height above the ground.
    pub initial_height: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            dynamics: DynamicsParams::a1(),
            gravity: 9.81,
            friction_coeff: 0.6,
            initial_height: 0.3,
        }
    }
}

/// Single-rigid-body quadruped on flat ground.
#[derive(Clone, Debug)]
pub struct Plant {
    config: PlantConfig,
    kinematics: RobotKinematics,
    time: f64,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    orientation: UnitQuaternion<f64>,
    angular_velocity: Vector3<f64>,
    joint_angles: [f64; N_JOINTS],
    joint_velocities: [f64; N_JOINTS],
    anchors: [Option<Vector3<f64>>; N_LEGS],
    contact_forces: [Vector3<f64>; N_LEGS],
}

impl Plant {
    pub fn new(config: PlantConfig, robot: &RobotConfig) -> Self {
        let mut plant = Self {
            kinematics: RobotKinematics::new(robot),
            config,
            time: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            joint_angles: [0.0; N_JOINTS],
            joint_velocities: [0.0; N_JOINTS],
            anchors: [None; N_LEGS],
            contact_forces: [Vector3::zeros(); N_LEGS],
        };
        plant.reset();
        plant
    }

    /// Level body at the initial height, feet under the thigh joints on the ground.
    pub fn reset(&mut self) {
        let h = self.config.initial_height;
        self.time = 0.0;
        self.position = Vector3::new(0.0, 0.0, h);
        self.velocity = Vector3::zeros();
        self.orientation = UnitQuaternion::identity();
        self.angular_velocity = Vector3::zeros();
        self.joint_velocities = [0.0; N_JOINTS];
        self.contact_forces = [Vector3::zeros(); N_LEGS];
        for leg in LegIndex::ALL {
            let foot = self.kinematics.nominal_foot_offset(leg) - Vector3::new(0.0, 0.0, h);
            let ik = self.kinematics.inverse_kinematics(leg, &foot);
            self.set_leg_angles(leg, &ik.angles);
            self.anchors[leg.index()] = None;
        }
    }

    /// Measured state as the controller sees it.
    pub fn state(&self) -> RobotState {
        let (roll, pitch, yaw) = self.orientation.euler_angles();
        let foot_positions =
            LegIndex::ALL.map(|leg| self.kinematics.forward_kinematics(leg, &self.leg_angles(leg)));
        RobotState {
            time: self.time,
            com_position: self.position,
            com_velocity: self.velocity,
            orientation: Vector3::new(roll, pitch, yaw),
            angular_velocity: self.angular_velocity,
            joint_angles: self.joint_angles,
            joint_velocities: self.joint_velocities,
            foot_positions,
        }
    }

    /// Apply `action` for `dt` seconds.
    pub fn step(&mut self, action: &HybridAction, dt: f64) {
        let rotation = self.orientation.to_rotation_matrix();
        let mut total_force = Vector3::new(0.0, 0.0, -self.config.dynamics.mass * self.config.gravity);
        let mut total_torque = Vector3::zeros();

        for leg in LegIndex::ALL {
            let i = leg.index();
            let commands = action.leg(leg);
            let previous = self.leg_angles(leg);

            if commands.iter().any(|c| c.is_position_mode()) {
                let q = Vector3::new(commands[0].position, commands[1].position, commands[2].position);
                let qd = Vector3::new(commands[0].velocity, commands[1].velocity, commands[2].velocity);
                self.set_leg_angles(leg, &q);
                self.set_leg_velocities(leg, &qd);
                self.anchors[i] = None;
                self.contact_forces[i] = Vector3::zeros();
                continue;
            }

            let anchor = *self.anchors[i].get_or_insert_with(|| {
                let foot = self.position + rotation * self.kinematics.forward_kinematics(leg, &previous);
                Vector3::new(foot.x, foot.y, 0.0)
            });
            let foot_base = rotation.inverse() * (anchor - self.position);
            let q = self.kinematics.inverse_kinematics(leg, &foot_base).angles;
            let qd = (q - previous) / dt;
            self.set_leg_angles(leg, &q);
            self.set_leg_velocities(leg, &qd);

            let tau = Vector3::from_fn(|j, _| commands[j].effort(q[j], qd[j]));
            let jacobian = self.kinematics.leg_jacobian(leg, &q);
            let force = rotation * foot_force_from_torque(&jacobian, &tau);
            let force = self.clip_to_ground(force);

            self.contact_forces[i] = force;
            total_force += force;
            total_torque += (anchor - self.position).cross(&force);
        }

        let mass = self.config.dynamics.mass;
        let inertia_world = rotation.matrix() * self.config.dynamics.inertia * rotation.matrix().transpose();
        let gyro = self.angular_velocity.cross(&(inertia_world * self.angular_velocity));
        let angular_accel = inertia_world
            .try_inverse()
            .map_or_else(Vector3::zeros, |inv: Matrix3<f64>| inv * (total_torque - gyro));

        self.velocity += total_force / mass * dt;
        self.position += self.velocity * dt;
        self.angular_velocity += angular_accel * dt;
        self.orientation = UnitQuaternion::from_scaled_axis(self.angular_velocity * dt) * self.orientation;
        self.time += dt;
    }

    /// Ground cannot pull; tangential force limited to μ·fz.
    fn clip_to_ground(&self, force: Vector3<f64>) -> Vector3<f64> {
        if force.z <= 0.0 {
            return Vector3::zeros();
        }
        let limit = self.config.friction_coeff * force.z;
        let tangential = force.x.hypot(force.y);
        if tangential > limit {
            let s = limit / tangential;
            Vector3::new(force.x * s, force.y * s, force.z)
        } else {
            force
        }
    }

    pub const fn time(&self) -> f64 {
        self.time
    }

    /// World-frame ground reaction force on each foot during the last step.
    pub const fn contact_forces(&self) -> &[Vector3<f64>; N_LEGS] {
        &self.contact_forces
    }

    /// Whether each foot is pinned to the ground.
    pub fn in_contact(&self) -> [bool; N_LEGS] {
        self.anchors.map(|a| a.is_some())
    }

    pub const fn config(&self) -> &PlantConfig {
        &self.config
    }

    fn leg_angles(&self, leg: LegIndex) -> Vector3<f64> {
        let j = leg.first_joint();
        Vector3::from_column_slice(&self.joint_angles[j..j + JOINTS_PER_LEG])
    }

    fn set_leg_angles(&mut self, leg: LegIndex, q: &Vector3<f64>) {
        let j = leg.first_joint();
        self.joint_angles[j..j + JOINTS_PER_LEG].copy_from_slice(q.as_slice());
    }

    fn set_leg_velocities(&mut self, leg: LegIndex, qd: &Vector3<f64>) {
        let j = leg.first_joint();
        self.joint_velocities[j..j + JOINTS_PER_LEG].copy_from_slice(qd.as_slice());
    }
}

/// Base-frame ground reaction force balancing joint torques: Jᵀ F = -τ.
fn foot_force_from_torque(jacobian: &Matrix3<f64>, tau: &Vector3<f64>) -> Vector3<f64> {
    let jt = jacobian.transpose();
    jt.lu().solve(&(-tau)).unwrap_or_else(|| {
        let damped = jacobian.transpose() * jacobian
            + Matrix3::identity() * (JACOBIAN_DAMPING * JACOBIAN_DAMPING);
        damped
            .cholesky()
            .map_or_else(Vector3::zeros, |chol| jacobian * chol.solve(&(-tau)))
    })
}
