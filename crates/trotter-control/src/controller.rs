//! Top-level locomotion controller.
//!
//! Owns the gait generator and both leg controllers, and turns one
//! [`RobotState`] into one [`HybridAction`] per control tick. Legs are
//! dispatched on their contact-state tag: stance legs get torque-only
//! commands from the held MPC forces, swing legs get PD position targets.

use nalgebra::Vector2;
use tracing::{debug, warn};

use trotter_core::{
    ConfigError, ContactState, ControlError, DesiredCommand, DynamicsParams, HybridAction, LegIndex,
    MotorCommand, MpcWeights, N_LEGS, RobotState, StanceConfig, TrotterConfig, ValidationError,
};

use crate::gait::GaitGenerator;
use crate::kinematics::RobotKinematics;
use crate::qp::QpSolver;
use crate::stance::{SolveReport, StanceController};
use crate::swing::SwingController;

/// Counters and flags describing degraded control.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerDiagnostics {
    /// Per-leg flag: the swing IK target was clamped into the workspace this tick.
    pub ik_clamped: [bool; N_LEGS],
    /// MPC solves that failed and fell back to the held forces.
    pub degraded_solves: u64,
    /// Ticks whose input state contained NaN or Inf.
    pub rejected_states: u64,
    /// Last successful solve.
    pub last_solve: Option<SolveReport>,
}

/// Whole-body locomotion controller.
#[derive(Debug)]
pub struct LocomotionController {
    config: TrotterConfig,
    kinematics: RobotKinematics,
    gait: GaitGenerator,
    swing: SwingController,
    stance: StanceController,
    command: DesiredCommand,
    last_action: Option<HybridAction>,
    diagnostics: ControllerDiagnostics,
}

impl LocomotionController {
    /// Validate `config` and build a controller backed by Clarabel.
    ///
    /// The solver gets the iteration cap from `stance.max_solver_iters` and
    /// the wall-clock cap from [`TrotterConfig::solve_time_limit`].
    pub fn new(config: TrotterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let stance = StanceController::new(StanceConfig {
            time_limit: config.solve_time_limit(),
            ..config.stance.clone()
        });
        Ok(Self::with_stance(config, stance))
    }

    /// Validate `config` and build a controller with a custom QP backend.
    pub fn with_solver(config: TrotterConfig, solver: Box<dyn QpSolver>) -> Result<Self, ConfigError> {
        config.validate()?;
        let stance = StanceController::with_solver(config.stance.clone(), solver);
        Ok(Self::with_stance(config, stance))
    }

    fn with_stance(config: TrotterConfig, stance: StanceController) -> Self {
        let kinematics = RobotKinematics::new(&config.robot);
        let gait = GaitGenerator::new(config.gait.clone());
        let swing = SwingController::new(
            config.swing.clone(),
            &config.robot,
            config.stance.desired_height,
        );
        Self {
            config,
            kinematics,
            gait,
            swing,
            stance,
            command: DesiredCommand::default(),
            last_action: None,
            diagnostics: ControllerDiagnostics::default(),
        }
    }

    /// Reset gait, swing memory, stance cache and the held action.
    pub fn reset(&mut self) {
        self.gait.reset();
        self.swing.reset();
        self.stance.reset();
        self.last_action = None;
        self.diagnostics.ik_clamped = [false; N_LEGS];
    }

    /// Store the desired planar velocity (yaw-aligned frame) and yaw rate.
    pub fn update(&mut self, desired_velocity: Vector2<f64>, desired_yaw_rate: f64) {
        self.command = DesiredCommand::new(desired_velocity, desired_yaw_rate);
    }

    /// Compute the 12-joint command for this tick.
    ///
    /// `weights` and `dynamics` are only read when `mpc_solve` is set.
    pub fn get_action(
        &mut self,
        state: &RobotState,
        mpc_solve: bool,
        weights: &MpcWeights,
        dynamics: &DynamicsParams,
    ) -> HybridAction {
        self.tick(state, mpc_solve.then_some(Ok((*weights, *dynamics))))
    }

    /// Flat-input form: 13 MPC weights, body mass and 9 row-major inertia values.
    ///
    /// Malformed inputs on a solve tick count as a degraded solve.
    pub fn get_action_from_slices(
        &mut self,
        state: &RobotState,
        mpc_solve: bool,
        weights: &[f64],
        mass: f64,
        inertia: &[f64],
    ) -> HybridAction {
        let inputs: Option<Result<_, ValidationError>> = mpc_solve.then(|| {
            let w = MpcWeights::from_slice(weights)?;
            let d = DynamicsParams::from_slice(mass, inertia)?;
            Ok((w, d))
        });
        self.tick(state, inputs)
    }

    fn tick(
        &mut self,
        state: &RobotState,
        solve_inputs: Option<Result<(MpcWeights, DynamicsParams), ValidationError>>,
    ) -> HybridAction {
        if !state.is_finite() {
            self.diagnostics.rejected_states += 1;
            warn!(time = state.time, "rejecting non-finite robot state");
            return self.fallback_action();
        }

        self.gait.update(state.time);
        let states = self.gait.leg_states();
        self.swing.update_lift_off(&states, state);

        if let Some(inputs) = solve_inputs {
            let result = inputs
                .map_err(ControlError::from)
                .and_then(|(weights, dynamics)| self.solve_stance(state, &states, &weights, &dynamics));
            match result {
                Ok(report) => self.diagnostics.last_solve = Some(report),
                Err(err) => {
                    self.diagnostics.degraded_solves += 1;
                    warn!(time = state.time, error = %err, "MPC solve failed, holding previous forces");
                }
            }
        }

        let mut action = HybridAction::default();
        for leg in LegIndex::ALL {
            let i = leg.index();
            let commands = match states[i] {
                ContactState::Stance => {
                    self.diagnostics.ik_clamped[i] = false;
                    self.stance.leg_command(leg, state, &self.kinematics)
                }
                ContactState::Swing => {
                    let (commands, clamped) = self.swing.leg_command(
                        leg,
                        self.gait.normalized_phase(leg),
                        self.gait.swing_duration(leg),
                        self.gait.stance_duration(),
                        state,
                        &self.command,
                        &self.kinematics,
                    );
                    if let Some(err) = &clamped {
                        if !self.diagnostics.ik_clamped[i] {
                            debug!(error = %err, "swing target clamped to workspace");
                        }
                    }
                    self.diagnostics.ik_clamped[i] = clamped.is_some();
                    commands
                }
            };
            action.set_leg(leg, commands);
        }

        if !action.is_finite() {
            warn!(time = state.time, "controller produced a non-finite action");
            return self.fallback_action();
        }
        self.last_action = Some(action);
        action
    }

    fn solve_stance(
        &mut self,
        state: &RobotState,
        current: &[ContactState; N_LEGS],
        weights: &MpcWeights,
        dynamics: &DynamicsParams,
    ) -> Result<SolveReport, ControlError> {
        let cfg = &self.config.stance;
        let mut schedule = self.gait.contact_schedule(state.time, cfg.horizon, cfg.dt);
        if let Some(first) = schedule.first_mut() {
            *first = *current;
        }
        self.stance.solve(state, &schedule, &self.command, weights, dynamics)
    }

    /// Previous action, or passive joint damping before the first valid tick.
    fn fallback_action(&self) -> HybridAction {
        self.last_action.unwrap_or_else(|| self.passive_action())
    }

    /// Zero stiffness, motor damping, zero torque on every joint.
    pub fn passive_action(&self) -> HybridAction {
        let kd = self.config.robot.motor_kd;
        let mut action = HybridAction::default();
        for leg in LegIndex::ALL {
            action.set_leg(
                leg,
                std::array::from_fn(|j| MotorCommand {
                    kd: kd[j],
                    ..MotorCommand::default()
                }),
            );
        }
        action
    }

    pub const fn diagnostics(&self) -> &ControllerDiagnostics {
        &self.diagnostics
    }

    pub const fn command(&self) -> &DesiredCommand {
        &self.command
    }

    pub const fn gait(&self) -> &GaitGenerator {
        &self.gait
    }

    pub const fn stance(&self) -> &StanceController {
        &self.stance
    }

    pub const fn swing(&self) -> &SwingController {
        &self.swing
    }

    pub const fn kinematics(&self) -> &RobotKinematics {
        &self.kinematics
    }

    pub const fn config(&self) -> &TrotterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::ClarabelQp;
    use nalgebra::Vector3;
    use trotter_core::{GaitConfig, N_JOINTS};

    fn standing_state(kin: &RobotKinematics, time: f64) -> RobotState {
        let feet = LegIndex::ALL.map(|leg| kin.nominal_foot_offset(leg) + Vector3::new(0.0, 0.0, -0.3));
        let mut joint_angles = [0.0; N_JOINTS];
        for leg in LegIndex::ALL {
            let ik = kin.inverse_kinematics(leg, &feet[leg.index()]);
            joint_angles[leg.first_joint()..leg.first_joint() + 3].copy_from_slice(ik.angles.as_slice());
        }
        RobotState {
            time,
            com_position: Vector3::new(0.0, 0.0, 0.3),
            com_velocity: Vector3::zeros(),
            orientation: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            joint_angles,
            joint_velocities: [0.0; N_JOINTS],
            foot_positions: feet,
        }
    }

    fn standing_controller() -> LocomotionController {
        let config = TrotterConfig {
            gait: GaitConfig::standing(),
            ..TrotterConfig::default()
        };
        LocomotionController::new(config).unwrap()
    }

    #[test]
    fn standing_tick_is_torque_only() {
        let mut ctrl = standing_controller();
        let state = standing_state(ctrl.kinematics(), 0.0);
        let action = ctrl.get_action(&state, true, &MpcWeights::default(), &DynamicsParams::a1());
        assert!(action.commands.iter().all(|c| c.kp == 0.0 && c.kd == 0.0));
        assert!(action.commands.iter().any(|c| c.torque.abs() > 0.1));
        assert_eq!(action.to_flat().len(), 60);
        let report = ctrl.diagnostics().last_solve.unwrap();
        assert!(report.converged());
    }

    #[test]
    fn non_solve_ticks_hold_force() {
        let mut ctrl = standing_controller();
        let state = standing_state(ctrl.kinematics(), 0.0);
        let a0 = ctrl.get_action(&state, true, &MpcWeights::default(), &DynamicsParams::a1());
        let held = *ctrl.stance().held_forces().unwrap();
        let mut later = state.clone();
        later.time = 0.005;
        // Weights passed on non-solve ticks are ignored, even invalid ones.
        let bad = MpcWeights { force_regularization: -1.0, ..MpcWeights::default() };
        let a1 = ctrl.get_action(&later, false, &bad, &DynamicsParams::a1());
        assert_eq!(*ctrl.stance().held_forces().unwrap(), held);
        assert_eq!(a0, a1);
        assert_eq!(ctrl.diagnostics().degraded_solves, 0);
    }

    #[test]
    fn malformed_slices_degrade_without_panic() {
        let mut ctrl = standing_controller();
        let state = standing_state(ctrl.kinematics(), 0.0);
        let action = ctrl.get_action_from_slices(&state, true, &[1.0; 5], 12.0, &[0.1; 9]);
        assert_eq!(ctrl.diagnostics().degraded_solves, 1);
        assert!(ctrl.stance().held_forces().is_none());
        // No cached force yet: stance legs command zero torque.
        assert!(action.commands.iter().all(|c| c.torque == 0.0));
    }

    #[test]
    fn slice_form_matches_typed_form() {
        let mut typed = standing_controller();
        let mut flat = standing_controller();
        let state = standing_state(typed.kinematics(), 0.0);
        let w = MpcWeights::default();
        let mut raw = w.state.to_vec();
        raw.push(w.force_regularization);
        let inertia = [0.07335, 0.0, 0.0, 0.0, 0.25068, 0.0, 0.0, 0.0, 0.25447];
        let a = typed.get_action(&state, true, &w, &DynamicsParams::a1());
        let b = flat.get_action_from_slices(&state, true, &raw, 12.454, &inertia);
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_state_returns_previous_or_passive() {
        let mut ctrl = standing_controller();
        let mut bad = standing_state(ctrl.kinematics(), 0.0);
        bad.com_velocity.x = f64::NAN;

        let passive = ctrl.get_action(&bad, true, &MpcWeights::default(), &DynamicsParams::a1());
        assert_eq!(passive, ctrl.passive_action());
        assert!(passive.commands.iter().all(|c| c.kp == 0.0 && c.kd > 0.0 && c.torque == 0.0));

        let good = standing_state(ctrl.kinematics(), 0.001);
        let action = ctrl.get_action(&good, true, &MpcWeights::default(), &DynamicsParams::a1());
        let held = ctrl.get_action(&bad, false, &MpcWeights::default(), &DynamicsParams::a1());
        assert_eq!(held, action);
        assert_eq!(ctrl.diagnostics().rejected_states, 2);
    }

    #[test]
    fn trot_swing_legs_use_position_gains() {
        let mut ctrl = LocomotionController::new(TrotterConfig::default()).unwrap();
        ctrl.update(Vector2::new(0.5, 0.0), 0.0);
        // FR/RL are in swing at 0.1 s.
        let state = standing_state(ctrl.kinematics(), 0.1);
        let action = ctrl.get_action(&state, true, &MpcWeights::default(), &DynamicsParams::a1());
        assert_eq!(ctrl.gait().leg_state(LegIndex::FrontRight), ContactState::Swing);
        assert_eq!(ctrl.gait().leg_state(LegIndex::FrontLeft), ContactState::Stance);
        assert!(action.leg(LegIndex::FrontRight).iter().all(|c| c.kp > 0.0 && c.torque == 0.0));
        assert!(action.leg(LegIndex::RearLeft).iter().all(|c| c.kp > 0.0));
        assert!(action.leg(LegIndex::FrontLeft).iter().all(|c| c.kp == 0.0));
        let forces = ctrl.stance().held_forces().unwrap();
        assert_eq!(forces[LegIndex::FrontRight.index()], Vector3::zeros());
    }

    #[test]
    fn reset_clears_state() {
        let mut ctrl = standing_controller();
        let state = standing_state(ctrl.kinematics(), 0.0);
        ctrl.get_action(&state, true, &MpcWeights::default(), &DynamicsParams::a1());
        ctrl.reset();
        assert!(ctrl.stance().held_forces().is_none());
        let mut bad = state;
        bad.time = f64::INFINITY;
        let action = ctrl.get_action(&bad, false, &MpcWeights::default(), &DynamicsParams::a1());
        assert_eq!(action, ctrl.passive_action());
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = TrotterConfig::default();
        config.gait.duty_factor[0] = 0.0;
        let err = LocomotionController::new(config).unwrap_err();
        assert!(err.to_string().contains("duty_factor[0]"));

        let mut config = TrotterConfig::default();
        config.stance.horizon = 0;
        let err = LocomotionController::with_solver(config, Box::new(ClarabelQp::new(20, None))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
