use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ContactState, JOINTS_PER_LEG, N_LEGS};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_hip_offsets() -> [[f64; 3]; N_LEGS] {
    [
        [0.183, -0.047, 0.0],
        [0.183, 0.047, 0.0],
        [-0.183, -0.047, 0.0],
        [-0.183, 0.047, 0.0],
    ]
}
const fn default_abduction_length() -> f64 {
    0.08505
}
const fn default_link_length() -> f64 {
    0.2
}
const fn default_knee_range() -> [f64; 2] {
    [-2.697, -0.916]
}
const fn default_motor_kp() -> [f64; JOINTS_PER_LEG] {
    [100.0, 100.0, 100.0]
}
const fn default_motor_kd() -> [f64; JOINTS_PER_LEG] {
    [1.0, 2.0, 2.0]
}
const fn default_stance_duration() -> f64 {
    0.3
}
const fn default_duty_factor() -> [f64; N_LEGS] {
    [0.6; N_LEGS]
}
const fn default_initial_phase() -> [f64; N_LEGS] {
    [0.9, 0.0, 0.0, 0.9]
}
const fn default_initial_state() -> [ContactState; N_LEGS] {
    [
        ContactState::Swing,
        ContactState::Stance,
        ContactState::Stance,
        ContactState::Swing,
    ]
}
const fn default_foot_clearance() -> f64 {
    0.01
}
const fn default_max_clearance() -> f64 {
    0.1
}
const fn default_raibert_kv() -> f64 {
    0.03
}
const fn default_max_step_length() -> f64 {
    0.2
}
const fn default_horizon() -> usize {
    10
}
const fn default_mpc_dt() -> f64 {
    0.025
}
const fn default_friction_coeff() -> f64 {
    0.45
}
const fn default_f_max() -> f64 {
    200.0
}
const fn default_desired_height() -> f64 {
    0.3
}
const fn default_max_solver_iters() -> u32 {
    20
}
const fn default_gravity() -> f64 {
    9.81
}
const fn default_control_dt() -> f64 {
    0.001
}
const fn default_mpc_decimation() -> u32 {
    20
}

fn check_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

// ---------------------------------------------------------------------------
// TrotterConfig
// ---------------------------------------------------------------------------

/// Top-level controller + harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrotterConfig {
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub gait: GaitConfig,
    #[serde(default)]
    pub swing: SwingConfig,
    #[serde(default)]
    pub stance: StanceConfig,
    #[serde(default)]
    pub control_loop: LoopConfig,
}

impl TrotterConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.robot.validate()?;
        self.gait.validate()?;
        self.swing.validate()?;
        self.stance.validate()?;
        self.control_loop.validate()
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Wall-clock cap handed to the QP solver.
    ///
    /// An explicit `stance.time_limit` wins; otherwise one control period
    /// when `control_loop.limit_solve_to_period` is set.
    pub fn solve_time_limit(&self) -> Option<f64> {
        self.stance.time_limit.or_else(|| {
            self.control_loop
                .limit_solve_to_period
                .then_some(self.control_loop.control_dt)
        })
    }
}

// ---------------------------------------------------------------------------
// RobotConfig
// ---------------------------------------------------------------------------

/// Leg geometry and motor gains. Defaults describe a Unitree A1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Hip joint positions relative to the COM, base frame, per leg.
    #[serde(default = "default_hip_offsets")]
    pub hip_offsets: [[f64; 3]; N_LEGS],

    /// Lateral offset from hip to thigh (unsigned; sign comes from the leg side).
    #[serde(default = "default_abduction_length")]
    pub abduction_length: f64,

    #[serde(default = "default_link_length")]
    pub upper_leg_length: f64,

    #[serde(default = "default_link_length")]
    pub lower_leg_length: f64,

    /// Knee joint range [min, max] in radians (negative = folded backwards).
    #[serde(default = "default_knee_range")]
    pub knee_range: [f64; 2],

    /// Position gains per joint of a leg (hip, thigh, calf).
    #[serde(default = "default_motor_kp")]
    pub motor_kp: [f64; JOINTS_PER_LEG],

    /// Velocity gains per joint of a leg.
    #[serde(default = "default_motor_kd")]
    pub motor_kd: [f64; JOINTS_PER_LEG],
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            hip_offsets: default_hip_offsets(),
            abduction_length: default_abduction_length(),
            upper_leg_length: default_link_length(),
            lower_leg_length: default_link_length(),
            knee_range: default_knee_range(),
            motor_kp: default_motor_kp(),
            motor_kd: default_motor_kd(),
        }
    }
}

impl RobotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("robot.abduction_length", self.abduction_length)?;
        check_positive("robot.upper_leg_length", self.upper_leg_length)?;
        check_positive("robot.lower_leg_length", self.lower_leg_length)?;
        let [lo, hi] = self.knee_range;
        if !(lo < hi && hi <= 0.0 && lo >= -std::f64::consts::PI) {
            return Err(ConfigError::invalid(
                "robot.knee_range",
                format!("expected -pi <= min < max <= 0, got [{lo}, {hi}]"),
            ));
        }
        if self
            .motor_kp
            .iter()
            .chain(&self.motor_kd)
            .any(|g| !g.is_finite() || *g < 0.0)
        {
            return Err(ConfigError::invalid("robot.motor_kp/kd", "gains must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GaitConfig
// ---------------------------------------------------------------------------

/// Open-loop gait parameters, one entry per leg where applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitConfig {
    /// Stance duration in seconds (shared by all legs).
    #[serde(default = "default_stance_duration")]
    pub stance_duration: f64,

    /// Fraction of the cycle spent in stance, per leg. 1.0 = always stance.
    #[serde(default = "default_duty_factor")]
    pub duty_factor: [f64; N_LEGS],

    /// Full-cycle phase offset per leg, in [0, 1).
    #[serde(default = "default_initial_phase")]
    pub initial_phase: [f64; N_LEGS],

    /// Contact state each leg starts its cycle in.
    #[serde(default = "default_initial_state")]
    pub initial_state: [ContactState; N_LEGS],
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self::trotting()
    }
}

impl GaitConfig {
    /// All four feet on the ground.
    pub fn standing() -> Self {
        Self {
            stance_duration: default_stance_duration(),
            duty_factor: [1.0; N_LEGS],
            initial_phase: [0.0; N_LEGS],
            initial_state: [ContactState::Stance; N_LEGS],
        }
    }

    /// Diagonal pairs FR/RL and FL/RR alternate.
    pub fn trotting() -> Self {
        Self {
            stance_duration: default_stance_duration(),
            duty_factor: default_duty_factor(),
            initial_phase: default_initial_phase(),
            initial_state: default_initial_state(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("gait.stance_duration", self.stance_duration)?;
        for (i, &d) in self.duty_factor.iter().enumerate() {
            if !(d > 0.0 && d <= 1.0) {
                return Err(ConfigError::invalid(
                    format!("gait.duty_factor[{i}]"),
                    format!("must be in (0, 1], got {d}"),
                ));
            }
        }
        for (i, &p) in self.initial_phase.iter().enumerate() {
            if !(0.0..1.0).contains(&p) {
                return Err(ConfigError::invalid(
                    format!("gait.initial_phase[{i}]"),
                    format!("must be in [0, 1), got {p}"),
                ));
            }
        }
        for (i, (&d, &s)) in self.duty_factor.iter().zip(&self.initial_state).enumerate() {
            // A swing-initial leg with duty 1 would have a zero-length first state.
            if d >= 1.0 && s == ContactState::Swing {
                return Err(ConfigError::invalid(
                    format!("gait.initial_state[{i}]"),
                    "duty factor 1 requires a stance initial state",
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SwingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingConfig {
    /// Touchdown height above the ground plane implied by the desired body height.
    #[serde(default = "default_foot_clearance")]
    pub foot_clearance: f64,

    /// Peak height of the swing arc above the lift-off/touchdown line.
    #[serde(default = "default_max_clearance")]
    pub max_clearance: f64,

    /// Raibert velocity feedback gain.
    #[serde(default = "default_raibert_kv")]
    pub raibert_kv: f64,

    /// Horizontal reach limit of the touchdown target around the hip.
    #[serde(default = "default_max_step_length")]
    pub max_step_length: f64,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            foot_clearance: default_foot_clearance(),
            max_clearance: default_max_clearance(),
            raibert_kv: default_raibert_kv(),
            max_step_length: default_max_step_length(),
        }
    }
}

impl SwingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.foot_clearance.is_finite() && self.foot_clearance >= 0.0) {
            return Err(ConfigError::invalid("swing.foot_clearance", "must be >= 0"));
        }
        if !(self.max_clearance.is_finite() && self.max_clearance >= 0.0) {
            return Err(ConfigError::invalid("swing.max_clearance", "must be >= 0"));
        }
        if !self.raibert_kv.is_finite() {
            return Err(ConfigError::invalid("swing.raibert_kv", "must be finite"));
        }
        check_positive("swing.max_step_length", self.max_step_length)
    }
}

// ---------------------------------------------------------------------------
// StanceConfig
// ---------------------------------------------------------------------------

/// Convex MPC settings. Weights and dynamics are supplied per solve, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StanceConfig {
    /// Prediction horizon (number of knots).
    #[serde(default = "default_horizon")]
    pub horizon: usize,

    /// Knot spacing in seconds.
    #[serde(default = "default_mpc_dt")]
    pub dt: f64,

    /// Ground friction coefficient (Coulomb).
    #[serde(default = "default_friction_coeff")]
    pub friction_coeff: f64,

    /// Minimum normal force for a stance foot in N.
    #[serde(default)]
    pub f_min: f64,

    /// Maximum normal force for a stance foot in N.
    #[serde(default = "default_f_max")]
    pub f_max: f64,

    /// Target COM height above the ground in m.
    #[serde(default = "default_desired_height")]
    pub desired_height: f64,

    /// Interior-point iteration cap. Hitting it counts as a failed solve and
    /// the held forces are reused.
    #[serde(default = "default_max_solver_iters")]
    pub max_solver_iters: u32,

    /// Optional wall-clock limit per solve in seconds. Off by default so
    /// results do not depend on host speed.
    #[serde(default)]
    pub time_limit: Option<f64>,

    #[serde(default = "default_gravity")]
    pub gravity: f64,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            dt: default_mpc_dt(),
            friction_coeff: default_friction_coeff(),
            f_min: 0.0,
            f_max: default_f_max(),
            desired_height: default_desired_height(),
            max_solver_iters: default_max_solver_iters(),
            time_limit: None,
            gravity: default_gravity(),
        }
    }
}

impl StanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon == 0 {
            return Err(ConfigError::invalid("stance.horizon", "must be >= 1"));
        }
        check_positive("stance.dt", self.dt)?;
        check_positive("stance.friction_coeff", self.friction_coeff)?;
        check_positive("stance.desired_height", self.desired_height)?;
        check_positive("stance.gravity", self.gravity)?;
        if !(self.f_min.is_finite() && self.f_min >= 0.0 && self.f_min <= self.f_max) {
            return Err(ConfigError::invalid(
                "stance.f_min",
                format!("expected 0 <= f_min <= f_max, got {} / {}", self.f_min, self.f_max),
            ));
        }
        check_positive("stance.f_max", self.f_max)?;
        if self.max_solver_iters == 0 {
            return Err(ConfigError::invalid("stance.max_solver_iters", "must be >= 1"));
        }
        if let Some(limit) = self.time_limit {
            check_positive("stance.time_limit", limit)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

/// Control-loop cadence used by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Control (and plant integration) period in seconds.
    #[serde(default = "default_control_dt")]
    pub control_dt: f64,

    /// Control ticks per MPC solve. The first tick always solves.
    #[serde(default = "default_mpc_decimation")]
    pub mpc_decimation: u32,

    /// Abort any MPC solve that runs longer than `control_dt`.
    #[serde(default)]
    pub limit_solve_to_period: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            control_dt: default_control_dt(),
            mpc_decimation: default_mpc_decimation(),
            limit_solve_to_period: false,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("control_loop.control_dt", self.control_dt)?;
        if self.mpc_decimation == 0 {
            return Err(ConfigError::invalid("control_loop.mpc_decimation", "must be >= 1"));
        }
        Ok(())
    }

    /// Control rate in Hz.
    pub fn control_hz(&self) -> f64 {
        1.0 / self.control_dt
    }

    /// MPC solve rate in Hz.
    pub fn mpc_hz(&self) -> f64 {
        self.control_hz() / f64::from(self.mpc_decimation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_config_is_valid() {
        TrotterConfig::default().validate().unwrap();
        GaitConfig::standing().validate().unwrap();
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = TrotterConfig::from_toml_str("").unwrap();
        assert_eq!(config, TrotterConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = TrotterConfig::from_toml_str(
            r#"
            [stance]
            horizon = 12
            time_limit = 0.004

            [gait]
            duty_factor = [1.0, 1.0, 1.0, 1.0]
            initial_phase = [0.0, 0.0, 0.0, 0.0]
            initial_state = ["stance", "stance", "stance", "stance"]
            "#,
        )
        .unwrap();
        assert_eq!(config.stance.horizon, 12);
        assert_eq!(config.stance.time_limit, Some(0.004));
        assert_relative_eq!(config.stance.dt, 0.025);
        assert_eq!(config.gait, GaitConfig::standing());
    }

    #[test]
    fn sample_config_matches_defaults() {
        let config = TrotterConfig::from_toml_str(include_str!("../../../config/a1.toml")).unwrap();
        assert_eq!(config, TrotterConfig::default());
    }

    #[test]
    fn invalid_duty_rejected() {
        let mut gait = GaitConfig::trotting();
        gait.duty_factor[2] = 0.0;
        let err = gait.validate().unwrap_err();
        assert!(err.to_string().contains("duty_factor[2]"));
    }

    #[test]
    fn swing_initial_with_full_duty_rejected() {
        let mut gait = GaitConfig::trotting();
        gait.duty_factor = [1.0; N_LEGS];
        assert!(gait.validate().is_err());
    }

    #[test]
    fn stance_force_bounds_checked() {
        let stance = StanceConfig {
            f_min: 300.0,
            ..StanceConfig::default()
        };
        assert!(stance.validate().is_err());
    }

    #[test]
    fn knee_range_checked() {
        let robot = RobotConfig {
            knee_range: [-0.5, -1.0],
            ..RobotConfig::default()
        };
        assert!(robot.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = TrotterConfig::from_toml_str("[stance]\nhorizon = \"ten\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn solve_time_limit_follows_control_period() {
        let mut config = TrotterConfig::default();
        assert_eq!(config.solve_time_limit(), None);

        config.control_loop.limit_solve_to_period = true;
        config.control_loop.control_dt = 0.002;
        assert_eq!(config.solve_time_limit(), Some(0.002));

        config.stance.time_limit = Some(0.0005);
        assert_eq!(config.solve_time_limit(), Some(0.0005));
    }

    #[test]
    fn loop_rates() {
        let lc = LoopConfig::default();
        assert_relative_eq!(lc.control_hz(), 1000.0);
        assert_relative_eq!(lc.mpc_hz(), 50.0);
    }
}
