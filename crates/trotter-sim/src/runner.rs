//! Fixed-rate control loop tying the controller to the plant.
//!
//! Each tick reads the plant state, looks up the commanded velocity, asks the
//! controller for an action (flagging an MPC solve every `mpc_decimation`
//! ticks, starting with the first) and integrates the plant by one control
//! period.

use nalgebra::{Vector2, Vector3};
use tracing::{info, warn};

use trotter_control::LocomotionController;
use trotter_core::{
    ConfigError, ContactState, DynamicsParams, HybridAction, LegIndex, MpcWeights, N_LEGS,
    TrotterConfig,
};

use crate::plant::{Plant, PlantConfig};

/// COM height below which the robot counts as fallen.
const FALL_HEIGHT: f64 = 0.12;

/// Length of [`VelocitySchedule::harness`] in seconds.
pub const HARNESS_DURATION: f64 = 18.0;

// ---------------------------------------------------------------------------
// VelocitySchedule
// ---------------------------------------------------------------------------

/// Piecewise-constant command: each entry holds from its start time until the next.
#[derive(Clone, Debug, PartialEq)]
pub struct VelocitySchedule {
    /// (start time, planar velocity, yaw rate), sorted by time.
    segments: Vec<(f64, Vector2<f64>, f64)>,
}

impl VelocitySchedule {
    pub fn constant(velocity: Vector2<f64>, yaw_rate: f64) -> Self {
        Self {
            segments: vec![(0.0, velocity, yaw_rate)],
        }
    }

    /// Benchmark profile: 3 s each of forward, backward, left, right, then
    /// turning left and right in place, followed by a stop.
    pub fn harness() -> Self {
        const VX: f64 = 1.5;
        const VY: f64 = 0.75;
        const WZ: f64 = 2.0;
        let segments = [
            (Vector2::new(VX, 0.0), 0.0),
            (Vector2::new(-VX, 0.0), 0.0),
            (Vector2::new(0.0, VY), 0.0),
            (Vector2::new(0.0, -VY), 0.0),
            (Vector2::zeros(), WZ),
            (Vector2::zeros(), -WZ),
            (Vector2::zeros(), 0.0),
        ];
        Self {
            segments: segments
                .into_iter()
                .enumerate()
                .map(|(i, (v, yaw))| (3.0 * i as f64, v, yaw))
                .collect(),
        }
    }

    /// Build from segments. Start times must be finite and strictly increasing.
    pub fn new(segments: Vec<(f64, Vector2<f64>, f64)>) -> Result<Self, ConfigError> {
        if segments.is_empty() {
            return Err(ConfigError::invalid("schedule", "at least one segment required"));
        }
        if segments.windows(2).any(|w| w[1].0 <= w[0].0) || segments.iter().any(|s| !s.0.is_finite()) {
            return Err(ConfigError::invalid(
                "schedule",
                "segment start times must be finite and increasing",
            ));
        }
        Ok(Self { segments })
    }

    /// Command in effect at `t`. Times before the first segment use the first.
    pub fn command_at(&self, t: f64) -> (Vector2<f64>, f64) {
        let idx = self.segments.partition_point(|s| s.0 <= t).saturating_sub(1);
        let (_, v, yaw) = self.segments[idx];
        (v, yaw)
    }
}

impl Default for VelocitySchedule {
    fn default() -> Self {
        Self::constant(Vector2::zeros(), 0.0)
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// What happened during one control tick.
#[derive(Clone, Debug)]
pub struct TickRecord {
    pub time: f64,
    pub com_position: Vector3<f64>,
    pub com_velocity: Vector3<f64>,
    pub orientation: Vector3<f64>,
    pub contact_states: [ContactState; N_LEGS],
    /// World-frame ground reaction forces realised by the plant.
    pub ground_forces: [Vector3<f64>; N_LEGS],
    /// Forces held by the stance controller after this tick.
    pub held_forces: Option<[Vector3<f64>; N_LEGS]>,
    pub swing_targets: [Option<Vector3<f64>>; N_LEGS],
    pub mpc_solved: bool,
    pub action: HybridAction,
}

/// Aggregate results of a run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub records: Vec<TickRecord>,
    pub degraded_solves: u64,
    pub rejected_states: u64,
    pub fell: bool,
}

impl RunSummary {
    /// Mean world-frame COM velocity over records with `time >= from`.
    pub fn mean_velocity_since(&self, from: f64) -> Vector3<f64> {
        let window: Vec<_> = self.records.iter().filter(|r| r.time >= from).collect();
        if window.is_empty() {
            return Vector3::zeros();
        }
        window.iter().map(|r| r.com_velocity).sum::<Vector3<f64>>() / window.len() as f64
    }

    /// Mean total vertical ground force over records with `time >= from`.
    pub fn mean_vertical_force_since(&self, from: f64) -> f64 {
        let window: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.time >= from)
            .map(|r| r.ground_forces.iter().map(|f| f.z).sum())
            .collect();
        if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }

    pub fn final_position(&self) -> Option<Vector3<f64>> {
        self.records.last().map(|r| r.com_position)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Closed-loop harness: plant + controller + command schedule.
#[derive(Debug)]
pub struct Runner {
    config: TrotterConfig,
    plant: Plant,
    controller: LocomotionController,
    schedule: VelocitySchedule,
    weights: MpcWeights,
    dynamics: DynamicsParams,
    ticks: u64,
}

impl Runner {
    /// Validate `config` and place the plant at rest in the nominal stance.
    pub fn new(config: TrotterConfig, schedule: VelocitySchedule) -> Result<Self, ConfigError> {
        let controller = LocomotionController::new(config.clone())?;
        let plant_config = PlantConfig {
            initial_height: config.stance.desired_height,
            gravity: config.stance.gravity,
            ..PlantConfig::default()
        };
        let plant = Plant::new(plant_config, &config.robot);
        let dynamics = plant.config().dynamics;
        Ok(Self {
            controller,
            config,
            plant,
            schedule,
            weights: MpcWeights::default(),
            dynamics,
            ticks: 0,
        })
    }

    pub fn reset(&mut self) {
        self.plant.reset();
        self.controller.reset();
        self.ticks = 0;
    }

    /// Advance one control period.
    pub fn step(&mut self) -> TickRecord {
        let state = self.plant.state();
        let (velocity, yaw_rate) = self.schedule.command_at(state.time);
        self.controller.update(velocity, yaw_rate);

        let mpc_solved = self.ticks % u64::from(self.config.control_loop.mpc_decimation) == 0;
        let action = self
            .controller
            .get_action(&state, mpc_solved, &self.weights, &self.dynamics);
        self.plant.step(&action, self.config.control_loop.control_dt);
        self.ticks += 1;

        let gait = self.controller.gait();
        TickRecord {
            time: state.time,
            com_position: state.com_position,
            com_velocity: state.com_velocity,
            orientation: state.orientation,
            contact_states: gait.leg_states(),
            ground_forces: *self.plant.contact_forces(),
            held_forces: self.controller.stance().held_forces().copied(),
            swing_targets: LegIndex::ALL.map(|leg| self.controller.swing().touchdown_target(leg)),
            mpc_solved,
            action,
        }
    }

    /// Run for `duration` seconds, stopping early if the robot falls.
    pub fn run(&mut self, duration: f64) -> RunSummary {
        let dt = self.config.control_loop.control_dt;
        let steps = (duration / dt).round() as u64;
        info!(duration, steps, "starting run");

        let mut summary = RunSummary::default();
        for _ in 0..steps {
            let record = self.step();
            let height = record.com_position.z;
            summary.records.push(record);
            if height < FALL_HEIGHT || !height.is_finite() {
                warn!(time = self.plant.time(), height, "robot fell, stopping run");
                summary.fell = true;
                break;
            }
        }

        let diagnostics = self.controller.diagnostics();
        summary.degraded_solves = diagnostics.degraded_solves;
        summary.rejected_states = diagnostics.rejected_states;
        info!(
            ticks = summary.records.len(),
            degraded = summary.degraded_solves,
            fell = summary.fell,
            "run finished"
        );
        summary
    }

    pub const fn plant(&self) -> &Plant {
        &self.plant
    }

    pub const fn controller(&self) -> &LocomotionController {
        &self.controller
    }
}
