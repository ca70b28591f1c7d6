//! Open-loop gait generator.
//!
//! Each leg runs the same periodic law, driven by the simulation clock:
//!
//! ```text
//! cycle = stance_duration / duty
//! p     = frac(t / cycle + initial_phase)          // full-cycle phase
//! ratio = duty        (leg starts in stance)
//!       = 1 - duty    (leg starts in swing)
//! p < ratio  -> initial state, progress p / ratio
//! otherwise  -> other state,   progress (p - ratio) / (1 - ratio)
//! ```
//!
//! Because the law depends only on absolute time, the generator is
//! deterministic and replayable, and future contact states over the MPC
//! horizon come from the same function.

use trotter_core::{ContactState, GaitConfig, GaitState, LegIndex, N_LEGS};

/// Per-leg gait state machine.
#[derive(Clone, Debug)]
pub struct GaitGenerator {
    config: GaitConfig,
    /// Normalized progress within the current state, [0, 1).
    phases: [f64; N_LEGS],
    states: [ContactState; N_LEGS],
}

impl GaitGenerator {
    /// Create a generator. The config is assumed to be validated.
    pub fn new(config: GaitConfig) -> Self {
        let mut gait = Self {
            config,
            phases: [0.0; N_LEGS],
            states: [ContactState::Stance; N_LEGS],
        };
        gait.reset();
        gait
    }

    /// Phases to the configured initial phase, states to the initial states.
    pub fn reset(&mut self) {
        for leg in LegIndex::ALL {
            let (state, progress) = self.state_at(leg, 0.0);
            self.states[leg.index()] = state;
            self.phases[leg.index()] = progress;
        }
    }

    /// Advance every leg to the simulation time `sim_time`.
    pub fn update(&mut self, sim_time: f64) {
        for leg in LegIndex::ALL {
            let (state, progress) = self.state_at(leg, sim_time);
            self.states[leg.index()] = state;
            self.phases[leg.index()] = progress;
        }
    }

    /// Contact state and normalized progress of `leg` at time `t`.
    pub fn state_at(&self, leg: LegIndex, t: f64) -> (ContactState, f64) {
        let i = leg.index();
        let duty = self.config.duty_factor[i];
        let initial = self.config.initial_state[i];
        let p = full_cycle_phase(t, self.cycle_length(leg), self.config.initial_phase[i]);
        if duty >= 1.0 {
            return (ContactState::Stance, p);
        }

        let ratio = match initial {
            ContactState::Stance => duty,
            ContactState::Swing => 1.0 - duty,
        };
        if p < ratio {
            (initial, unit_phase(p / ratio))
        } else {
            (initial.flipped(), unit_phase((p - ratio) / (1.0 - ratio)))
        }
    }

    /// Predicted contact states at `horizon` knots spaced `dt` apart,
    /// starting at `t0` (knot 0 is the state at `t0`).
    pub fn contact_schedule(&self, t0: f64, horizon: usize, dt: f64) -> Vec<[ContactState; N_LEGS]> {
        (0..horizon)
            .map(|k| {
                let t = t0 + k as f64 * dt;
                LegIndex::ALL.map(|leg| self.state_at(leg, t).0)
            })
            .collect()
    }

    pub fn leg_state(&self, leg: LegIndex) -> ContactState {
        self.states[leg.index()]
    }

    /// Contact states of all legs after the last `update`.
    pub const fn leg_states(&self) -> [ContactState; N_LEGS] {
        self.states
    }

    /// Progress within the current contact state, [0, 1).
    pub fn normalized_phase(&self, leg: LegIndex) -> f64 {
        self.phases[leg.index()]
    }

    pub fn gait_state(&self, leg: LegIndex) -> GaitState {
        GaitState {
            phase: self.normalized_phase(leg),
            contact_state: self.leg_state(leg),
            cycle_length: self.cycle_length(leg),
            duty_factor: self.config.duty_factor[leg.index()],
        }
    }

    pub const fn stance_duration(&self) -> f64 {
        self.config.stance_duration
    }

    /// Swing duration of `leg`; zero for a permanent-stance leg.
    pub fn swing_duration(&self, leg: LegIndex) -> f64 {
        let duty = self.config.duty_factor[leg.index()];
        self.cycle_length(leg) * (1.0 - duty)
    }

    pub fn cycle_length(&self, leg: LegIndex) -> f64 {
        self.config.stance_duration / self.config.duty_factor[leg.index()]
    }

    pub const fn config(&self) -> &GaitConfig {
        &self.config
    }
}

fn full_cycle_phase(t: f64, cycle: f64, offset: f64) -> f64 {
    unit_phase((t / cycle + offset).rem_euclid(1.0))
}

/// Keep a phase in [0, 1) against rounding up to exactly 1.0.
fn unit_phase(p: f64) -> f64 {
    if p >= 1.0 || p.is_nan() { 0.0 } else { p.max(0.0) }
}
