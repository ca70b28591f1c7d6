//! Closed-loop scenarios: controller driving the rigid-body plant.
//!
//! Checks that:
//! 1. Standing settles with the weight carried by the feet and no drift
//! 2. Between MPC solves the held forces stay identical while swing targets move
//! 3. Trotting keeps diagonal pairs synchronised and tracks forward and
//!    lateral commands

use nalgebra::Vector2;
use trotter_core::{ContactState, GaitConfig, LegIndex, TrotterConfig};
use trotter_sim::{Runner, VelocitySchedule};

const MASS: f64 = 12.454;
const GRAVITY: f64 = 9.81;

fn standing_config() -> TrotterConfig {
    TrotterConfig {
        gait: GaitConfig::standing(),
        ..TrotterConfig::default()
    }
}

#[test]
fn standing_supports_weight_and_settles() {
    let mut runner = Runner::new(standing_config(), VelocitySchedule::default()).unwrap();
    let summary = runner.run(2.0);
    assert!(!summary.fell, "robot fell while standing");
    assert_eq!(summary.degraded_solves, 0);

    let fz = summary.mean_vertical_force_since(1.5);
    let weight = MASS * GRAVITY;
    assert!(
        (fz - weight).abs() < 0.05 * weight,
        "mean vertical force {fz:.2} N, weight {weight:.2} N"
    );

    let v = summary.mean_velocity_since(1.5);
    assert!(v.norm() < 0.02, "COM drifting at {v:?}");

    let last = summary.records.last().unwrap();
    for rec in &summary.records {
        assert!(rec.contact_states.iter().all(|s| *s == ContactState::Stance));
    }
    assert!(last.orientation.x.abs() < 0.05 && last.orientation.y.abs() < 0.05);
    assert!((last.com_position.z - 0.3).abs() < 0.05, "height {}", last.com_position.z);
}

#[test]
fn held_forces_constant_between_solves() {
    let config = TrotterConfig::default();
    let mut runner = Runner::new(config, VelocitySchedule::constant(Vector2::new(0.5, 0.0), 0.0)).unwrap();
    let records: Vec<_> = (0..200).map(|_| runner.step()).collect();

    let mut checked_swing = false;
    for pair in records.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if !b.mpc_solved {
            assert_eq!(a.held_forces, b.held_forces, "force changed at t={}", b.time);
        }
        for leg in LegIndex::ALL {
            let i = leg.index();
            let same_swing = a.contact_states[i] == ContactState::Swing
                && b.contact_states[i] == ContactState::Swing;
            if same_swing {
                let ta = a.action.leg(leg)[1].position;
                let tb = b.action.leg(leg)[1].position;
                assert!((ta - tb).abs() > 0.0, "{leg:?} swing target frozen at t={}", b.time);
                checked_swing = true;
            }
        }
    }
    assert!(checked_swing, "no swing phase observed");
}

#[test]
fn trot_tracks_forward_velocity() {
    let schedule = VelocitySchedule::constant(Vector2::new(1.0, 0.0), 0.0);
    let mut runner = Runner::new(TrotterConfig::default(), schedule).unwrap();
    let summary = runner.run(5.0);
    assert!(!summary.fell, "robot fell while trotting");

    for rec in &summary.records {
        let s = rec.contact_states;
        assert_eq!(s[LegIndex::FrontRight.index()], s[LegIndex::RearLeft.index()]);
        assert_eq!(s[LegIndex::FrontLeft.index()], s[LegIndex::RearRight.index()]);
    }

    let v = summary.mean_velocity_since(3.0);
    // Raibert placement settles slightly fast; anything past 20% is a regression.
    assert!(v.x > 0.95 && v.x < 1.2, "mean forward velocity {:.3} m/s", v.x);

    let end = summary.final_position().unwrap();
    assert!(end.x > 2.0, "only travelled {:.2} m", end.x);
}

#[test]
fn trot_tracks_lateral_velocity() {
    let schedule = VelocitySchedule::constant(Vector2::new(0.0, 0.75), 0.0);
    let mut runner = Runner::new(TrotterConfig::default(), schedule).unwrap();
    let summary = runner.run(5.0);
    assert!(!summary.fell, "robot fell while side-stepping");

    let v = summary.mean_velocity_since(3.0);
    assert!((v.y - 0.75).abs() < 0.2, "mean lateral velocity {:.3} m/s", v.y);
}

#[test]
fn slice_inputs_from_wrapper_are_equivalent() {
    // The flat-slice entry point must behave like the typed one over a run.
    use trotter_control::LocomotionController;
    use trotter_core::{DynamicsParams, MpcWeights};
    use trotter_sim::{Plant, PlantConfig};

    let config = TrotterConfig::default();
    let mut plant = Plant::new(PlantConfig::default(), &config.robot);
    let mut typed = LocomotionController::new(config.clone()).unwrap();
    let mut flat = LocomotionController::new(config.clone()).unwrap();
    let weights = MpcWeights::default();
    let mut raw = weights.state.to_vec();
    raw.push(weights.force_regularization);
    let dynamics = DynamicsParams::a1();
    let inertia: Vec<f64> = dynamics.inertia.transpose().iter().copied().collect();

    for tick in 0..100_u32 {
        let state = plant.state();
        let solve = tick % 20 == 0;
        let a = typed.get_action(&state, solve, &weights, &dynamics);
        let b = flat.get_action_from_slices(&state, solve, &raw, dynamics.mass, &inertia);
        assert_eq!(a, b);
        plant.step(&a, config.control_loop.control_dt);
    }
}
