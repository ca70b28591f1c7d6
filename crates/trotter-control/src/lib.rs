//! Whole-body locomotion control for a quadruped.
//!
//! The pipeline per control tick:
//!
//! 1. **Gait generator**: open-loop per-leg contact schedule from the sim clock
//! 2. **Swing controller**: Raibert touchdown target, Bezier foot trajectory, IK
//! 3. **Stance controller**: convex MPC over ground reaction forces on a
//!    single-rigid-body model, solved with Clarabel at a lower rate and held
//!    in between
//! 4. **Locomotion controller**: dispatches each leg on its contact state and
//!    assembles the 12-joint hybrid command

pub mod centroidal;
pub mod controller;
pub mod gait;
pub mod kinematics;
pub mod qp;
pub mod stance;
pub mod swing;

pub use centroidal::{BodyState, ReferenceTrajectory, build_continuous_dynamics, discretize_matrix_exp};
pub use controller::{ControllerDiagnostics, LocomotionController};
pub use gait::GaitGenerator;
pub use kinematics::{IkSolution, RobotKinematics, roll_pitch_rotation};
pub use qp::{ClarabelQp, QpProblem, QpSolution, QpSolver, QpStatus, TripletMatrix};
pub use stance::{SolveReport, StanceController};
pub use swing::{SwingController, SwingTrajectory};
