// trotter-core: Types, config and errors shared by the quadruped locomotion controller.

pub mod config;
pub mod error;
pub mod types;

pub use config::{GaitConfig, LoopConfig, RobotConfig, StanceConfig, SwingConfig, TrotterConfig};
pub use error::{ConfigError, ControlError, ValidationError};
pub use types::{
    COMMAND_FIELDS, ContactState, DesiredCommand, DynamicsParams, GaitState, HybridAction,
    JOINTS_PER_LEG, LegIndex, MPC_WEIGHT_COUNT, MotorCommand, MpcWeights, N_JOINTS, N_LEGS,
    RobotState,
};
