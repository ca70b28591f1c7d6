// trotter-sim: headless plant and closed-loop runner for the trotter controller.

pub mod plant;
pub mod runner;

pub use plant::{Plant, PlantConfig};
pub use runner::{HARNESS_DURATION, RunSummary, Runner, TickRecord, VelocitySchedule};
