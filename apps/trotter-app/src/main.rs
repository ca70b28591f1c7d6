//! Trotter locomotion controller CLI.
//!
//! Provides two modes of operation:
//! - `run`: Drive the controller against the rigid-body plant and print a summary
//! - `info`: Print the resolved configuration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use nalgebra::Vector2;
use tracing::{error, info};

use trotter_core::{ConfigError, GaitConfig, TrotterConfig};
use trotter_sim::{HARNESS_DURATION, RunSummary, Runner, VelocitySchedule};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Quadruped whole-body locomotion controller.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file. Defaults describe a Unitree A1.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the closed loop for a fixed duration and print statistics.
    Run {
        /// Gait preset. Overrides the `[gait]` section of the config file.
        #[arg(short, long, value_enum)]
        gait: Option<GaitPreset>,

        /// Velocity command profile.
        #[arg(short, long, value_enum, default_value_t = Profile::Constant)]
        profile: Profile,

        /// Simulated duration in seconds. Defaults to 5 s, or the full
        /// length of the harness profile.
        #[arg(short, long)]
        duration: Option<f64>,

        /// Abort MPC solves that overrun one control period.
        #[arg(long)]
        realtime: bool,

        /// Forward velocity command (m/s), constant profile only.
        #[arg(long, default_value_t = 0.0)]
        vx: f64,

        /// Lateral velocity command (m/s), constant profile only.
        #[arg(long, default_value_t = 0.0)]
        vy: f64,

        /// Yaw rate command (rad/s), constant profile only.
        #[arg(long, default_value_t = 0.0)]
        yaw_rate: f64,

        /// Seconds at the end of the run used for the velocity average.
        #[arg(long, default_value_t = 2.0)]
        window: f64,
    },

    /// Print the resolved configuration.
    Info,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GaitPreset {
    Standing,
    Trotting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Profile {
    /// Hold `--vx`, `--vy` and `--yaw-rate` for the whole run.
    Constant,
    /// Forward, backward, left, right, turn left, turn right; 3 s each.
    Harness,
}

impl Profile {
    fn default_duration(self) -> f64 {
        match self {
            Self::Constant => 5.0,
            Self::Harness => HARNESS_DURATION,
        }
    }
}

/// Options of one closed-loop run.
struct RunOptions {
    gait: Option<GaitPreset>,
    schedule: VelocitySchedule,
    duration: f64,
    realtime: bool,
    window: f64,
}

impl GaitPreset {
    fn config(self) -> GaitConfig {
        match self {
            Self::Standing => GaitConfig::standing(),
            Self::Trotting => GaitConfig::trotting(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn load_config(path: Option<&PathBuf>) -> Result<TrotterConfig, ConfigError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            TrotterConfig::from_file(path)
        }
        None => Ok(TrotterConfig::default()),
    }
}

fn run_closed_loop(mut config: TrotterConfig, options: RunOptions) -> Result<RunSummary, ConfigError> {
    let RunOptions {
        gait,
        schedule,
        duration,
        realtime,
        window,
    } = options;
    if let Some(preset) = gait {
        config.gait = preset.config();
    }
    if realtime {
        config.control_loop.limit_solve_to_period = true;
    }
    if !(duration.is_finite() && duration > 0.0) {
        return Err(ConfigError::invalid("duration", format!("must be positive, got {duration}")));
    }

    let mut runner = Runner::new(config, schedule)?;
    let summary = runner.run(duration);

    let from = (duration - window).max(0.0);
    let mean_v = summary.mean_velocity_since(from);
    let mean_fz = summary.mean_vertical_force_since(from);
    println!("ticks:            {}", summary.records.len());
    if let Some(end) = summary.final_position() {
        println!("final position:   [{:.3}, {:.3}, {:.3}] m", end.x, end.y, end.z);
    }
    println!(
        "mean velocity:    [{:.3}, {:.3}, {:.3}] m/s (t >= {from:.2} s)",
        mean_v.x, mean_v.y, mean_v.z
    );
    println!("mean normal load: {mean_fz:.2} N");
    println!("degraded solves:  {}", summary.degraded_solves);
    println!("rejected states:  {}", summary.rejected_states);
    println!("fell:             {}", summary.fell);
    Ok(summary)
}

fn run_info(config: &TrotterConfig) {
    println!("trotter v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!(
        "control loop: {:.0} Hz, mpc: {:.0} Hz",
        config.control_loop.control_hz(),
        config.control_loop.mpc_hz()
    );
    println!(
        "mpc horizon:  {} x {} s",
        config.stance.horizon, config.stance.dt
    );
    println!();
    println!("{config:#?}");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Commands::Run {
            gait,
            profile,
            duration,
            realtime,
            vx,
            vy,
            yaw_rate,
            window,
        }) => {
            let schedule = match profile {
                Profile::Constant => VelocitySchedule::constant(Vector2::new(vx, vy), yaw_rate),
                Profile::Harness => VelocitySchedule::harness(),
            };
            let options = RunOptions {
                gait,
                schedule,
                duration: duration.unwrap_or_else(|| profile.default_duration()),
                realtime,
                window,
            };
            run_closed_loop(config, options)
        }
        Some(Commands::Info) => {
            run_info(&config);
            return ExitCode::SUCCESS;
        }
        None => {
            // Default: stand for two seconds
            let options = RunOptions {
                gait: Some(GaitPreset::Standing),
                schedule: VelocitySchedule::default(),
                duration: 2.0,
                realtime: false,
                window: 1.0,
            };
            run_closed_loop(config, options)
        }
    };

    match result {
        Ok(summary) if summary.fell => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
