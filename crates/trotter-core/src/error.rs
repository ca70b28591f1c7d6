use thiserror::Error;

use crate::types::LegIndex;

/// Recoverable control-law failures.
///
/// None of these are fatal: the controller degrades (clamped IK target,
/// held force solution, held command) and reports the event.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Kinematics error on {leg:?}: target outside workspace (clamped by {distance:.4} m)")]
    Kinematics { leg: LegIndex, distance: f64 },

    #[error("Optimization error: {0}")]
    Optimization(String),

    #[error("Numerical error: {0}")]
    Numerical(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-tick input validation errors.
///
/// Copy + static messages for cheap propagation in the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ValidationError {
    #[error("MPC weight count mismatch: expected {expected}, got {got}")]
    WeightCount { expected: usize, got: usize },

    #[error("Inertia element count mismatch: expected 9, got {0}")]
    InertiaCount(usize),

    #[error("Mass must be positive and finite, got {0}")]
    NonPositiveMass(f64),

    #[error("Inertia tensor is not positive definite")]
    InertiaNotPositiveDefinite,

    #[error("Input contains NaN or Inf")]
    NonFinite,

    #[error("Negative MPC weight at index {0}")]
    NegativeWeight(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_error_from_validation_error() {
        let err: ControlError = ValidationError::NonPositiveMass(-1.0).into();
        assert!(matches!(err, ControlError::InvalidInput(_)));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("gait.duty_factor", "must be in (0, 1]");
        assert!(err.to_string().contains("gait.duty_factor"));
    }

    #[test]
    fn kinematics_error_names_leg() {
        let err = ControlError::Kinematics {
            leg: LegIndex::RearLeft,
            distance: 0.05,
        };
        assert!(err.to_string().contains("RearLeft"));
    }
}
