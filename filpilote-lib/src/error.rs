use thiserror::Error;

pub type HeatingResult<T> = Result<T, HeatingError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeatingError {
    #[error("unknown preset {0:?}")]
    UnknownPreset(String),

    #[error("unknown hvac mode {0:?}")]
    UnknownHvacMode(String),

    #[error("setpoint {value}°C for {preset} outside {min}..={max}")]
    SetpointOutOfRange {
        preset: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("hysteresis {value}°C for {preset} must be a non-negative number")]
    InvalidHysteresis { preset: &'static str, value: f64 },

    #[error("temperature change refused while auto-eco is active")]
    AutoEcoActive,

    #[error("unknown central {0}")]
    UnknownCentral(String),

    #[error("unknown room {0}")]
    UnknownRoom(String),

    #[error("duplicate room {0}")]
    DuplicateRoom(String),

    #[error("publish to {actuator} failed: {reason}")]
    Publish { actuator: String, reason: String },
}
