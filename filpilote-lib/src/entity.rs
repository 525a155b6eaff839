//! Identifiers and sensor readings shared by the controllers.

use core::fmt;
use core::ops::RangeInclusive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Readings outside this range are treated as absent.
pub const SANE_TEMPERATURE: RangeInclusive<f64> = -40.0..=60.0;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Installation scoped id of a central controller.
    CentralId
);
string_id!(
    /// Installation scoped id of a room controller.
    RoomId
);
string_id!(
    /// Reference to an external sensor, switch or calendar.
    EntityRef
);
string_id!(
    /// Address of a heater relay.
    ActuatorRef
);

/// Last known state of an external entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EntityState {
    Numeric(f64),
    On,
    Off,
    Text(String),
    #[default]
    Unknown,
}

impl EntityState {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "" | "unknown" | "unavailable" | "none" | "null" => Self::Unknown,
            "on" | "open" | "true" => Self::On,
            "off" | "closed" | "false" => Self::Off,
            lower => match lower.parse::<f64>() {
                Ok(value) if value.is_finite() => Self::Numeric(value),
                _ => Self::Text(raw.to_string()),
            },
        }
    }

    /// Temperature in °C, if the reading is numeric and plausible.
    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) if SANE_TEMPERATURE.contains(value) => Some(*value),
            _ => None,
        }
    }

    /// Person count; anything non numeric counts as nobody.
    #[must_use]
    pub fn count(&self) -> u32 {
        match self {
            Self::Numeric(value) if *value >= 0.0 => value.floor().min(f64::from(u32::MAX)) as u32,
            _ => 0,
        }
    }

    /// `On`, or a numeric `1` as sent by relays reporting their level.
    #[must_use]
    pub fn is_on(&self) -> bool {
        match self {
            Self::On => true,
            Self::Numeric(value) => *value == 1.0,
            _ => false,
        }
    }

    /// `Off`, or a numeric `0`.
    #[must_use]
    pub fn is_off(&self) -> bool {
        match self {
            Self::Off => true,
            Self::Numeric(value) => *value == 0.0,
            _ => false,
        }
    }
}

impl From<bool> for EntityState {
    fn from(val: bool) -> Self {
        if val {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Read access to the last known state of external entities.
pub trait StateSource {
    fn state(&self, entity: &EntityRef) -> EntityState;

    fn temperature(&self, entity: &EntityRef) -> Option<f64> {
        self.state(entity).temperature()
    }
}

impl StateSource for HashMap<EntityRef, EntityState> {
    fn state(&self, entity: &EntityRef) -> EntityState {
        self.get(entity).cloned().unwrap_or_default()
    }
}

/// Arithmetic mean of the valid readings, rounded to one decimal.
pub fn mean_temperature<I>(readings: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, n) = readings
        .into_iter()
        .flatten()
        .fold((0.0, 0u32), |(sum, n), t| (sum + t, n + 1));
    (n > 0).then(|| round_tenth(sum / f64::from(n)))
}

#[must_use]
pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
