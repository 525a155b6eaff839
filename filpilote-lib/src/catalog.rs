//! Static preset tables: setpoints, dead-band margins and actuator payloads.

use crate::error::{HeatingError, HeatingResult};
use crate::preset::Preset;
use core::ops::RangeInclusive;
use serde::{Deserialize, Serialize};

/// Accepted range for any configured or user supplied setpoint.
pub const SETPOINT_RANGE: RangeInclusive<f64> = 5.0..=30.0;

pub const DEFAULT_HYSTERESIS: f64 = 0.3;

const fn default_comfort() -> f64 {
    20.0
}
const fn default_comfort_m1() -> f64 {
    19.0
}
const fn default_comfort_m2() -> f64 {
    18.0
}
const fn default_eco() -> f64 {
    16.5
}
const fn default_frost_protection() -> f64 {
    7.0
}

/// Target temperature of every preset but `Off`.
#[derive(Deserialize, Serialize, Debug, PartialEq, Copy, Clone)]
pub struct TemperatureSetpoints {
    #[serde(default = "default_comfort")]
    comfort: f64,
    #[serde(default = "default_comfort_m1")]
    comfort_m1: f64,
    #[serde(default = "default_comfort_m2")]
    comfort_m2: f64,
    #[serde(default = "default_eco")]
    eco: f64,
    #[serde(default = "default_frost_protection")]
    frost_protection: f64,
}

impl Default for TemperatureSetpoints {
    fn default() -> Self {
        Self {
            comfort: default_comfort(),
            comfort_m1: default_comfort_m1(),
            comfort_m2: default_comfort_m2(),
            eco: default_eco(),
            frost_protection: default_frost_protection(),
        }
    }
}

fn check_setpoint(preset: Preset, value: f64) -> HeatingResult<f64> {
    if SETPOINT_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(HeatingError::SetpointOutOfRange {
            preset: preset.name(),
            value,
            min: *SETPOINT_RANGE.start(),
            max: *SETPOINT_RANGE.end(),
        })
    }
}

impl TemperatureSetpoints {
    pub fn new(
        comfort: f64,
        comfort_m1: f64,
        comfort_m2: f64,
        eco: f64,
        frost_protection: f64,
    ) -> HeatingResult<Self> {
        let setpoints = Self {
            comfort,
            comfort_m1,
            comfort_m2,
            eco,
            frost_protection,
        };
        setpoints.validate()?;
        Ok(setpoints)
    }

    /// Checks every entry against [`SETPOINT_RANGE`]. Deserialized tables
    /// must go through this before use.
    pub fn validate(&self) -> HeatingResult<()> {
        for preset in Preset::ALL {
            if let Some(value) = self.get(preset) {
                check_setpoint(preset, value)?;
            }
        }
        if self.comfort < self.comfort_m1 {
            tracing::warn!(
                "comfort setpoint {} is below comfort_-1 setpoint {}",
                self.comfort,
                self.comfort_m1
            );
        }
        Ok(())
    }

    #[must_use]
    pub const fn get(&self, preset: Preset) -> Option<f64> {
        match preset {
            Preset::Comfort => Some(self.comfort),
            Preset::ComfortMinus1 => Some(self.comfort_m1),
            Preset::ComfortMinus2 => Some(self.comfort_m2),
            Preset::Eco => Some(self.eco),
            Preset::FrostProtection => Some(self.frost_protection),
            Preset::Off => None,
        }
    }

    /// Only Comfort is user adjustable after setup.
    pub fn with_comfort(self, value: f64) -> HeatingResult<Self> {
        let comfort = check_setpoint(Preset::Comfort, value)?;
        Ok(Self { comfort, ..self })
    }
}

const fn default_narrow_margin() -> f64 {
    DEFAULT_HYSTERESIS
}
const fn default_eco_margin() -> f64 {
    0.4
}
const fn default_frost_margin() -> f64 {
    0.5
}

/// Dead-band margin per preset. Deeper economy presets get wider bands.
#[derive(Deserialize, Serialize, Debug, PartialEq, Copy, Clone)]
pub struct HysteresisTable {
    #[serde(default = "default_narrow_margin")]
    comfort: f64,
    #[serde(default = "default_narrow_margin")]
    comfort_m1: f64,
    #[serde(default = "default_narrow_margin")]
    comfort_m2: f64,
    #[serde(default = "default_eco_margin")]
    eco: f64,
    #[serde(default = "default_frost_margin")]
    frost_protection: f64,
}

impl Default for HysteresisTable {
    fn default() -> Self {
        Self {
            comfort: DEFAULT_HYSTERESIS,
            comfort_m1: DEFAULT_HYSTERESIS,
            comfort_m2: DEFAULT_HYSTERESIS,
            eco: default_eco_margin(),
            frost_protection: default_frost_margin(),
        }
    }
}

impl HysteresisTable {
    pub fn validate(&self) -> HeatingResult<()> {
        for preset in Preset::ALL {
            let value = self.get(preset);
            if !value.is_finite() || value < 0.0 {
                return Err(HeatingError::InvalidHysteresis {
                    preset: preset.name(),
                    value,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn get(&self, preset: Preset) -> f64 {
        match preset {
            Preset::Comfort => self.comfort,
            Preset::ComfortMinus1 => self.comfort_m1,
            Preset::ComfortMinus2 => self.comfort_m2,
            Preset::Eco => self.eco,
            Preset::FrostProtection => self.frost_protection,
            Preset::Off => DEFAULT_HYSTERESIS,
        }
    }
}

/// Body sent to a fil pilote relay, serialized as `{"fil_pilote": "<preset>"}`.
#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub struct CommandPayload {
    pub fil_pilote: Preset,
}

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct PresetCatalog {
    setpoints: TemperatureSetpoints,
    hysteresis: HysteresisTable,
}

impl PresetCatalog {
    pub fn new(
        setpoints: TemperatureSetpoints,
        hysteresis: HysteresisTable,
    ) -> HeatingResult<Self> {
        setpoints.validate()?;
        hysteresis.validate()?;
        Ok(Self {
            setpoints,
            hysteresis,
        })
    }

    #[must_use]
    pub const fn setpoint_for(&self, preset: Preset) -> Option<f64> {
        self.setpoints.get(preset)
    }

    #[must_use]
    pub const fn hysteresis_for(&self, preset: Preset) -> f64 {
        self.hysteresis.get(preset)
    }

    #[must_use]
    pub const fn command_payload_for(preset: Preset) -> CommandPayload {
        CommandPayload { fil_pilote: preset }
    }

    #[must_use]
    pub const fn setpoints(&self) -> &TemperatureSetpoints {
        &self.setpoints
    }

    #[must_use]
    pub const fn hysteresis(&self) -> &HysteresisTable {
        &self.hysteresis
    }

    pub fn set_comfort(&mut self, value: f64) -> HeatingResult<()> {
        self.setpoints = self.setpoints.with_comfort(value)?;
        Ok(())
    }
}
