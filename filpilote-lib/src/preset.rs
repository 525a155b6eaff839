use crate::error::HeatingError;
use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Heating regime of a fil pilote radiator.
#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Preset {
    #[serde(rename = "comfort")]
    Comfort,
    #[serde(rename = "comfort_-1")]
    ComfortMinus1,
    #[serde(rename = "comfort_-2")]
    ComfortMinus2,
    #[serde(rename = "eco")]
    Eco,
    #[serde(rename = "frost_protection")]
    FrostProtection,
    #[serde(rename = "off")]
    Off,
}

impl Preset {
    pub const ALL: [Self; 6] = [
        Self::Comfort,
        Self::ComfortMinus1,
        Self::ComfortMinus2,
        Self::Eco,
        Self::FrostProtection,
        Self::Off,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Comfort => "comfort",
            Self::ComfortMinus1 => "comfort_-1",
            Self::ComfortMinus2 => "comfort_-2",
            Self::Eco => "eco",
            Self::FrostProtection => "frost_protection",
            Self::Off => "off",
        }
    }

    /// Rank of intended warmth, `Off` being the coldest.
    #[must_use]
    pub const fn warmth(self) -> u8 {
        match self {
            Self::Comfort => 5,
            Self::ComfortMinus1 => 4,
            Self::ComfortMinus2 => 3,
            Self::Eco => 2,
            Self::FrostProtection => 1,
            Self::Off => 0,
        }
    }
}

impl Ord for Preset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.warmth().cmp(&other.warmth())
    }
}

impl PartialOrd for Preset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = HeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| HeatingError::UnknownPreset(s.to_string()))
    }
}

#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Heat,
    Off,
}

impl FromStr for HvacMode {
    type Err = HeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heat" => Ok(Self::Heat),
            "off" => Ok(Self::Off),
            _ => Err(HeatingError::UnknownHvacMode(s.to_string())),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Heating,
    Idle,
    Off,
}

/// Dead-band decision: heat only once `current` drops strictly below
/// `target - margin`. Unknown readings or targets never heat.
#[must_use]
pub fn heating_action(current: Option<f64>, target: Option<f64>, margin: f64) -> HvacAction {
    match (current, target) {
        (Some(current), Some(target)) if current < target - margin => HvacAction::Heating,
        _ => HvacAction::Idle,
    }
}
