use crate::err::DrvError;
use filpilote_lib::{CentralConfig, EntityRef, PresetCatalog, RoomConfig, TemperaturePolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Where an entity's state is read from.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct EntityBinding {
    pub topic: String,
    /// JSON pointer into the payload, e.g. `/temperature`.
    #[serde(default)]
    pub pointer: Option<String>,
    /// Swap on and off, for contact sensors reporting `true` when closed.
    #[serde(default)]
    pub invert: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Config {
    pub central: CentralConfig,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub entities: BTreeMap<EntityRef, EntityBinding>,
}

pub fn config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "filpilote")
        .map_or_else(|| PathBuf::from("/etc/filpilote"), |dirs| dirs.config_dir().into())
        .join("config.toml")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, DrvError> {
        let read = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&read)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DrvError> {
        PresetCatalog::new(self.central.setpoints, self.central.hysteresis)?;

        let mut ids = BTreeSet::new();
        for room in &self.rooms {
            if !ids.insert(&room.id) {
                return Err(DrvError::Config(format!("room {} declared twice", room.id)));
            }
            if room.central != self.central.id {
                return Err(DrvError::Config(format!(
                    "room {} refers to unknown central {}",
                    room.id, room.central
                )));
            }
        }

        let unbound = self.referenced().find(|e| !self.entities.contains_key(e));
        match unbound {
            Some(entity) => Err(DrvError::Config(format!("entity {entity} has no binding"))),
            None => Ok(()),
        }
    }

    fn referenced(&self) -> impl Iterator<Item = &EntityRef> {
        let reference = match &self.central.temperature {
            TemperaturePolicy::Reference { sensor } => Some(sensor),
            TemperaturePolicy::Average => None,
        };
        reference
            .into_iter()
            .chain(self.central.master_switch.iter())
            .chain(self.central.heating_calendar.iter())
            .chain(self.central.presence_sensor.iter())
            .chain(self.rooms.iter().flat_map(|room| {
                room.temperature_sensor
                    .iter()
                    .chain(room.window_sensors.iter())
            }))
    }
}
