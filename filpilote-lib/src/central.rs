//! Home-wide regime: the single writer of the active preset.

use crate::catalog::{HysteresisTable, PresetCatalog, TemperatureSetpoints};
use crate::entity::{mean_temperature, round_tenth, CentralId, EntityRef, StateSource};
use crate::error::{HeatingError, HeatingResult};
use crate::preset::{heating_action, HvacAction, HvacMode, Preset};
use serde::{Deserialize, Serialize};

/// Where the central reference temperature comes from.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TemperaturePolicy {
    /// Mean of every room sensor linked to this central.
    #[default]
    Average,
    /// One designated sensor.
    Reference { sensor: EntityRef },
}

fn default_name() -> String {
    "Central thermostat".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CentralConfig {
    pub id: CentralId,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub temperature: TemperaturePolicy,
    #[serde(default)]
    pub master_switch: Option<EntityRef>,
    #[serde(default)]
    pub heating_calendar: Option<EntityRef>,
    #[serde(default)]
    pub presence_sensor: Option<EntityRef>,
    #[serde(default)]
    pub setpoints: TemperatureSetpoints,
    #[serde(default)]
    pub hysteresis: HysteresisTable,
}

impl CentralConfig {
    pub fn new(id: impl Into<CentralId>) -> Self {
        Self {
            id: id.into(),
            name: default_name(),
            temperature: TemperaturePolicy::default(),
            master_switch: None,
            heating_calendar: None,
            presence_sensor: None,
            setpoints: TemperatureSetpoints::default(),
            hysteresis: HysteresisTable::default(),
        }
    }
}

/// User command addressed to a central, as received on the command topic:
/// `{"preset": "eco"}`, `{"temperature": 20.5}` or `{"hvac_mode": "off"}`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CentralCmd {
    Preset(Preset),
    Temperature(f64),
    HvacMode(HvacMode),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CentralState {
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub active_preset: Preset,
    pub hvac_mode: HvacMode,
    pub hvac_action: HvacAction,
    pub auto_eco_active: bool,
    pub last_manual_preset: Preset,
    pub presence_count: Option<u32>,
}

impl Default for CentralState {
    fn default() -> Self {
        Self {
            current_temperature: None,
            target_temperature: None,
            active_preset: Preset::Comfort,
            hvac_mode: HvacMode::Heat,
            hvac_action: HvacAction::Idle,
            auto_eco_active: false,
            last_manual_preset: Preset::Comfort,
            presence_count: None,
        }
    }
}

/// Complete published regime of one central.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Regime {
    pub central: CentralId,
    pub active_preset: Preset,
    pub hvac_mode: HvacMode,
    pub target_temperature: Option<f64>,
    pub current_temperature: Option<f64>,
    pub hvac_action: HvacAction,
    pub auto_eco_active: bool,
    pub presence_count: Option<u32>,
    pub temperature_setpoints: TemperatureSetpoints,
}

/// What every room receives on propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralOrder {
    pub preset: Preset,
    pub setpoints: TemperatureSetpoints,
    pub hysteresis: HysteresisTable,
    pub calendar: Option<EntityRef>,
    pub master_switch: Option<EntityRef>,
}

#[derive(Debug, Clone)]
pub struct CentralController {
    config: CentralConfig,
    catalog: PresetCatalog,
    state: CentralState,
    average_sources: Vec<EntityRef>,
}

impl CentralController {
    pub fn new(config: CentralConfig) -> HeatingResult<Self> {
        let catalog = PresetCatalog::new(config.setpoints, config.hysteresis)?;
        let mut central = Self {
            config,
            catalog,
            state: CentralState::default(),
            average_sources: Vec::new(),
        };
        central.recompute();
        Ok(central)
    }

    #[must_use]
    pub const fn id(&self) -> &CentralId {
        &self.config.id
    }

    #[must_use]
    pub const fn config(&self) -> &CentralConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &CentralState {
        &self.state
    }

    #[must_use]
    pub const fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    /// Sets the Comfort setpoint and switches to Comfort.
    pub fn set_temperature(&mut self, value: f64) -> HeatingResult<Regime> {
        if self.state.auto_eco_active {
            tracing::warn!(
                "{}: temperature {} refused, auto-eco active",
                self.id(),
                value
            );
            return Err(HeatingError::AutoEcoActive);
        }
        self.catalog.set_comfort(value)?;
        self.state.active_preset = Preset::Comfort;
        self.state.last_manual_preset = Preset::Comfort;
        self.state.hvac_mode = HvacMode::Heat;
        self.state.auto_eco_active = false;
        self.recompute();
        Ok(self.regime())
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) -> Regime {
        match mode {
            HvacMode::Off => {
                self.state.active_preset = Preset::Off;
                self.state.auto_eco_active = false;
            }
            HvacMode::Heat if self.state.active_preset == Preset::Off => {
                self.state.active_preset = match self.state.last_manual_preset {
                    Preset::Off => Preset::Comfort,
                    preset => preset,
                };
            }
            HvacMode::Heat => {}
        }
        self.state.hvac_mode = mode;
        self.recompute();
        self.regime()
    }

    pub fn set_preset_mode(&mut self, preset: Preset) -> Regime {
        self.state.active_preset = preset;
        // Eco belongs to the presence path and never becomes the manual baseline.
        if preset != Preset::Eco {
            self.state.last_manual_preset = preset;
        }
        self.state.hvac_mode = if preset == Preset::Off {
            HvacMode::Off
        } else {
            HvacMode::Heat
        };
        self.state.auto_eco_active = false;
        self.recompute();
        self.regime()
    }

    pub fn apply(&mut self, cmd: CentralCmd) -> HeatingResult<Regime> {
        match cmd {
            CentralCmd::Preset(preset) => Ok(self.set_preset_mode(preset)),
            CentralCmd::Temperature(value) => self.set_temperature(value),
            CentralCmd::HvacMode(mode) => Ok(self.set_hvac_mode(mode)),
        }
    }

    /// Returns the new regime only when the count crossed zero and the
    /// auto-eco state flipped.
    pub fn on_presence_changed(&mut self, count: u32) -> Option<Regime> {
        let previous = self.state.presence_count.replace(count);
        let transition = match previous {
            Some(before) if before > 0 && count == 0 => {
                if self.state.auto_eco_active || self.state.hvac_mode == HvacMode::Off {
                    false
                } else {
                    self.state.last_manual_preset = self.state.active_preset;
                    self.state.active_preset = Preset::Eco;
                    self.state.auto_eco_active = true;
                    true
                }
            }
            Some(0) if count > 0 && self.state.auto_eco_active => {
                self.state.active_preset = self.state.last_manual_preset;
                self.state.auto_eco_active = false;
                true
            }
            _ => false,
        };
        if transition {
            tracing::info!(
                "{}: presence {:?} -> {}, auto-eco {}",
                self.id(),
                previous,
                count,
                self.state.auto_eco_active
            );
            self.recompute();
            Some(self.regime())
        } else {
            None
        }
    }

    /// Refreshes the reference temperature. Never changes the regime.
    pub fn on_temperature_sources_changed(&mut self, states: &dyn StateSource) -> HvacAction {
        self.state.current_temperature = match &self.config.temperature {
            TemperaturePolicy::Reference { sensor } => states.temperature(sensor).map(round_tenth),
            TemperaturePolicy::Average => {
                mean_temperature(self.average_sources.iter().map(|s| states.temperature(s)))
            }
        };
        let before = self.state.hvac_action;
        self.recompute();
        if before != self.state.hvac_action {
            tracing::info!(
                "{}: temperature {:?} / {:?} => {:?}",
                self.id(),
                self.state.current_temperature,
                self.state.target_temperature,
                self.state.hvac_action
            );
        }
        self.state.hvac_action
    }

    /// Whether `entity` feeds the reference temperature.
    #[must_use]
    pub fn reads_temperature_from(&self, entity: &EntityRef) -> bool {
        match &self.config.temperature {
            TemperaturePolicy::Reference { sensor } => sensor == entity,
            TemperaturePolicy::Average => self.average_sources.contains(entity),
        }
    }

    /// Whether `entity` is the master switch or the heating calendar.
    #[must_use]
    pub fn is_override_source(&self, entity: &EntityRef) -> bool {
        self.config.master_switch.as_ref() == Some(entity)
            || self.config.heating_calendar.as_ref() == Some(entity)
    }

    pub(crate) fn set_average_sources(&mut self, sources: Vec<EntityRef>) {
        self.average_sources = sources;
    }

    fn recompute(&mut self) {
        let preset = self.state.active_preset;
        self.state.target_temperature = self.catalog.setpoint_for(preset);
        self.state.hvac_action = match self.state.hvac_mode {
            HvacMode::Off => HvacAction::Off,
            HvacMode::Heat => heating_action(
                self.state.current_temperature,
                self.state.target_temperature,
                self.catalog.hysteresis_for(preset),
            ),
        };
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        Regime {
            central: self.config.id.clone(),
            active_preset: self.state.active_preset,
            hvac_mode: self.state.hvac_mode,
            target_temperature: self.state.target_temperature,
            current_temperature: self.state.current_temperature,
            hvac_action: self.state.hvac_action,
            auto_eco_active: self.state.auto_eco_active,
            presence_count: self.state.presence_count,
            temperature_setpoints: *self.catalog.setpoints(),
        }
    }

    #[must_use]
    pub fn order(&self) -> CentralOrder {
        CentralOrder {
            preset: self.state.active_preset,
            setpoints: *self.catalog.setpoints(),
            hysteresis: *self.catalog.hysteresis(),
            calendar: self.config.heating_calendar.clone(),
            master_switch: self.config.master_switch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use std::collections::HashMap;

    fn central() -> CentralController {
        CentralController::new(CentralConfig::new("home")).unwrap()
    }

    fn reference(sensor: &str) -> CentralController {
        let mut config = CentralConfig::new("home");
        config.temperature = TemperaturePolicy::Reference {
            sensor: sensor.into(),
        };
        CentralController::new(config).unwrap()
    }

    fn states(values: &[(&str, EntityState)]) -> HashMap<EntityRef, EntityState> {
        values
            .iter()
            .map(|(k, v)| (EntityRef::from(*k), v.clone()))
            .collect()
    }

    fn salon(value: f64) -> HashMap<EntityRef, EntityState> {
        states(&[("sensor.salon", EntityState::Numeric(value))])
    }

    #[test]
    fn starts_in_comfort() {
        let central = central();
        assert_eq!(central.state().active_preset, Preset::Comfort);
        assert_eq!(central.state().target_temperature, Some(20.0));
        assert_eq!(central.state().hvac_action, HvacAction::Idle);
    }

    #[test]
    fn set_temperature_forces_comfort() {
        let mut central = central();
        central.set_preset_mode(Preset::ComfortMinus2);
        let regime = central.set_temperature(21.0).unwrap();
        assert_eq!(regime.active_preset, Preset::Comfort);
        assert_eq!(regime.target_temperature, Some(21.0));
        assert_eq!(central.state().last_manual_preset, Preset::Comfort);
        assert_eq!(
            regime.temperature_setpoints.get(Preset::Comfort),
            Some(21.0)
        );
    }

    #[test]
    fn set_temperature_rejects_out_of_range() {
        let mut central = central();
        assert!(central.set_temperature(99.0).is_err());
        assert_eq!(central.state().target_temperature, Some(20.0));
    }

    #[test]
    fn set_temperature_refused_during_auto_eco() {
        let mut central = central();
        central.on_presence_changed(1);
        central.on_presence_changed(0);
        assert_eq!(
            central.set_temperature(22.0),
            Err(HeatingError::AutoEcoActive)
        );
        assert_eq!(central.state().active_preset, Preset::Eco);
        assert!(central.state().auto_eco_active);
    }

    #[test]
    fn hvac_mode_off_and_back() {
        let mut central = central();
        central.set_preset_mode(Preset::ComfortMinus1);
        let regime = central.set_hvac_mode(HvacMode::Off);
        assert_eq!(regime.active_preset, Preset::Off);
        assert_eq!(regime.target_temperature, None);
        assert_eq!(regime.hvac_action, HvacAction::Off);

        let regime = central.set_hvac_mode(HvacMode::Heat);
        assert_eq!(regime.active_preset, Preset::ComfortMinus1);
        assert_eq!(regime.hvac_mode, HvacMode::Heat);
    }

    #[test]
    fn heat_leaves_running_preset_alone() {
        let mut central = central();
        central.set_preset_mode(Preset::FrostProtection);
        let regime = central.set_hvac_mode(HvacMode::Heat);
        assert_eq!(regime.active_preset, Preset::FrostProtection);
    }

    #[test]
    fn heat_after_off_preset_falls_back_to_comfort() {
        let mut central = central();
        central.set_preset_mode(Preset::Off);
        assert_eq!(central.state().hvac_mode, HvacMode::Off);
        let regime = central.set_hvac_mode(HvacMode::Heat);
        assert_eq!(regime.active_preset, Preset::Comfort);
    }

    #[test]
    fn manual_eco_keeps_baseline() {
        let mut central = central();
        central.set_preset_mode(Preset::ComfortMinus2);
        central.set_preset_mode(Preset::Eco);
        assert_eq!(central.state().active_preset, Preset::Eco);
        assert_eq!(central.state().last_manual_preset, Preset::ComfortMinus2);
        assert!(!central.state().auto_eco_active);
    }

    #[test]
    fn presence_round_trip() {
        let mut central = central();
        central.set_preset_mode(Preset::ComfortMinus1);
        assert!(central.on_presence_changed(2).is_none());

        let regime = central.on_presence_changed(0).unwrap();
        assert_eq!(regime.active_preset, Preset::Eco);
        assert!(regime.auto_eco_active);
        assert_eq!(regime.target_temperature, Some(16.5));

        assert!(central.on_presence_changed(0).is_none());

        let regime = central.on_presence_changed(1).unwrap();
        assert_eq!(regime.active_preset, Preset::ComfortMinus1);
        assert!(!regime.auto_eco_active);
    }

    #[test]
    fn presence_without_transition_is_noop() {
        let mut central = central();
        assert!(central.on_presence_changed(0).is_none());
        assert!(central.on_presence_changed(3).is_none());
        assert!(central.on_presence_changed(1).is_none());
        assert_eq!(central.state().active_preset, Preset::Comfort);
        assert_eq!(central.state().presence_count, Some(1));
    }

    #[test]
    fn manual_preset_cancels_auto_eco() {
        let mut central = central();
        central.on_presence_changed(1);
        central.on_presence_changed(0);
        central.set_preset_mode(Preset::ComfortMinus2);
        assert!(!central.state().auto_eco_active);
        assert!(central.on_presence_changed(1).is_none());
        assert_eq!(central.state().active_preset, Preset::ComfortMinus2);
    }

    #[test]
    fn empty_house_while_off_stays_off() {
        let mut central = central();
        central.on_presence_changed(1);
        central.set_hvac_mode(HvacMode::Off);
        assert!(central.on_presence_changed(0).is_none());
        assert_eq!(central.state().active_preset, Preset::Off);
    }

    #[test]
    fn hysteresis_examples() {
        let mut central = reference("sensor.salon");
        let action = central.on_temperature_sources_changed(&salon(19.5));
        assert_eq!(action, HvacAction::Heating);
        let action = central.on_temperature_sources_changed(&salon(19.8));
        assert_eq!(action, HvacAction::Idle);
        let action = central.on_temperature_sources_changed(&salon(19.7));
        assert_eq!(action, HvacAction::Idle);
    }

    #[test]
    fn margin_follows_active_preset() {
        let mut central = reference("sensor.salon");
        central.set_preset_mode(Preset::Eco);
        // 16.5 - 0.4 = 16.1: 16.15 heats with the comfort margin, not with eco's.
        let action = central.on_temperature_sources_changed(&salon(16.15));
        assert_eq!(action, HvacAction::Idle);
        let action = central.on_temperature_sources_changed(&salon(16.0));
        assert_eq!(action, HvacAction::Heating);
    }

    #[test]
    fn average_policy() {
        let mut central = central();
        central.set_average_sources(vec!["sensor.a".into(), "sensor.b".into(), "sensor.c".into()]);
        let values = states(&[
            ("sensor.a", EntityState::Numeric(19.0)),
            ("sensor.b", EntityState::Unknown),
            ("sensor.c", EntityState::Numeric(20.0)),
        ]);
        central.on_temperature_sources_changed(&values);
        assert_eq!(central.state().current_temperature, Some(19.5));
        assert!(central.reads_temperature_from(&"sensor.b".into()));
        assert!(!central.reads_temperature_from(&"sensor.z".into()));
    }

    #[test]
    fn no_valid_source_is_unknown() {
        let mut central = central();
        central.set_average_sources(vec!["sensor.a".into()]);
        let values = states(&[("sensor.a", EntityState::Numeric(-120.0))]);
        let action = central.on_temperature_sources_changed(&values);
        assert_eq!(central.state().current_temperature, None);
        assert_eq!(action, HvacAction::Idle);
    }

    #[test]
    fn off_mode_never_heats() {
        let mut central = reference("sensor.salon");
        central.set_hvac_mode(HvacMode::Off);
        let action = central.on_temperature_sources_changed(&salon(3.0));
        assert_eq!(action, HvacAction::Off);
    }

    #[test]
    fn commands_deserialize() {
        let cmd: CentralCmd = serde_json::from_str(r#"{"preset": "comfort_-2"}"#).unwrap();
        assert_eq!(cmd, CentralCmd::Preset(Preset::ComfortMinus2));
        let cmd: CentralCmd = serde_json::from_str(r#"{"temperature": 20.5}"#).unwrap();
        assert_eq!(cmd, CentralCmd::Temperature(20.5));
        let cmd: CentralCmd = serde_json::from_str(r#"{"hvac_mode": "off"}"#).unwrap();
        assert_eq!(cmd, CentralCmd::HvacMode(HvacMode::Off));
        assert!(serde_json::from_str::<CentralCmd>(r#"{"preset": "boost"}"#).is_err());
    }

    #[test]
    fn policy_config() {
        let policy: TemperaturePolicy =
            serde_json::from_str(r#"{"method": "reference", "sensor": "sensor.salon"}"#).unwrap();
        assert_eq!(
            policy,
            TemperaturePolicy::Reference {
                sensor: "sensor.salon".into()
            }
        );
        let policy: TemperaturePolicy = serde_json::from_str(r#"{"method": "average"}"#).unwrap();
        assert_eq!(policy, TemperaturePolicy::Average);
    }
}
