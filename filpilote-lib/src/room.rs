//! Per-room override resolution.
//!
//! A room never owns the regime: it receives a [`CentralOrder`], checks the
//! local overrides in a fixed order and sends the resulting preset to its
//! relay:
//!
//! 1. master switch reads off: `Off`
//! 2. any window reads open: `Off`
//! 3. heating calendar does not read allowed: `FrostProtection`
//! 4. otherwise the ordered preset

use crate::catalog::PresetCatalog;
use crate::central::CentralOrder;
use crate::entity::{round_tenth, ActuatorRef, CentralId, EntityRef, RoomId, StateSource};
use crate::error::HeatingResult;
use crate::preset::{heating_action, HvacAction, Preset};
use crate::propagation::ActuatorSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    pub central: CentralId,
    pub actuator: ActuatorRef,
    #[serde(default)]
    pub temperature_sensor: Option<EntityRef>,
    #[serde(default)]
    pub window_sensors: Vec<EntityRef>,
}

impl RoomConfig {
    pub fn new(
        id: impl Into<RoomId>,
        central: impl Into<CentralId>,
        actuator: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            central: central.into(),
            actuator: ActuatorRef::new(actuator),
            temperature_sensor: None,
            window_sensors: Vec::new(),
        }
    }
}

/// Why a room ended up with the preset it sent.
#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Copy, Clone)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    MasterSwitchOff,
    WindowOpen,
    CalendarDisallowed,
    CentralOrder,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Resolution {
    pub room: RoomId,
    pub requested: Preset,
    pub applied: Preset,
    pub reason: Reason,
}

/// First matching override wins.
pub fn resolve_override(
    order: &CentralOrder,
    window_open: bool,
    states: &dyn StateSource,
) -> (Preset, Reason) {
    if order
        .master_switch
        .as_ref()
        .is_some_and(|switch| states.state(switch).is_off())
    {
        (Preset::Off, Reason::MasterSwitchOff)
    } else if window_open {
        (Preset::Off, Reason::WindowOpen)
    } else if order
        .calendar
        .as_ref()
        .is_some_and(|calendar| !states.state(calendar).is_on())
    {
        (Preset::FrostProtection, Reason::CalendarDisallowed)
    } else {
        (order.preset, Reason::CentralOrder)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoomState {
    pub current_temperature: Option<f64>,
    pub window_sensors: BTreeSet<EntityRef>,
    pub window_open: bool,
    pub last_applied_preset: Preset,
    pub target_temperature: Option<f64>,
    pub hvac_action: HvacAction,
    #[serde(skip)]
    margin: f64,
}

/// Read-only mirror of a room, as published to status consumers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoomStatus {
    pub room: RoomId,
    pub name: String,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub window_open: bool,
    pub last_applied_preset: Preset,
    pub hvac_action: HvacAction,
}

#[derive(Debug, Clone)]
pub struct RoomController {
    config: RoomConfig,
    state: RoomState,
}

impl RoomController {
    /// A room configured without a name is named after its id.
    pub fn new(mut config: RoomConfig) -> Self {
        if config.name.is_empty() {
            config.name = config.id.to_string();
        }
        let state = RoomState {
            current_temperature: None,
            window_sensors: config.window_sensors.iter().cloned().collect(),
            window_open: false,
            last_applied_preset: Preset::Off,
            target_temperature: None,
            hvac_action: HvacAction::Off,
            margin: 0.0,
        };
        Self { config, state }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.config.id
    }

    #[must_use]
    pub const fn central_id(&self) -> &CentralId {
        &self.config.central
    }

    #[must_use]
    pub const fn config(&self) -> &RoomConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &RoomState {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> RoomStatus {
        RoomStatus {
            room: self.config.id.clone(),
            name: self.config.name.clone(),
            current_temperature: self.state.current_temperature,
            target_temperature: self.state.target_temperature,
            window_open: self.state.window_open,
            last_applied_preset: self.state.last_applied_preset,
            hvac_action: self.state.hvac_action,
        }
    }

    #[must_use]
    pub fn has_window_sensor(&self, entity: &EntityRef) -> bool {
        self.state.window_sensors.contains(entity)
    }

    /// Updates the local reading; only the informational action follows.
    pub fn on_local_sensor_changed(&mut self, value: Option<f64>) -> HvacAction {
        self.state.current_temperature = value.map(round_tenth);
        self.refresh_action();
        self.state.hvac_action
    }

    /// Re-resolves after a window change. Sends a command only when the
    /// effective preset differs from the last one sent.
    pub fn on_window_sensor_changed(
        &mut self,
        order: &CentralOrder,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Option<Resolution>> {
        let was_open = self.state.window_open;
        self.state.window_open = self.read_windows(states);
        if was_open != self.state.window_open {
            tracing::info!("{}: window open {}", self.id(), self.state.window_open);
        }
        let (applied, _) = resolve_override(order, self.state.window_open, states);
        if applied == self.state.last_applied_preset {
            return Ok(None);
        }
        self.apply_central_order(order, states, sink).map(Some)
    }

    pub fn apply_central_order(
        &mut self,
        order: &CentralOrder,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Resolution> {
        self.state.window_open = self.read_windows(states);
        let (applied, reason) = resolve_override(order, self.state.window_open, states);
        tracing::debug!(
            "{}: ordered {} -> applying {} ({:?})",
            self.id(),
            order.preset,
            applied,
            reason
        );
        let payload = PresetCatalog::command_payload_for(applied);
        sink.publish(&self.config.actuator, payload)?;

        self.state.last_applied_preset = applied;
        self.state.target_temperature = order.setpoints.get(applied);
        self.state.margin = order.hysteresis.get(applied);
        self.refresh_action();
        Ok(Resolution {
            room: self.config.id.clone(),
            requested: order.preset,
            applied,
            reason,
        })
    }

    fn read_windows(&self, states: &dyn StateSource) -> bool {
        self.state
            .window_sensors
            .iter()
            .any(|sensor| states.state(sensor).is_on())
    }

    fn refresh_action(&mut self) {
        self.state.hvac_action = if self.state.last_applied_preset == Preset::Off {
            HvacAction::Off
        } else {
            heating_action(
                self.state.current_temperature,
                self.state.target_temperature,
                self.state.margin,
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HysteresisTable, TemperatureSetpoints};
    use crate::entity::EntityState;
    use crate::propagation::testing::RecordingSink;
    use std::collections::HashMap;

    const MASTER: &str = "switch.chauffage";
    const CALENDAR: &str = "calendar.chauffage";
    const WINDOW: &str = "binary_sensor.fenetre_salon";

    fn order(preset: Preset) -> CentralOrder {
        CentralOrder {
            preset,
            setpoints: TemperatureSetpoints::default(),
            hysteresis: HysteresisTable::default(),
            calendar: Some(CALENDAR.into()),
            master_switch: Some(MASTER.into()),
        }
    }

    fn salon() -> RoomController {
        let mut config = RoomConfig::new("salon", "home", "zigbee2mqtt/radiateur_salon");
        config.window_sensors = vec![WINDOW.into(), "binary_sensor.baie_salon".into()];
        config.temperature_sensor = Some("sensor.salon".into());
        RoomController::new(config)
    }

    fn states(
        master: EntityState,
        window: EntityState,
        calendar: EntityState,
    ) -> HashMap<EntityRef, EntityState> {
        HashMap::from([
            (EntityRef::from(MASTER), master),
            (EntityRef::from(WINDOW), window),
            (EntityRef::from(CALENDAR), calendar),
        ])
    }

    fn permissive() -> HashMap<EntityRef, EntityState> {
        states(EntityState::On, EntityState::Off, EntityState::On)
    }

    #[test]
    fn master_off_wins_over_everything() {
        let values = states(EntityState::Off, EntityState::On, EntityState::Off);
        for preset in Preset::ALL {
            assert_eq!(
                resolve_override(&order(preset), true, &values),
                (Preset::Off, Reason::MasterSwitchOff)
            );
        }
    }

    #[test]
    fn window_wins_over_calendar() {
        for calendar in [EntityState::On, EntityState::Off, EntityState::Unknown] {
            let values = states(EntityState::On, EntityState::On, calendar);
            for preset in Preset::ALL {
                assert_eq!(
                    resolve_override(&order(preset), true, &values),
                    (Preset::Off, Reason::WindowOpen)
                );
            }
        }
    }

    #[test]
    fn numeric_switch_readings() {
        let values = states(EntityState::Numeric(0.0), EntityState::Off, EntityState::On);
        assert_eq!(
            resolve_override(&order(Preset::Comfort), false, &values),
            (Preset::Off, Reason::MasterSwitchOff)
        );
        let values = states(
            EntityState::Numeric(1.0),
            EntityState::Off,
            EntityState::Numeric(1.0),
        );
        assert_eq!(
            resolve_override(&order(Preset::Eco), false, &values),
            (Preset::Eco, Reason::CentralOrder)
        );
        let values = states(EntityState::On, EntityState::Off, EntityState::Numeric(0.0));
        assert_eq!(
            resolve_override(&order(Preset::Eco), false, &values).0,
            Preset::FrostProtection
        );
    }

    #[test]
    fn unnamed_room_is_named_after_its_id() {
        let mut config = RoomConfig::new("bureau", "home", "zigbee2mqtt/radiateur_bureau");
        config.name = String::new();
        assert_eq!(RoomController::new(config).status().name, "bureau");
    }

    #[test]
    fn calendar_floor() {
        let values = states(EntityState::On, EntityState::Off, EntityState::Off);
        assert_eq!(
            resolve_override(&order(Preset::Comfort), false, &values),
            (Preset::FrostProtection, Reason::CalendarDisallowed)
        );
        let values = states(EntityState::On, EntityState::Off, EntityState::Unknown);
        assert_eq!(
            resolve_override(&order(Preset::Eco), false, &values).0,
            Preset::FrostProtection
        );
    }

    #[test]
    fn missing_refs_are_permissive() {
        let mut order = order(Preset::ComfortMinus1);
        order.master_switch = None;
        order.calendar = None;
        let values: HashMap<EntityRef, EntityState> = HashMap::new();
        assert_eq!(
            resolve_override(&order, false, &values),
            (Preset::ComfortMinus1, Reason::CentralOrder)
        );
    }

    #[test]
    fn unknown_master_is_not_off() {
        let values = states(EntityState::Unknown, EntityState::Off, EntityState::On);
        assert_eq!(
            resolve_override(&order(Preset::Comfort), false, &values).0,
            Preset::Comfort
        );
    }

    #[test]
    fn all_overrides_resolve_to_off() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let values = states(EntityState::Off, EntityState::On, EntityState::Off);
        let comfort = order(Preset::Comfort);
        let resolution = room.apply_central_order(&comfort, &values, &sink).unwrap();
        assert_eq!(resolution.applied, Preset::Off);
        assert_eq!(resolution.reason, Reason::MasterSwitchOff);
        assert_eq!(
            sink.presets(),
            vec![("zigbee2mqtt/radiateur_salon".to_string(), Preset::Off)]
        );
    }

    #[test]
    fn applied_preset_reflects_what_was_sent() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let values = states(EntityState::On, EntityState::On, EntityState::On);
        let comfort = order(Preset::Comfort);
        room.apply_central_order(&comfort, &values, &sink).unwrap();
        assert!(room.state().window_open);
        assert_eq!(room.state().last_applied_preset, Preset::Off);
        assert_eq!(room.state().hvac_action, HvacAction::Off);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let values = permissive();
        let reduced = order(Preset::ComfortMinus2);
        let first = room.apply_central_order(&reduced, &values, &sink).unwrap();
        let state = room.state().clone();
        let second = room.apply_central_order(&reduced, &values, &sink).unwrap();
        assert_eq!(first, second);
        assert_eq!(&state, room.state());
        let sent = sink.presets();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[test]
    fn failed_publish_keeps_previous_preset() {
        let mut room = salon();
        let sink = RecordingSink::failing("zigbee2mqtt/radiateur_salon");
        assert!(room
            .apply_central_order(&order(Preset::Comfort), &permissive(), &sink)
            .is_err());
        assert_eq!(room.state().last_applied_preset, Preset::Off);
    }

    #[test]
    fn window_change_only_sends_on_difference() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let comfort = order(Preset::Comfort);
        let mut values = permissive();
        room.apply_central_order(&comfort, &values, &sink).unwrap();
        sink.clear();

        assert_eq!(
            room.on_window_sensor_changed(&comfort, &values, &sink),
            Ok(None)
        );
        assert!(sink.presets().is_empty());

        values.insert(WINDOW.into(), EntityState::On);
        let resolution = room
            .on_window_sensor_changed(&comfort, &values, &sink)
            .unwrap()
            .unwrap();
        assert_eq!(resolution.applied, Preset::Off);
        assert_eq!(resolution.reason, Reason::WindowOpen);

        values.insert(WINDOW.into(), EntityState::Off);
        let resolution = room
            .on_window_sensor_changed(&comfort, &values, &sink)
            .unwrap()
            .unwrap();
        assert_eq!(resolution.applied, Preset::Comfort);
        assert!(!room.state().window_open);
        assert_eq!(
            sink.presets()
                .into_iter()
                .map(|(_, preset)| preset)
                .collect::<Vec<_>>(),
            vec![Preset::Off, Preset::Comfort]
        );
    }

    #[test]
    fn local_action_uses_room_reading() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let comfort = order(Preset::Comfort);
        room.apply_central_order(&comfort, &permissive(), &sink).unwrap();
        assert_eq!(room.state().target_temperature, Some(20.0));
        assert_eq!(
            room.on_local_sensor_changed(Some(19.5)),
            HvacAction::Heating
        );
        assert_eq!(room.on_local_sensor_changed(Some(19.8)), HvacAction::Idle);
        assert_eq!(room.on_local_sensor_changed(None), HvacAction::Idle);
        assert!(sink.presets().len() == 1);
    }

    #[test]
    fn frost_floor_uses_frost_setpoint() {
        let mut room = salon();
        let sink = RecordingSink::default();
        let values = states(EntityState::On, EntityState::Off, EntityState::Off);
        let comfort = order(Preset::Comfort);
        room.apply_central_order(&comfort, &values, &sink).unwrap();
        assert_eq!(room.state().target_temperature, Some(7.0));
        assert_eq!(room.on_local_sensor_changed(Some(6.4)), HvacAction::Heating);
        assert_eq!(room.on_local_sensor_changed(Some(6.5)), HvacAction::Idle);
    }
}
