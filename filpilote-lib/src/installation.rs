//! Registry of the controllers of one installation.
//!
//! Rooms are linked to their central by id. Propagation looks the central up
//! on every call, so re-registering a central after a restart keeps every room
//! attached.

use crate::central::{CentralCmd, CentralConfig, CentralController, Regime};
use crate::entity::{CentralId, EntityRef, RoomId, StateSource};
use crate::error::{HeatingError, HeatingResult};
use crate::preset::{HvacAction, HvacMode, Preset};
use crate::propagation::{ActuatorSink, PropagationChannel};
use crate::room::{Resolution, RoomConfig, RoomController, RoomStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Consistent view of the whole installation for status consumers.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub centrals: Vec<Regime>,
    pub rooms: Vec<RoomStatus>,
}

#[derive(Debug, Default)]
pub struct Installation {
    centrals: BTreeMap<CentralId, CentralController>,
    rooms: BTreeMap<RoomId, RoomController>,
    channel: PropagationChannel,
}

impl Installation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a central, replacing any previous controller with the same id.
    pub fn register_central(&mut self, config: CentralConfig) -> HeatingResult<()> {
        let mut central = CentralController::new(config)?;
        central.set_average_sources(self.room_sensors(central.id()));
        if let Some(previous) = self.centrals.insert(central.id().clone(), central) {
            tracing::info!("{}: central re-created", previous.id());
        }
        Ok(())
    }

    pub fn remove_central(&mut self, id: &CentralId) -> HeatingResult<CentralController> {
        self.centrals
            .remove(id)
            .ok_or_else(|| HeatingError::UnknownCentral(id.to_string()))
    }

    pub fn add_room(&mut self, config: RoomConfig) -> HeatingResult<()> {
        if self.rooms.contains_key(&config.id) {
            return Err(HeatingError::DuplicateRoom(config.id.to_string()));
        }
        let central = config.central.clone();
        self.rooms.insert(config.id.clone(), RoomController::new(config));
        self.refresh_average_sources(&central);
        Ok(())
    }

    pub fn remove_room(&mut self, id: &RoomId) -> HeatingResult<RoomController> {
        let room = self
            .rooms
            .remove(id)
            .ok_or_else(|| HeatingError::UnknownRoom(id.to_string()))?;
        self.refresh_average_sources(room.central_id());
        Ok(room)
    }

    /// Registers a "regime changed" observer.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: Fn(&Regime) + Send + 'static,
    {
        self.channel.subscribe(observer);
    }

    pub fn central(&self, id: &CentralId) -> HeatingResult<&CentralController> {
        self.centrals
            .get(id)
            .ok_or_else(|| HeatingError::UnknownCentral(id.to_string()))
    }

    fn central_mut(&mut self, id: &CentralId) -> HeatingResult<&mut CentralController> {
        self.centrals
            .get_mut(id)
            .ok_or_else(|| HeatingError::UnknownCentral(id.to_string()))
    }

    pub fn room(&self, id: &RoomId) -> HeatingResult<&RoomController> {
        self.rooms
            .get(id)
            .ok_or_else(|| HeatingError::UnknownRoom(id.to_string()))
    }

    pub fn regime(&self, id: &CentralId) -> HeatingResult<Regime> {
        self.central(id).map(CentralController::regime)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomController> {
        self.rooms.values()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            centrals: self.centrals.values().map(|c| c.regime()).collect(),
            rooms: self.rooms.values().map(|r| r.status()).collect(),
        }
    }

    pub fn set_temperature(
        &mut self,
        id: &CentralId,
        value: f64,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Regime> {
        self.central_mut(id)?.set_temperature(value)?;
        self.propagate(id, states, sink)
    }

    pub fn set_hvac_mode(
        &mut self,
        id: &CentralId,
        mode: HvacMode,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Regime> {
        self.central_mut(id)?.set_hvac_mode(mode);
        self.propagate(id, states, sink)
    }

    pub fn set_preset_mode(
        &mut self,
        id: &CentralId,
        preset: Preset,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Regime> {
        self.central_mut(id)?.set_preset_mode(preset);
        self.propagate(id, states, sink)
    }

    pub fn apply(
        &mut self,
        id: &CentralId,
        cmd: CentralCmd,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Regime> {
        self.central_mut(id)?.apply(cmd)?;
        self.propagate(id, states, sink)
    }

    pub fn on_presence_changed(
        &mut self,
        id: &CentralId,
        count: u32,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Option<Regime>> {
        match self.central_mut(id)?.on_presence_changed(count) {
            Some(_) => self.propagate(id, states, sink).map(Some),
            None => Ok(None),
        }
    }

    /// Refreshes the reference temperature of a central without propagating.
    pub fn on_temperature_sources_changed(
        &mut self,
        id: &CentralId,
        states: &dyn StateSource,
    ) -> HeatingResult<HvacAction> {
        Ok(self.central_mut(id)?.on_temperature_sources_changed(states))
    }

    /// Re-applies the unchanged regime after a master switch or calendar change.
    pub fn on_override_source_changed(
        &mut self,
        id: &CentralId,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Vec<Resolution>> {
        self.push(id, states, sink)
    }

    pub fn on_room_sensor_changed(
        &mut self,
        id: &RoomId,
        value: Option<f64>,
    ) -> HeatingResult<HvacAction> {
        self.rooms
            .get_mut(id)
            .map(|room| room.on_local_sensor_changed(value))
            .ok_or_else(|| HeatingError::UnknownRoom(id.to_string()))
    }

    pub fn on_window_sensor_changed(
        &mut self,
        id: &RoomId,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Option<Resolution>> {
        let room = self
            .rooms
            .get_mut(id)
            .ok_or_else(|| HeatingError::UnknownRoom(id.to_string()))?;
        let order = self
            .centrals
            .get(room.central_id())
            .ok_or_else(|| HeatingError::UnknownCentral(room.central_id().to_string()))?
            .order();
        room.on_window_sensor_changed(&order, states, sink)
    }

    /// Routes a changed entity to every controller that reads it. Errors are
    /// logged per controller.
    pub fn on_entity_changed(
        &mut self,
        entity: &EntityRef,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) {
        let centrals: Vec<CentralId> = self.centrals.keys().cloned().collect();
        for id in &centrals {
            let Ok(central) = self.central(id) else {
                continue;
            };
            let temperature = central.reads_temperature_from(entity);
            let presence = central.config().presence_sensor.as_ref() == Some(entity);
            let overrides = central.is_override_source(entity);

            if temperature {
                log_failure(id, self.on_temperature_sources_changed(id, states));
            }
            if presence {
                let count = states.state(entity).count();
                log_failure(id, self.on_presence_changed(id, count, states, sink));
            }
            if overrides {
                log_failure(id, self.on_override_source_changed(id, states, sink));
            }
        }

        let rooms: Vec<(RoomId, bool, bool)> = self
            .rooms
            .values()
            .map(|room| {
                (
                    room.id().clone(),
                    room.config().temperature_sensor.as_ref() == Some(entity),
                    room.has_window_sensor(entity),
                )
            })
            .filter(|(_, temperature, window)| *temperature || *window)
            .collect();
        for (id, temperature, window) in rooms {
            if temperature {
                let value = states.temperature(entity);
                log_failure(&id, self.on_room_sensor_changed(&id, value));
            }
            if window {
                log_failure(&id, self.on_window_sensor_changed(&id, states, sink));
            }
        }
    }

    /// Re-applies the current regime of every central to all of its rooms.
    /// Observers are not notified since no regime changed.
    pub fn propagate_all(&mut self, states: &dyn StateSource, sink: &dyn ActuatorSink) {
        let centrals: Vec<CentralId> = self.centrals.keys().cloned().collect();
        for id in &centrals {
            log_failure(id, self.push(id, states, sink));
        }
    }

    fn propagate(
        &mut self,
        id: &CentralId,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Regime> {
        let central = self.central(id)?;
        let regime = central.regime();
        let order = central.order();
        tracing::info!(
            "{}: regime {} ({:?}), target {:?}, auto-eco {}",
            id,
            regime.active_preset,
            regime.hvac_mode,
            regime.target_temperature,
            regime.auto_eco_active
        );
        self.channel.notify(&regime);
        let rooms = self.rooms.values_mut().filter(|room| room.central_id() == id);
        self.channel.broadcast(&order, rooms, states, sink);
        Ok(regime)
    }

    /// Sends the current order of `id` to its rooms.
    fn push(
        &mut self,
        id: &CentralId,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> HeatingResult<Vec<Resolution>> {
        let order = self.central(id)?.order();
        let rooms = self.rooms.values_mut().filter(|room| room.central_id() == id);
        Ok(self.channel.broadcast(&order, rooms, states, sink))
    }

    fn room_sensors(&self, central: &CentralId) -> Vec<EntityRef> {
        self.rooms
            .values()
            .filter(|room| room.central_id() == central)
            .filter_map(|room| room.config().temperature_sensor.clone())
            .collect()
    }

    fn refresh_average_sources(&mut self, central: &CentralId) {
        let sensors = self.room_sensors(central);
        if let Some(central) = self.centrals.get_mut(central) {
            central.set_average_sources(sensors);
        }
    }
}

fn log_failure<T>(id: &impl core::fmt::Display, result: HeatingResult<T>) {
    if let Err(e) = result {
        tracing::warn!("{}: {}", id, e);
    }
}
