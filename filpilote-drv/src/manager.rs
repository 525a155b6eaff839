use crate::config::Config;
use crate::err::DrvError;
use crate::store::StateStore;
use async_channel::{Receiver, Sender};
use bytes::Bytes;
use filpilote_lib::{
    ActuatorRef, ActuatorSink, CentralCmd, CentralId, CommandPayload, HeatingError, HeatingResult,
    Installation, Regime, Snapshot,
};

pub type SnapshotSender = tokio::sync::watch::Sender<Snapshot>;
pub type SnapshotReceiver = tokio::sync::watch::Receiver<Snapshot>;
pub type EventSender = Sender<Event>;
pub type EventReceiver = Receiver<Event>;

#[derive(Debug)]
pub enum Event {
    Mqtt { topic: String, payload: Bytes },
    Command { central: CentralId, cmd: CentralCmd },
    /// Re-send the current regime to every room.
    Resync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Actuator(ActuatorRef, CommandPayload),
    RegimeChanged(Regime),
}

/// Hands relay commands to the MQTT publisher without waiting.
#[derive(Debug, Clone)]
pub struct MqttSink(Sender<Outgoing>);

impl ActuatorSink for MqttSink {
    fn publish(&self, actuator: &ActuatorRef, payload: CommandPayload) -> HeatingResult<()> {
        self.0
            .try_send(Outgoing::Actuator(actuator.clone(), payload))
            .map_err(|e| HeatingError::Publish {
                actuator: actuator.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Sole owner of the installation: events are handled one at a time.
#[derive(Debug)]
pub struct Manager {
    installation: Installation,
    store: StateStore,
    sink: MqttSink,
}

impl Manager {
    pub fn new(config: &Config, to_mqtt: Sender<Outgoing>) -> Result<Self, DrvError> {
        let mut installation = Installation::new();
        installation.register_central(config.central.clone())?;
        for room in &config.rooms {
            installation.add_room(room.clone())?;
        }
        let notify = to_mqtt.clone();
        installation.subscribe(move |regime| {
            if let Err(e) = notify.try_send(Outgoing::RegimeChanged(regime.clone())) {
                tracing::error!("regime notification for {} dropped: {}", regime.central, e);
            }
        });
        Ok(Self {
            installation,
            store: StateStore::new(&config.entities),
            sink: MqttSink(to_mqtt),
        })
    }

    pub fn topics(&self) -> Vec<String> {
        self.store.topics().map(str::to_string).collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.installation.snapshot()
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Mqtt { topic, payload } => {
                for entity in self.store.ingest(&topic, &payload) {
                    self.installation.on_entity_changed(&entity, &self.store, &self.sink);
                }
            }
            Event::Command { central, cmd } => {
                let result = self
                    .installation
                    .apply(&central, cmd, &self.store, &self.sink);
                match result {
                    Ok(regime) => tracing::info!("{}: {:?} applied", regime.central, cmd),
                    Err(e) => tracing::warn!("{}: {:?} rejected: {}", central, cmd, e),
                }
            }
            Event::Resync => self.installation.propagate_all(&self.store, &self.sink),
        }
    }

    pub async fn run(mut self, recv_event: EventReceiver, pub_state: SnapshotSender) {
        while let Ok(event) = recv_event.recv().await {
            self.handle(event);
            let new = self.snapshot();
            pub_state.send_if_modified(|old: &mut Snapshot| {
                if *old == new {
                    false
                } else {
                    *old = new;
                    true
                }
            });
        }
        tracing::info!("event channel closed, manager stopping");
    }
}
