use crate::err::DrvResult;
use crate::manager::{Event, EventSender, Outgoing, SnapshotReceiver};
use async_channel::Receiver;
use filpilote_lib::{CentralCmd, CentralId, HvacAction, Regime, RoomId, RoomStatus};
use futures::stream;
use influxdb2::models::DataPoint;
use rumqttc::{AsyncClient, Publish, QoS};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

pub fn command_topic(prefix: &str) -> String {
    format!("{prefix}/central/+/set")
}

/// Central id addressed by a `<prefix>/central/<id>/set` topic.
fn command_target(prefix: &str, topic: &str) -> Option<CentralId> {
    topic
        .strip_prefix(prefix)?
        .strip_prefix("/central/")?
        .strip_suffix("/set")
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .map(CentralId::from)
}

pub async fn subscribe_all(client: AsyncClient, topics: Vec<String>) {
    for topic in topics {
        if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
            tracing::error!("subscribe to {} failed: {:?}", topic, e);
        }
    }
}

pub async fn mqtt_receive(
    from_mqtt_receive: Receiver<Publish>,
    to_manager: EventSender,
    prefix: String,
) -> DrvResult {
    while let Ok(msg) = from_mqtt_receive.recv().await {
        tracing::debug!("mqtt received {} {:?}", msg.topic, msg.payload);
        if let Some(central) = command_target(&prefix, &msg.topic) {
            match serde_json::from_slice::<CentralCmd>(&msg.payload) {
                Ok(cmd) => to_manager.send(Event::Command { central, cmd }).await?,
                Err(e) => tracing::warn!(
                    "invalid command for {}: {} ({:?})",
                    central,
                    e,
                    msg.payload
                ),
            }
        } else {
            to_manager
                .send(Event::Mqtt {
                    topic: msg.topic,
                    payload: msg.payload,
                })
                .await?;
        }
    }
    Ok(())
}

pub async fn mqtt_publish(
    to_mqtt_receive: Receiver<Outgoing>,
    client: AsyncClient,
    prefix: String,
) -> DrvResult {
    while let Ok(out) = to_mqtt_receive.recv().await {
        let (topic, payload) = match &out {
            Outgoing::Actuator(actuator, payload) => {
                (format!("{actuator}/set"), serde_json::to_vec(payload)?)
            }
            Outgoing::RegimeChanged(regime) => (
                format!("{prefix}/central/{}/changed", regime.central),
                serde_json::to_vec(regime)?,
            ),
        };
        tracing::debug!(
            "publishing {} to {}",
            String::from_utf8_lossy(&payload),
            topic
        );
        // Fire and forget: a failed relay command is only logged.
        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            tracing::error!("mqtt publish to {} failed: {:?}", topic, e);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CentralMirror<'a> {
    #[serde(flatten)]
    regime: &'a Regime,
    heating_active: bool,
    present: bool,
    updated_at: String,
}

impl<'a> CentralMirror<'a> {
    fn new(regime: &'a Regime) -> Self {
        Self {
            regime,
            heating_active: regime.hvac_action == HvacAction::Heating,
            present: matches!(regime.presence_count, Some(count) if count > 0),
            updated_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Retained read-only mirrors of every central and room.
pub async fn status_mirror(
    mut get_snapshot: SnapshotReceiver,
    client: AsyncClient,
    prefix: String,
) -> DrvResult {
    let mut centrals: HashMap<CentralId, Regime> = HashMap::new();
    let mut rooms: HashMap<RoomId, RoomStatus> = HashMap::new();
    loop {
        let snapshot = get_snapshot.borrow_and_update().clone();
        for regime in snapshot.centrals {
            if centrals.get(&regime.central) == Some(&regime) {
                continue;
            }
            let topic = format!("{prefix}/central/{}/state", regime.central);
            let payload = serde_json::to_vec(&CentralMirror::new(&regime))?;
            client
                .publish(topic, QoS::AtLeastOnce, true, payload)
                .await?;
            centrals.insert(regime.central.clone(), regime);
        }
        for room in snapshot.rooms {
            if rooms.get(&room.room) == Some(&room) {
                continue;
            }
            let topic = format!("{prefix}/room/{}/state", room.room);
            client
                .publish(topic, QoS::AtLeastOnce, true, serde_json::to_vec(&room)?)
                .await?;
            rooms.insert(room.room.clone(), room);
        }
        if get_snapshot.changed().await.is_err() {
            return Ok(());
        }
    }
}

pub async fn influx(
    client: influxdb2::Client,
    get_snapshot: SnapshotReceiver,
    infl_buck: String,
) -> DrvResult {
    loop {
        let mut points = vec![];
        {
            let snapshot = get_snapshot.borrow();
            for regime in &snapshot.centrals {
                let mut point = DataPoint::builder("filpilote")
                    .tag("central", regime.central.to_string())
                    .field("preset", regime.active_preset.to_string())
                    .field("heating", regime.hvac_action == HvacAction::Heating)
                    .field("auto_eco", regime.auto_eco_active);
                if let Some(target) = regime.target_temperature {
                    point = point.field("target", target);
                }
                if let Some(current) = regime.current_temperature {
                    point = point.field("temperature", current);
                }
                points.push(point.build()?);
            }
            for room in &snapshot.rooms {
                let mut point = DataPoint::builder("filpilote")
                    .tag("room", room.room.to_string())
                    .field("preset", room.last_applied_preset.to_string())
                    .field("window_open", room.window_open);
                if let Some(current) = room.current_temperature {
                    point = point.field("temperature", current);
                }
                points.push(point.build()?);
            }
        }
        if let Err(e) = client.write(&infl_buck, stream::iter(points)).await {
            tracing::error!("influx write failed: {}", e);
        }
        sleep(Duration::from_secs(300)).await;
    }
}
