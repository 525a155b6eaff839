use anyhow::Context;
use clap::Parser;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::task;
use tracing::Level;

mod config;
mod err;
mod manager;
mod store;
mod tasks;
use crate::config::{config_path, Config};
use crate::err::DrvResult;
use crate::manager::{Event as HeatingEvent, Manager};
use crate::tasks::{command_topic, influx, mqtt_publish, mqtt_receive, status_mirror, subscribe_all};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Installation file, defaults to the user config directory.
    #[arg(long, env = "FILPILOTE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_USER")]
    mqtt_user: Option<String>,

    #[arg(long, env = "MQTT_PASS")]
    mqtt_pass: Option<String>,

    #[arg(long, env = "MQTT_PREFIX", default_value = "filpilote")]
    mqtt_prefix: String,

    #[arg(long, env = "INFL_BUCK", default_value = "filpilote")]
    infl_buck: String,

    #[arg(long, env = "INFL_ORG", default_value = "filpilote")]
    infl_org: String,

    #[arg(long, env = "INFL_URL", default_value = "http://localhost:8086")]
    infl_url: String,

    /// InfluxDB export is disabled without a token.
    #[arg(long, env = "INFL_TOKEN")]
    infl_token: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> DrvResult {
    let args = Args::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::from_str(&args.log_level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let path = args.config.clone().unwrap_or_else(config_path);
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load installation from {}", path.display()))?;
    tracing::info!(
        "{}: {} rooms, {} entities",
        config.central.id,
        config.rooms.len(),
        config.entities.len()
    );

    let (event_send, event_receive) = async_channel::unbounded();
    let (to_mqtt_send, to_mqtt_receive) = async_channel::unbounded();
    let (from_mqtt_send, from_mqtt_receive) = async_channel::unbounded();

    let heating = Manager::new(&config, to_mqtt_send).context("Invalid installation")?;
    let mut topics = heating.topics();
    topics.push(command_topic(&args.mqtt_prefix));
    let (snapshot_send, snapshot_receive) = tokio::sync::watch::channel(heating.snapshot());

    let lwt_topic = format!("{}/lwt", args.mqtt_prefix);
    let lwt = LastWill::new(&lwt_topic, "Offline", QoS::AtLeastOnce, true);

    let mut mqttoptions = MqttOptions::new("filpilote", args.mqtt_host, args.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(5));
    mqttoptions.set_last_will(lwt);
    if let (Some(user), Some(pass)) = (args.mqtt_user, args.mqtt_pass) {
        mqttoptions.set_credentials(user, pass);
    }

    let (client, mut connection) = AsyncClient::new(mqttoptions, 64);

    task::spawn(async move { heating.run(event_receive, snapshot_send).await });

    let prefix = args.mqtt_prefix.clone();
    let to_manager = event_send.clone();
    task::spawn(async move {
        if let Err(e) = mqtt_receive(from_mqtt_receive, to_manager, prefix).await {
            tracing::error!("mqtt receiver stopped: {:?}", e);
        }
    });

    let (publisher, prefix) = (client.clone(), args.mqtt_prefix.clone());
    task::spawn(async move {
        if let Err(e) = mqtt_publish(to_mqtt_receive, publisher, prefix).await {
            tracing::error!("mqtt publisher stopped: {:?}", e);
        }
    });

    let (mirror, prefix) = (client.clone(), args.mqtt_prefix.clone());
    let mirror_snapshot = snapshot_receive.clone();
    task::spawn(async move {
        if let Err(e) = status_mirror(mirror_snapshot, mirror, prefix).await {
            tracing::error!("status mirror stopped: {:?}", e);
        }
    });

    if let Some(token) = args.infl_token {
        let influx_client = influxdb2::Client::new(args.infl_url, args.infl_org, token);
        let bucket = args.infl_buck;
        task::spawn(async move {
            if let Err(e) = influx(influx_client, snapshot_receive, bucket).await {
                tracing::error!("influx export stopped: {:?}", e);
            }
        });
    }

    // Give retained sensor states time to arrive before the first push.
    let resync = event_send.clone();
    task::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        if let Err(e) = resync.send(HeatingEvent::Resync).await {
            tracing::error!("initial resync not sent: {}", e);
        }
    });

    // mqtt event loop (main) task
    loop {
        match connection.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => from_mqtt_send.send(p).await?,
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("mqtt connected");
                let (client, topics, lwt) = (client.clone(), topics.clone(), lwt_topic.clone());
                task::spawn(async move {
                    subscribe_all(client.clone(), topics).await;
                    if let Err(e) = client
                        .publish(lwt, QoS::AtLeastOnce, true, "Online")
                        .await
                    {
                        tracing::error!("online announce failed: {:?}", e);
                    }
                });
            }
            Err(n) => {
                tracing::error!("incoming mqtt packet Err:  {:?}", n);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok(_) => {}
        }
    }
}
