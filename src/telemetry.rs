use crate::prelude::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, QoS};
use std::sync::{Arc, Mutex};

use crate::echonet::properties::{
    format_cumulative_kwh_string, Coefficient, CumulativeWattHour, InstantAmpere, InstantWatt,
    Unit,
};
use crate::session::SessionStats;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    pub fn for_instant_watt(
        mqtt: &config::Mqtt,
        at: DateTime<Utc>,
        watt: InstantWatt,
    ) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/instant_watt", mqtt.sensor_id()),
            retain: false,
            payload: serde_json::to_string(&serde_json::json!({
                "device_id": mqtt.device_id(),
                "sensor_id": mqtt.sensor_id(),
                "measured_at": at.to_rfc3339_opts(SecondsFormat::Secs, true),
                "instant_watt": watt.0,
            }))?,
        })
    }

    pub fn for_instant_ampere(
        mqtt: &config::Mqtt,
        at: DateTime<Utc>,
        ampere: InstantAmpere,
    ) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/instant_ampere", mqtt.sensor_id()),
            retain: false,
            payload: serde_json::to_string(&serde_json::json!({
                "device_id": mqtt.device_id(),
                "sensor_id": mqtt.sensor_id(),
                "measured_at": at.to_rfc3339_opts(SecondsFormat::Secs, true),
                "instant_ampere_r": ampere.ampere_r(),
                "instant_ampere_t": ampere.ampere_t(),
            }))?,
        })
    }

    /// Cumulative energy goes out as the exact decimal-shifted string, with
    /// the meter's own measurement timestamp.
    pub fn for_cumulative(
        mqtt: &config::Mqtt,
        cwh: &CumulativeWattHour,
        coefficient: Option<Coefficient>,
        unit: Unit,
    ) -> Result<Message> {
        let measured_at = cwh
            .to_iso8601()
            .ok_or_else(|| anyhow!("cumulative reading has no valid timestamp"))?;
        Ok(Message {
            topic: format!("{}/cumulative_kwh", mqtt.sensor_id()),
            retain: true,
            payload: serde_json::to_string(&serde_json::json!({
                "device_id": mqtt.device_id(),
                "sensor_id": mqtt.sensor_id(),
                "measured_at": measured_at,
                "cumulative_kwh": format_cumulative_kwh_string(cwh, coefficient, unit),
            }))?,
        })
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

#[derive(Clone)]
pub struct Telemetry {
    config: ConfigWrapper,
    channels: Channels,
    shared_stats: Arc<Mutex<SessionStats>>,
}

impl Telemetry {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        shared_stats: Arc<Mutex<SessionStats>>,
    ) -> Self {
        Self {
            config,
            channels,
            shared_stats,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("routeb-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping telemetry client...");
        let _ = self.channels.to_telemetry.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // keeps the connection serviced; we publish only, no subscriptions
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown_rx = self.channels.to_telemetry.subscribe();

        loop {
            tokio::select! {
                msg = shutdown_rx.recv() => {
                    if matches!(msg, Ok(ChannelData::Shutdown)) {
                        info!("telemetry receiver shutting down");
                        break;
                    }
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                        Err(e) => {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("telemetry receiver loop exiting");
        Ok(())
    }

    // session -> broker
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_telemetry.subscribe();

        loop {
            match receiver.recv().await? {
                Shutdown => {
                    info!("telemetry sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    info!("publishing: {} = {}", topic, message.payload);
                    let payload = message.payload.as_bytes().to_vec();
                    let mut attempt = 0;
                    loop {
                        match client
                            .publish(&topic, QoS::AtLeastOnce, message.retain, payload.as_slice())
                            .await
                        {
                            Ok(_) => {
                                if let Ok(mut stats) = self.shared_stats.lock() {
                                    stats.mqtt_messages_sent += 1;
                                }
                                break;
                            }
                            Err(err) => {
                                attempt += 1;
                                if let Ok(mut stats) = self.shared_stats.lock() {
                                    stats.mqtt_errors += 1;
                                }
                                if attempt >= 3 {
                                    error!("MQTT publish failed: {:?} - dropping message", err);
                                    break;
                                }
                                error!(
                                    "MQTT publish failed: {:?} - retrying in 10s (attempt {}/3)",
                                    err, attempt
                                );
                                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                            }
                        }
                    }
                }
            }
        }

        info!("telemetry sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
