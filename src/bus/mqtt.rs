//! MQTT bus backend on `rumqttc`.
//!
//! The event loop runs on its own task and turns broker events into
//! [`BusHandler`] callbacks. `rumqttc` reconnects on the next poll after an
//! error, so the loop only has to back off and keep polling.

use super::{Bus, BusError, BusHandler};
use crate::registration::RegistrationManager;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::time::Duration;
use tracing::{debug, info};

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// Pause before polling again after a connection error.
    pub reconnect_delay: Duration,
    /// Bound on requests queued between the client handle and the event loop.
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
            request_capacity: 64,
        }
    }
}

/// Client handle; cheap to share, all calls enqueue without blocking.
#[derive(Clone, Debug)]
pub struct MqttBus {
    client: AsyncClient,
}

impl Bus for MqttBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

impl MqttBus {
    /// Build the client with the unregistered status installed as last-will.
    ///
    /// Nothing is sent until the returned event loop is polled.
    pub fn new(
        broker: &BrokerConfig,
        registration: &RegistrationManager,
    ) -> Result<(Self, EventLoop), BusError> {
        let mut options = MqttOptions::new(registration.client_id(), &broker.host, broker.port);
        options.set_keep_alive(broker.keep_alive);
        options.set_last_will(LastWill::new(
            registration.status_topic(),
            registration.retract().to_payload()?,
            QoS::AtMostOnce,
            false,
        ));

        let (client, eventloop) = AsyncClient::new(options, broker.request_capacity);
        Ok((Self { client }, eventloop))
    }

    /// Publish the unregistered status and ask for a clean disconnect.
    ///
    /// Both requests only enqueue, so this returns at once even when the
    /// broker is unreachable and the request queue is full. The event loop
    /// exits once the disconnect has gone out.
    pub fn shutdown(&self, registration: &RegistrationManager) -> Result<(), BusError> {
        let retracted = registration
            .retract()
            .to_payload()
            .map_err(BusError::from)
            .and_then(|payload| self.publish(&registration.status_topic(), payload));
        self.client
            .try_disconnect()
            .map_err(|e| BusError::Disconnect(e.to_string()))?;
        retracted
    }
}

/// Drive the event loop until a client-requested disconnect is sent.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    handler: BusHandler,
    reconnect_delay: Duration,
) {
    info!(
        host = %eventloop.mqtt_options.broker_address().0,
        port = eventloop.mqtt_options.broker_address().1,
        "Starting MQTT event loop"
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                handler.on_connect(ack.code == ConnectReturnCode::Success, ack.code)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler.on_message(&publish.topic, &publish.payload)
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                handler.on_disconnect("broker closed the session")
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                handler.on_disconnect("client shutdown");
                break;
            }
            Ok(event) => debug!(event = ?event, "MQTT event"),
            Err(ConnectionError::ConnectionRefused(code)) => {
                handler.on_connect(false, code);
                tokio::time::sleep(reconnect_delay).await;
            }
            Err(e) => {
                handler.on_disconnect(&e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
