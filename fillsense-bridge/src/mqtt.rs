//! MQTT side of the bridge
//!
//! `MqttSession` connects once and fails if the broker does not accept the
//! connection. A background task then drives the rumqttc event loop, so a
//! publish only hands the packet to the client queue and never waits for the
//! PUBACK. The task counts acknowledgements, and `close` holds the DISCONNECT
//! back until every QoS 1/2 publish is acknowledged or `SHUTDOWN_GRACE` runs
//! out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::BridgeError;

/// Capacity of the rumqttc request queue
const REQUEST_QUEUE: usize = 10;

/// Pause between event loop errors, rumqttc reconnects on the next poll
const ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Bound on each shutdown stage: pending acks, the DISCONNECT, the task join
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Where normalized records go
#[async_trait]
pub trait TelemetrySink: Send {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Release the connection; must be safe to call more than once
    async fn close(&mut self) -> Result<(), BridgeError>;
}

pub struct MqttSession {
    client: AsyncClient,
    driver: Option<JoinHandle<()>>,
    /// QoS 1/2 publishes handed to the client and not yet acknowledged
    unacked: Arc<watch::Sender<usize>>,
}

impl MqttSession {
    /// Connect and wait for the broker's CONNACK
    pub async fn connect(config: &MqttConfig) -> Result<Self, BridgeError> {
        let client_id = config.client_id();
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.broker_host, config.broker_port, client_id
        );

        let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        // Token-based auth: the token is the username, no password.
        options.set_credentials(config.access_token.clone(), String::new());

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE);

        let deadline = config.connect_timeout();
        match timeout(deadline, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result?,
            Err(_) => return Err(BridgeError::MqttConnectTimeout(deadline)),
        }
        info!("Connected to MQTT broker");

        let (unacked, _) = watch::channel(0);
        let unacked = Arc::new(unacked);
        let driver = tokio::spawn(drive(eventloop, unacked.clone()));
        Ok(Self {
            client,
            driver: Some(driver),
            unacked,
        })
    }

    /// Publishes still waiting for PUBACK (or PUBCOMP)
    pub fn unacked(&self) -> usize {
        *self.unacked.borrow()
    }

    async fn wait_for_acks(&self) {
        let mut pending = self.unacked.subscribe();
        let drained = async move {
            loop {
                let count = *pending.borrow_and_update();
                if count == 0 {
                    return true;
                }
                if pending.changed().await.is_err() {
                    return false;
                }
            }
        };
        if !matches!(timeout(SHUTDOWN_GRACE, drained).await, Ok(true)) {
            warn!(
                "{} readings not acknowledged by the broker after {:?}",
                self.unacked(),
                SHUTDOWN_GRACE
            );
        }
    }
}

#[async_trait]
impl TelemetrySink for MqttSession {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), BridgeError> {
        // Counted before the hand-off, the PUBACK can beat `publish` returning.
        let tracked = qos != QoS::AtMostOnce;
        if tracked {
            self.unacked.send_modify(|count| *count += 1);
        }
        let sent = self.client.publish(topic, qos, false, payload).await;
        if sent.is_err() && tracked {
            self.unacked.send_modify(|count| *count = count.saturating_sub(1));
        }
        sent.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        self.wait_for_acks().await;
        let sent = match timeout(SHUTDOWN_GRACE, self.client.disconnect()).await {
            Ok(sent) => sent.map_err(BridgeError::from),
            Err(_) => {
                warn!("MQTT request queue still full after {:?}", SHUTDOWN_GRACE);
                Ok(())
            }
        };
        if timeout(SHUTDOWN_GRACE, &mut driver).await.is_err() {
            warn!("MQTT event loop still running after {:?}, aborting it", SHUTDOWN_GRACE);
            driver.abort();
        }

        info!("MQTT session closed");
        sent
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BridgeError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(BridgeError::MqttRefused(code))
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn drive(mut eventloop: EventLoop, unacked: Arc<watch::Sender<usize>>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                debug!("PUBACK for packet {}", ack.pkid);
                unacked.send_modify(|count| *count = count.saturating_sub(1));
            }
            Ok(Event::Incoming(Incoming::PubComp(comp))) => {
                debug!("PUBCOMP for packet {}", comp.pkid);
                unacked.send_modify(|count| *count = count.saturating_sub(1));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                error!("MQTT connection error: {}", e);
                sleep(ERROR_PAUSE).await;
            }
        }
    }
}
