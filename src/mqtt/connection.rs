//! Protocol adapter shared by probe, publisher and subscriber
//!
//! Everything that interprets raw rumqttc events into connection outcomes lives
//! here, so the rest of the crate only deals with [`ConnectOutcome`] and the
//! error types in [`super::error`].

use std::fmt;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet,
};
use tracing::debug;

use super::config::BrokerAddress;
use super::error::{ConnectError, TeardownError};

const CLIENT_ID_PREFIX: &str = "topicmgr";
const CLIENT_ID_MODULUS: i64 = 100_000;

/// Which part of the application owns a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Subscriber,
    Publisher,
    Probe,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::Subscriber => "subscriber",
            Role::Publisher => "publisher",
            Role::Probe => "probe",
        };
        write!(f, "{}", name)
    }
}

/// `<role>-<epoch millis mod 100000>`, unique enough to avoid broker-side
/// session takeover between consecutive runs
pub fn client_id(role: Role) -> String {
    let millis = chrono::Utc::now().timestamp_millis().rem_euclid(CLIENT_ID_MODULUS);
    format!("{}-{}-{}", CLIENT_ID_PREFIX, role, millis)
}

/// Clean-session options for a fresh connection
pub fn session_options(role: Role, broker: &BrokerAddress, keep_alive: Duration) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(role), broker.host(), broker.port());
    options
        .set_keep_alive(keep_alive)
        .set_clean_session(true);
    options
}

/// Result of a connection attempt, decided once at this boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accepted,
    Refused(ConnectError),
}

impl ConnectOutcome {
    pub fn from_connack(ack: &ConnAck) -> Self {
        match ack.code {
            ConnectReturnCode::Success => ConnectOutcome::Accepted,
            code => ConnectOutcome::Refused(ConnectError::Refused(format!("{:?}", code))),
        }
    }

    pub fn from_error(error: &ConnectionError) -> Self {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                ConnectOutcome::Refused(ConnectError::Refused(format!("{:?}", code)))
            }
            other => ConnectOutcome::Refused(ConnectError::Unreachable(other.to_string())),
        }
    }
}

/// Drives the event loop until the broker answers the CONNECT
///
/// The event loop opens the socket lazily on its first poll, so this is where
/// DNS and transport failures surface.
pub async fn await_connack(
    eventloop: &mut EventLoop,
    timeout: Duration,
) -> Result<(), ConnectError> {
    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return ConnectOutcome::from_connack(&ack)
                }
                Ok(event) => debug!("Event before CONNACK: {:?}", event),
                Err(e) => return ConnectOutcome::from_error(&e),
            }
        }
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(ConnectOutcome::Accepted) => Ok(()),
        Ok(ConnectOutcome::Refused(e)) => Err(e),
        Err(_) => Err(ConnectError::TimedOut(timeout)),
    }
}

/// Sends DISCONNECT and waits until it has left the client
///
/// Only call this on a connected event loop; polling a disconnected one would
/// open a new connection first.
pub async fn disconnect(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    grace: Duration,
) -> Result<(), TeardownError> {
    client
        .try_disconnect()
        .map_err(|e| TeardownError::Disconnect(e.to_string()))?;

    let drain = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TeardownError::Disconnect(e.to_string())),
            }
        }
    };

    tokio::time::timeout(grace, drain)
        .await
        .map_err(|_| TeardownError::Disconnect(format!("no DISCONNECT sent within {:?}", grace)))?
}
