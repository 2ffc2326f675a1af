use std::fmt;
use std::time::Duration;

use rumqttc::AsyncClient;
use tracing::{debug, info, warn};

use super::config::{BrokerAddress, ProbeSettings};
use super::connection::{self, Role};

const PROBE_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Outcome of a reachability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub reachable: bool,
    pub message: String,
}

impl ProbeReport {
    pub fn into_pair(self) -> (bool, String) {
        (self.reachable, self.message)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Connects to `broker`, waits for CONNACK and disconnects again
///
/// Never fails: every transport or protocol error ends up in the report. The
/// whole handshake is bounded by the configured timeout.
pub async fn probe(broker: &BrokerAddress, settings: &ProbeSettings) -> ProbeReport {
    info!("Probing broker {}", broker);

    let options = connection::session_options(Role::Probe, broker, PROBE_KEEP_ALIVE);
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    match connection::await_connack(&mut eventloop, settings.timeout()).await {
        Ok(()) => {
            if let Err(e) = connection::disconnect(&client, &mut eventloop, DISCONNECT_GRACE).await
            {
                debug!("Probe disconnect from {} was not clean: {}", broker, e);
            }
            info!("Broker {} is reachable", broker);
            ProbeReport {
                reachable: true,
                message: "Connected successfully!".to_string(),
            }
        }
        Err(e) => {
            warn!("Broker {} is not reachable: {}", broker, e);
            ProbeReport {
                reachable: false,
                message: format!("Connection failed: {}", e),
            }
        }
    }
}
