//! Background half of the subscriber runtime
//!
//! A session is two tokio tasks connected by a channel:
//!
//! ```text
//!  EventLoop ──► network task ──[SessionEvent]──► state task ──► RuntimeState (locked)
//!                (owns socket)                    (statum machine)
//! ```
//!
//! The network task only translates rumqttc events; the state task is the single
//! place where callbacks touch shared state. Both stop when the session's
//! cancellation token fires.
//!
//! # State Machine
//!
//! ```text
//! Connecting ──► Active ──► Closed
//!      │                      ▲
//!      └──────────────────────┘
//!   (refused / cancelled)
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS, SubAck, SubscribeReasonCode};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{qos_from_level, BrokerAddress, SubscriberSettings};
use super::connection::{self, ConnectOutcome, Role};
use super::error::{SubscribeError, TeardownError};
use super::message_manager::MQTTMessage;
use super::mqtt_handler::{lock, ConnectionState, RuntimeState, SharedState};
use super::topic::TopicFilter;

const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// What the network task reports to the state task
#[derive(Debug)]
pub enum SessionEvent {
    Connected(ConnectOutcome),
    Subscribed(Result<QoS, SubscribeError>),
    Message(MQTTMessage),
    Disconnected(String),
}

impl SessionEvent {
    fn from_suback(ack: &SubAck, filter: &TopicFilter) -> Self {
        match ack.return_codes.first() {
            Some(SubscribeReasonCode::Success(granted)) => SessionEvent::Subscribed(Ok(*granted)),
            _ => SessionEvent::Subscribed(Err(SubscribeError::Refused(filter.to_string()))),
        }
    }

    /// Events after which the network task has nothing left to do
    fn ends_session(&self) -> bool {
        matches!(
            self,
            SessionEvent::Disconnected(_) | SessionEvent::Connected(ConnectOutcome::Refused(_))
        )
    }
}

/// Owned by the runtime while a session exists
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    network_task: JoinHandle<()>,
    state_task: JoinHandle<()>,
}

impl SessionHandle {
    /// Stops both tasks from applying anything further. Cheap, safe under the lock.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.network_task.is_finished() && self.state_task.is_finished()
    }

    /// Cancels and waits for both tasks; the socket is closed once this returns
    pub async fn close(self) -> Result<(), TeardownError> {
        self.cancel.cancel();
        let network = self.network_task.await;
        let state = self.state_task.await;
        network?;
        state?;
        Ok(())
    }
}

/// Opens a new subscriber connection and spawns its tasks
///
/// Nothing touches the network here; the first poll inside the network task
/// resolves and connects.
pub(crate) fn spawn(
    shared: SharedState,
    broker: &BrokerAddress,
    filter: TopicFilter,
    settings: &SubscriberSettings,
) -> Result<SessionHandle, SubscribeError> {
    let qos = qos_from_level(settings.subscribe_qos)
        .map_err(|e| SubscribeError::Request(e.to_string()))?;
    let capacity = settings.channel_capacity.max(1);

    let options = connection::session_options(Role::Subscriber, broker, settings.keep_alive());
    let (client, eventloop) = AsyncClient::new(options, capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();

    debug!("Spawning subscriber session for {} on {}", filter, broker);

    let network_task = tokio::spawn(pump_network(
        eventloop,
        client.clone(),
        event_tx,
        filter.clone(),
        cancel.clone(),
    ));

    let session = SubscriptionSession::create(client, event_rx, shared, filter, qos, cancel.clone());
    let state_task = tokio::spawn(async move {
        let closed = match session.await_connect().await {
            Ok(active) => active.run_until_closed().await,
            Err(closed) => closed,
        };
        closed.finish();
    });

    Ok(SessionHandle {
        cancel,
        network_task,
        state_task,
    })
}

/// Polls the event loop and forwards the events the state task cares about
///
/// Exits on cancellation, on the first connection error, or when the state
/// task has gone away. Reconnecting is left to the next `start`.
async fn pump_network(
    mut eventloop: EventLoop,
    client: AsyncClient,
    events: mpsc::Sender<SessionEvent>,
    filter: TopicFilter,
    cancel: CancellationToken,
) {
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let outcome = ConnectOutcome::from_connack(&ack);
                connected = outcome == ConnectOutcome::Accepted;
                SessionEvent::Connected(outcome)
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => SessionEvent::from_suback(&ack, &filter),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                SessionEvent::Message(MQTTMessage::from_publish(&publish))
            }
            Ok(_) => continue,
            Err(e) if connected => {
                connected = false;
                SessionEvent::Disconnected(e.to_string())
            }
            Err(e) => SessionEvent::Connected(ConnectOutcome::from_error(&e)),
        };

        let ends_session = event.ends_session();
        if events.send(event).await.is_err() {
            debug!("State task for {} is gone, stopping network loop", filter);
            break;
        }
        if ends_session {
            break;
        }
    }

    if connected {
        if let Err(e) = connection::disconnect(&client, &mut eventloop, DISCONNECT_GRACE).await {
            debug!("Subscriber disconnect was not clean: {}", e);
        }
    }
    debug!("Network loop for {} stopped", filter);
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Connecting,
    Active,
    Closed,
}

/// The state task: applies session events to the shared runtime state
#[machine]
pub struct SubscriptionSession<S: SessionPhase> {
    client: AsyncClient,
    events: mpsc::Receiver<SessionEvent>,
    shared: SharedState,
    filter: TopicFilter,
    qos: QoS,
    cancel: CancellationToken,
}

impl<S: SessionPhase> SubscriptionSession<S> {
    /// Applies `change` unless the session was torn down in the meantime.
    /// The cancellation check happens under the lock, so `stop` wins races.
    fn apply(&self, change: impl FnOnce(&mut RuntimeState)) -> bool {
        let mut state = lock(&self.shared);
        if self.cancel.is_cancelled() {
            return false;
        }
        change(&mut state);
        true
    }

    fn fail(&self, reason: String) {
        error!("Subscriber session for {} failed: {}", self.filter, reason);
        self.apply(|state| {
            state.last_error = Some(reason);
            state.mark_inactive();
        });
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }
}

impl SubscriptionSession<Connecting> {
    pub(crate) fn create(
        client: AsyncClient,
        events: mpsc::Receiver<SessionEvent>,
        shared: SharedState,
        filter: TopicFilter,
        qos: QoS,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(client, events, shared, filter, qos, cancel)
    }

    /// Waits for the broker's answer and subscribes on success
    pub async fn await_connect(
        mut self,
    ) -> Result<SubscriptionSession<Active>, SubscriptionSession<Closed>> {
        loop {
            match self.next_event().await {
                Some(SessionEvent::Connected(ConnectOutcome::Accepted)) => break,
                Some(SessionEvent::Connected(ConnectOutcome::Refused(e))) => {
                    self.fail(format!("Connect failed: {}", e));
                    return Err(self.transition());
                }
                Some(other) => debug!("Ignoring {:?} before CONNACK", other),
                None => return Err(self.transition()),
            }
        }

        if let Err(e) = self.client.subscribe(self.filter.as_str(), self.qos).await {
            self.fail(SubscribeError::Request(e.to_string()).to_string());
            self.cancel.cancel();
            return Err(self.transition());
        }

        let filter = self.filter.to_string();
        if self.apply(|state| {
            state.connection_state = ConnectionState::Active;
            state.topic = filter;
        }) {
            info!("Subscriber active on {}", self.filter);
        }
        Ok(self.transition())
    }
}

impl SubscriptionSession<Active> {
    /// Appends deliveries until the connection drops or the session is stopped
    pub async fn run_until_closed(mut self) -> SubscriptionSession<Closed> {
        while let Some(event) = self.next_event().await {
            match event {
                SessionEvent::Message(message) => {
                    if !self.filter.matches(message.topic()) {
                        debug!("Dropping message on {} outside {}", message.topic(), self.filter);
                        continue;
                    }
                    if !self.apply(|state| state.messages.push(message)) {
                        break;
                    }
                }
                SessionEvent::Subscribed(Ok(granted)) => {
                    debug!("Subscription to {} granted at {:?}", self.filter, granted);
                }
                SessionEvent::Subscribed(Err(e)) => {
                    self.fail(e.to_string());
                    self.cancel.cancel();
                    break;
                }
                SessionEvent::Disconnected(reason) => {
                    warn!("Subscriber for {} lost its connection: {}", self.filter, reason);
                    self.apply(|state| {
                        if state.connection_state == ConnectionState::Active {
                            state.last_error = Some(format!("Connection lost: {}", reason));
                            state.mark_inactive();
                        }
                    });
                    break;
                }
                SessionEvent::Connected(outcome) => {
                    debug!("Unexpected connect outcome while active: {:?}", outcome);
                }
            }
        }
        self.transition()
    }
}

impl SubscriptionSession<Closed> {
    pub fn finish(self) {
        debug!("Subscriber session for {} closed", self.filter);
    }
}
