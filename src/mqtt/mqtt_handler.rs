//! Subscriber runtime
//!
//! Long-lived owner of the one background subscription a process has. Created
//! once at the composition root and shared by reference with every view that
//! needs it. Views call [`SubscriberRuntime::start`] / [`SubscriberRuntime::stop`]
//! and poll the accessors; the session tasks in [`super::session`] feed messages
//! and status changes in from the background.
//!
//! # Locking
//!
//! All mutable state sits behind one `std::sync::Mutex`. Critical sections only
//! copy or move data; no network I/O and no `.await` happens while it is held.
//! `start` and `stop` are additionally serialized by an async transition lock so
//! that a teardown always completes before the next session is installed.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive ──start──► Connecting ──CONNACK──► Active
//!    ▲                    │                      │
//!    └──── refused ───────┘                      │
//!    └──── stop / connection lost ───────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::config::{BrokerAddress, SubscriberSettings, DEFAULT_BROKER_PORT};
use super::error::SubscribeError;
use super::message_manager::MQTTMessage;
use super::session::{self, SessionHandle};
use super::topic::TopicFilter;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Inactive,
    Connecting,
    Active,
}

/// Copy of the runtime's status taken under a single lock
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub topic: String,
    pub last_error: Option<String>,
    pub broker: Option<BrokerAddress>,
    pub messages_received: usize,
}

impl MQTTStatus {
    pub fn is_active(&self) -> bool {
        self.connection_state == ConnectionState::Active
    }
}

#[derive(Debug, Default)]
pub(crate) struct RuntimeState {
    /// Present from `start` until the next `stop`/`start`, even after the
    /// connection dropped, so its tasks can be joined
    pub(crate) session: Option<SessionHandle>,
    pub(crate) messages: Vec<MQTTMessage>,
    pub(crate) connection_state: ConnectionState,
    pub(crate) topic: String,
    pub(crate) last_error: Option<String>,
    pub(crate) broker: Option<BrokerAddress>,
}

impl RuntimeState {
    pub(crate) fn mark_inactive(&mut self) {
        self.connection_state = ConnectionState::Inactive;
        self.topic.clear();
    }

    fn status(&self) -> MQTTStatus {
        MQTTStatus {
            connection_state: self.connection_state,
            topic: self.topic.clone(),
            last_error: self.last_error.clone(),
            broker: self.broker.clone(),
            messages_received: self.messages.len(),
        }
    }
}

pub(crate) type SharedState = Arc<Mutex<RuntimeState>>;

/// A panic while holding the lock leaves the state consistent (every critical
/// section is a plain assignment), so poisoning is ignored.
pub(crate) fn lock(shared: &SharedState) -> MutexGuard<'_, RuntimeState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SubscriberRuntime {
    shared: SharedState,
    transitions: tokio::sync::Mutex<()>,
    settings: SubscriberSettings,
}

impl SubscriberRuntime {
    pub fn new(settings: SubscriberSettings) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RuntimeState::default())),
            transitions: tokio::sync::Mutex::new(()),
            settings,
        }
    }

    pub fn settings(&self) -> &SubscriberSettings {
        &self.settings
    }

    /// Replaces any running subscription with one on `topic`
    ///
    /// Always tears the previous session down first, then clears the message log
    /// and the last error. The connection itself is made in the background; poll
    /// [`Self::is_active`] / [`Self::last_error`] to see how it went.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] if the session could not even be set up (bad
    /// filter, bad settings). The same message is recorded as the last error and
    /// the runtime stays inactive.
    pub async fn start(&self, broker: &BrokerAddress, topic: &str) -> Result<(), SubscribeError> {
        let _transition = self.transitions.lock().await;
        self.teardown().await;

        {
            let mut state = self.state();
            state.messages.clear();
            state.last_error = None;
            state.broker = Some(broker.clone());
        }

        let filter = match TopicFilter::parse(topic) {
            Ok(filter) => filter,
            Err(e) => return Err(self.record_start_failure(SubscribeError::from(e))),
        };

        info!("Starting subscriber on {} for {}", broker, filter);

        let mut state = self.state();
        match session::spawn(self.shared.clone(), broker, filter.clone(), &self.settings) {
            Ok(handle) => {
                state.session = Some(handle);
                state.topic = filter.to_string();
                state.connection_state = ConnectionState::Connecting;
                Ok(())
            }
            Err(e) => {
                drop(state);
                Err(self.record_start_failure(e))
            }
        }
    }

    /// Tears down the subscription. Idempotent; never fails.
    pub async fn stop(&self) {
        let _transition = self.transitions.lock().await;
        self.teardown().await;
    }

    /// Stops the subscription for good; call once at process shutdown
    pub async fn shutdown(self) {
        self.stop().await;
        info!("Subscriber runtime shut down");
    }

    async fn teardown(&self) {
        let session = {
            let mut state = self.state();
            let session = state.session.take();
            if let Some(session) = &session {
                session.cancel();
            }
            state.mark_inactive();
            session
        };

        if let Some(session) = session {
            debug!("Closing subscriber session");
            match session.close().await {
                Ok(()) => info!("Subscriber stopped"),
                Err(e) => warn!("Ignoring error while stopping subscriber: {}", e),
            }
        }
    }

    fn record_start_failure(&self, error: SubscribeError) -> SubscribeError {
        warn!("Subscriber could not start: {}", error);
        let mut state = self.state();
        state.last_error = Some(error.to_string());
        state.mark_inactive();
        error
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        lock(&self.shared)
    }

    pub fn is_active(&self) -> bool {
        self.state().connection_state == ConnectionState::Active
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().connection_state
    }

    /// Subscribed filter; empty unless connecting or active
    pub fn topic(&self) -> String {
        self.state().topic.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Host of the last `start`, empty before the first one
    pub fn broker_host(&self) -> String {
        self.state()
            .broker
            .as_ref()
            .map(|broker| broker.host().to_string())
            .unwrap_or_default()
    }

    pub fn broker_port(&self) -> u16 {
        self.state()
            .broker
            .as_ref()
            .map_or(DEFAULT_BROKER_PORT, BrokerAddress::port)
    }

    /// Snapshot of the log in arrival order
    pub fn messages(&self) -> Vec<MQTTMessage> {
        self.state().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn clear_messages(&self) {
        self.state().messages.clear();
    }

    pub fn status(&self) -> MQTTStatus {
        self.state().status()
    }

    /// Status and message log copied under the same lock, so the two agree
    pub fn snapshot(&self) -> (MQTTStatus, Vec<MQTTMessage>) {
        let state = self.state();
        (state.status(), state.messages.clone())
    }

    /// True while background tasks of the current or last session still run
    pub fn has_running_session(&self) -> bool {
        self.state()
            .session
            .as_ref()
            .is_some_and(|session| !session.is_finished())
    }
}

impl Default for SubscriberRuntime {
    fn default() -> Self {
        Self::new(SubscriberSettings::default())
    }
}

impl Drop for SubscriberRuntime {
    fn drop(&mut self) {
        if let Some(session) = self.state().session.take() {
            session.cancel();
        }
    }
}
