//! # MQTT Client Core
//!
//! Everything the operator does against a broker goes through this module: checking
//! that a broker is reachable, publishing single messages or whole batches, and
//! keeping one background subscription alive while views come and go.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address, QoS mapping, per-component settings
//! ├── topic.rs            - Topic name / filter validation and wildcard matching
//! ├── connection.rs       - rumqttc adapter: client ids, CONNACK handling, disconnect
//! ├── probe.rs            - Connect/disconnect reachability check
//! ├── publisher.rs        - One-shot publish with QoS-dependent acknowledgment
//! ├── bulk.rs             - JSON batch publishing with per-item outcomes
//! ├── message_manager.rs  - Received message record
//! ├── mqtt_handler.rs     - Subscriber runtime: shared state, start/stop, accessors
//! └── session.rs          - Background network + state tasks of a subscription
//! ```
//!
//! ## Connection Ownership
//!
//! - **Probe** and **publisher** open a private connection per call and close it
//!   before returning. Concurrent calls never share anything.
//! - The **subscriber runtime** owns at most one connection at a time. Its
//!   background tasks report into the runtime through a channel; the runtime
//!   owns the only lock.
//!
//! ## Error Reporting
//!
//! Probe returns a report, publisher returns `Result<(), PublishError>`. Errors
//! that happen inside the subscriber's background tasks are stored as the
//! runtime's last error and picked up by the next poll. Nothing in here panics
//! on network failures.

pub mod bulk;
pub mod config;
pub mod connection;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod probe;
pub mod publisher;
mod session;
pub mod topic;

pub use bulk::{parse_bulk, publish_bulk, BulkEntry, BulkItem, BulkReport};
pub use config::{BrokerAddress, ProbeSettings, PublisherSettings, SubscriberSettings};
pub use error::{ConnectError, MqttError, PublishError, SubscribeError};
pub use message_manager::MQTTMessage;
pub use mqtt_handler::{ConnectionState, MQTTStatus, SubscriberRuntime};
pub use probe::{probe, ProbeReport};
pub use publisher::{publish, PayloadFormat, PublishRequest};
pub use topic::TopicFilter;
