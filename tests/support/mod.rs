//! Minimal in-process MQTT 3.1.1 broker for integration tests
//!
//! Supports CONNECT, SUBSCRIBE, UNSUBSCRIBE, PUBLISH at QoS 0/1/2 in both
//! directions, retained messages, PINGREQ and DISCONNECT. Behaviour knobs let a
//! test refuse connections or subscriptions, and `kick_clients` drops every
//! open connection to simulate a broker-side disconnect.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mqtt_topic_manager::mqtt::{BrokerAddress, TopicFilter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const PUBREC: u8 = 5;
const PUBREL: u8 = 6;
const PUBCOMP: u8 = 7;
const SUBSCRIBE: u8 = 8;
const UNSUBSCRIBE: u8 = 10;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, Default)]
pub struct BrokerBehavior {
    /// CONNACK return code; 0 accepts, 5 is "not authorized"
    pub connack_code: u8,
    pub reject_subscriptions: bool,
    /// Closes the connection instead of handling any PUBLISH
    pub drop_on_publish: bool,
}

struct Subscription {
    client: u64,
    filter: TopicFilter,
    qos: u8,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    behavior: BrokerBehavior,
    subscriptions: Mutex<Vec<Subscription>>,
    retained: Mutex<HashMap<String, (Vec<u8>, u8)>>,
    kick: Mutex<CancellationToken>,
    next_client: AtomicU64,
    next_pkid: AtomicU16,
    connects: AtomicUsize,
    publishes: AtomicUsize,
}

impl Shared {
    fn pkid(&self) -> u16 {
        loop {
            let pkid = self.next_pkid.fetch_add(1, Ordering::Relaxed);
            if pkid != 0 {
                return pkid;
            }
        }
    }
}

pub struct TestBroker {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::with_behavior(BrokerBehavior::default()).await
    }

    pub async fn with_behavior(behavior: BrokerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test broker");
        let addr = listener.local_addr().expect("test broker address");
        let shared = Arc::new(Shared {
            behavior,
            ..Shared::default()
        });

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let client = accept_shared.next_client.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(serve(stream, accept_shared.clone(), client));
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    pub fn address(&self) -> BrokerAddress {
        BrokerAddress::new(self.addr.ip().to_string(), u32::from(self.addr.port()))
            .expect("valid test broker address")
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().unwrap().len()
    }

    /// CONNECT packets seen so far, refused ones included
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// PUBLISH packets received from clients
    pub fn publish_count(&self) -> usize {
        self.shared.publishes.load(Ordering::SeqCst)
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.shared
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|subscription| subscription.filter.to_string())
            .collect()
    }

    /// Closes every open client connection
    pub fn kick_clients(&self) {
        let mut kick = self.shared.kick.lock().unwrap();
        kick.cancel();
        *kick = CancellationToken::new();
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.shared.kick.lock().unwrap().cancel();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, client: u64) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut pending) = mpsc::unbounded_channel::<Vec<u8>>();
    let kick = shared.kick.lock().unwrap().clone();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = pending.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let packet = tokio::select! {
            _ = kick.cancelled() => break,
            packet = read_packet(&mut reader) => packet,
        };
        let Ok(Some((header, body))) = packet else {
            break;
        };

        match header >> 4 {
            CONNECT => {
                shared.connects.fetch_add(1, Ordering::SeqCst);
                let code = shared.behavior.connack_code;
                let _ = outbox.send(vec![0x20, 0x02, 0x00, code]);
                if code != 0 {
                    break;
                }
            }
            PUBLISH => {
                shared.publishes.fetch_add(1, Ordering::SeqCst);
                if shared.behavior.drop_on_publish {
                    break;
                }
                handle_publish(&shared, &outbox, header, &body)
            }
            PUBREC => {
                let _ = outbox.send(frame(0x62, body[..2].to_vec()));
            }
            PUBREL => {
                let _ = outbox.send(frame(0x70, body[..2].to_vec()));
            }
            PUBACK | PUBCOMP => {}
            SUBSCRIBE => handle_subscribe(&shared, &outbox, client, &body),
            UNSUBSCRIBE => {
                shared
                    .subscriptions
                    .lock()
                    .unwrap()
                    .retain(|subscription| subscription.client != client);
                let _ = outbox.send(frame(0xB0, body[..2].to_vec()));
            }
            PINGREQ => {
                let _ = outbox.send(vec![0xD0, 0x00]);
            }
            DISCONNECT => break,
            _ => break,
        }
    }

    shared
        .subscriptions
        .lock()
        .unwrap()
        .retain(|subscription| subscription.client != client);
    drop(outbox);
    let _ = tokio::time::timeout(Duration::from_millis(500), writer_task).await;
}

fn handle_publish(
    shared: &Shared,
    outbox: &mpsc::UnboundedSender<Vec<u8>>,
    header: u8,
    body: &[u8],
) {
    let qos = (header >> 1) & 0x03;
    let retain = header & 0x01 == 1;
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
    let mut offset = 2 + topic_len;
    let pkid = if qos > 0 {
        let pkid = [body[offset], body[offset + 1]];
        offset += 2;
        Some(pkid)
    } else {
        None
    };
    let payload = body[offset..].to_vec();

    if retain {
        let mut retained = shared.retained.lock().unwrap();
        if payload.is_empty() {
            retained.remove(&topic);
        } else {
            retained.insert(topic.clone(), (payload.clone(), qos));
        }
    }

    for subscription in shared.subscriptions.lock().unwrap().iter() {
        if subscription.filter.matches(&topic) {
            let delivered_qos = qos.min(subscription.qos);
            let _ = subscription.outbox.send(publish_frame(
                &topic,
                &payload,
                delivered_qos,
                false,
                shared.pkid(),
            ));
        }
    }

    match (qos, pkid) {
        (1, Some(pkid)) => {
            let _ = outbox.send(frame(0x40, pkid.to_vec()));
        }
        (2, Some(pkid)) => {
            let _ = outbox.send(frame(0x50, pkid.to_vec()));
        }
        _ => {}
    }
}

fn handle_subscribe(
    shared: &Shared,
    outbox: &mpsc::UnboundedSender<Vec<u8>>,
    client: u64,
    body: &[u8],
) {
    let mut response = body[..2].to_vec();
    let mut offset = 2;
    let mut accepted = Vec::new();

    while offset < body.len() {
        let len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
        let filter = String::from_utf8_lossy(&body[offset + 2..offset + 2 + len]).into_owned();
        let qos = body[offset + 2 + len] & 0x03;
        offset += 3 + len;

        match TopicFilter::parse(&filter) {
            Ok(filter) if !shared.behavior.reject_subscriptions => {
                response.push(qos);
                accepted.push((filter, qos));
            }
            _ => response.push(SUBACK_FAILURE),
        }
    }

    let _ = outbox.send(frame(0x90, response));

    let retained = shared.retained.lock().unwrap();
    let mut subscriptions = shared.subscriptions.lock().unwrap();
    for (filter, qos) in accepted {
        for (topic, (payload, retained_qos)) in retained.iter() {
            if filter.matches(topic) {
                let _ = outbox.send(publish_frame(
                    topic,
                    payload,
                    (*retained_qos).min(qos),
                    true,
                    shared.pkid(),
                ));
            }
        }
        subscriptions.push(Subscription {
            client,
            filter,
            qos,
            outbox: outbox.clone(),
        });
    }
}

async fn read_packet(reader: &mut OwnedReadHalf) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 1];
    if reader.read(&mut header).await? == 0 {
        return Ok(None);
    }

    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        remaining += (byte[0] & 0x7f) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }

    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;
    Ok(Some((header[0], body)))
}

fn publish_frame(topic: &str, payload: &[u8], qos: u8, retain: bool, pkid: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if qos > 0 {
        body.extend_from_slice(&pkid.to_be_bytes());
    }
    body.extend_from_slice(payload);
    frame(0x30 | (qos << 1) | u8::from(retain), body)
}

fn frame(header: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = vec![header];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if remaining == 0 {
            break;
        }
    }
    out.extend(body);
    out
}

/// Polls `condition` every 20ms until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A port on localhost with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("ephemeral address").port()
}
