mod support;

use std::time::Duration;

use mqtt_topic_manager::mqtt::{
    parse_bulk, probe, publish, publish_bulk, BrokerAddress, ConnectError, ProbeSettings,
    PublishError, PublishRequest, PublisherSettings, SubscriberRuntime,
};
use rumqttc::QoS;
use support::{closed_port, eventually, BrokerBehavior, TestBroker};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishes_at_every_qos() {
    let broker = TestBroker::start().await;
    let settings = PublisherSettings::default();

    for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
        let request = PublishRequest::new("test/qos", "payload").with_qos(qos);
        publish(&broker.address(), &request, &settings)
            .await
            .unwrap_or_else(|e| panic!("publish at {:?} failed: {}", qos, e));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exactly_once_reaches_subscriber() {
    let broker = TestBroker::start().await;
    let runtime = SubscriberRuntime::default();
    runtime.start(&broker.address(), "orders/#").await.unwrap();
    assert!(eventually(WAIT, || broker.subscription_count() == 1).await);

    let request = PublishRequest::new("orders/42", "{\"id\": 42}").with_qos(QoS::ExactlyOnce);
    publish(&broker.address(), &request, &PublisherSettings::default())
        .await
        .unwrap();

    assert!(eventually(WAIT, || runtime.message_count() == 1).await);
    let message = &runtime.messages()[0];
    assert_eq!(message.qos(), 2);
    assert_eq!(message.payload(), "{\"id\": 42}");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retained_message_reaches_later_subscriber() {
    let broker = TestBroker::start().await;
    let request = PublishRequest::new("lights/kitchen", "on")
        .with_qos(QoS::AtLeastOnce)
        .with_retain(true);
    publish(&broker.address(), &request, &PublisherSettings::default())
        .await
        .unwrap();

    let runtime = SubscriberRuntime::default();
    runtime.start(&broker.address(), "lights/#").await.unwrap();

    assert!(eventually(WAIT, || runtime.message_count() == 1).await);
    let message = &runtime.messages()[0];
    assert_eq!(message.topic(), "lights/kitchen");
    assert_eq!(message.payload(), "on");
    assert!(message.retain());

    runtime.shutdown().await;
}

#[tokio::test]
async fn unreachable_broker_is_a_connect_error() {
    let broker = BrokerAddress::new("127.0.0.1", u32::from(closed_port())).unwrap();
    let request = PublishRequest::new("test/topic", "hello");

    let error = publish(&broker, &request, &PublisherSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(error, PublishError::Connect(ConnectError::Unreachable(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_publisher_keeps_return_code() {
    let broker = TestBroker::with_behavior(BrokerBehavior {
        connack_code: 5,
        ..BrokerBehavior::default()
    })
    .await;
    let request = PublishRequest::new("test/topic", "hello");

    let error = publish(&broker.address(), &request, &PublisherSettings::default())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        PublishError::Connect(ConnectError::Refused("NotAuthorized".to_string()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_is_not_retried_after_failure() {
    let broker = TestBroker::with_behavior(BrokerBehavior {
        drop_on_publish: true,
        ..BrokerBehavior::default()
    })
    .await;
    let request = PublishRequest::new("test/topic", "once").with_qos(QoS::AtLeastOnce);

    let error = publish(&broker.address(), &request, &PublisherSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(error, PublishError::Transport(_)), "got {:?}", error);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(broker.publish_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bulk_publish_skips_items_without_topic() {
    let broker = TestBroker::start().await;
    let runtime = SubscriberRuntime::default();
    runtime.start(&broker.address(), "bulk/#").await.unwrap();
    assert!(eventually(WAIT, || broker.subscription_count() == 1).await);

    let items = parse_bulk(
        r#"[
            {"topic": "bulk/a", "payload": "one", "qos": 1},
            {"topic": "", "payload": "nowhere"},
            {"topic": "bulk/b", "payload": {"value": 2}, "qos": 1}
        ]"#,
    )
    .unwrap();

    let report = publish_bulk(&broker.address(), &items, &PublisherSettings::default()).await;

    assert_eq!(report.to_string(), "2/3");
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failures().count(), 0);

    assert!(eventually(WAIT, || runtime.message_count() == 2).await);
    let messages = runtime.messages();
    assert_eq!(messages[0].topic(), "bulk/a");
    assert_eq!(messages[0].payload(), "one");
    assert_eq!(messages[1].topic(), "bulk/b");
    assert_eq!(messages[1].payload(), "{\"value\":2}");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn probe_reports_success() {
    let broker = TestBroker::start().await;

    let report = probe(&broker.address(), &ProbeSettings::default()).await;

    assert_eq!(report.into_pair(), (true, "Connected successfully!".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn probe_reports_refusal() {
    let broker = TestBroker::with_behavior(BrokerBehavior {
        connack_code: 5,
        ..BrokerBehavior::default()
    })
    .await;

    let (reachable, message) = probe(&broker.address(), &ProbeSettings::default())
        .await
        .into_pair();

    assert!(!reachable);
    assert!(message.starts_with("Connection failed: "));
    assert!(message.contains("NotAuthorized"));
}

#[tokio::test]
async fn probe_of_unknown_host_leaves_subscriber_alone() {
    let runtime = SubscriberRuntime::default();
    let before = runtime.status();
    let broker = BrokerAddress::new("invalid.host.example", 1883).unwrap();

    let (reachable, message) = probe(&broker, &ProbeSettings::default()).await.into_pair();

    assert!(!reachable);
    assert!(message.starts_with("Connection failed: "));
    assert_eq!(runtime.status(), before);
}
