//! Runs a single connection end to end against in-memory collaborators,
//! printing every packet the adapter writes back. No socket is opened: a
//! script of packets plays the part of a device, and pushing an upstream
//! message plays the part of the bridge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use mqtt_device_adapter::auth::StaticAuthProvider;
use mqtt_device_adapter::bridge::test_support::{FakeBridge, RecordingFeedback, RecordingSendingClient};
use mqtt_device_adapter::bridge::UpstreamMessage;
use mqtt_device_adapter::config::AdapterConfig;
use mqtt_device_adapter::protocol::{Connect, Publish, QoS, Subscribe, SubscribeFilter};
use mqtt_device_adapter::qos2::InMemoryQos2Store;
use mqtt_device_adapter::session::InMemorySessionStore;
use mqtt_device_adapter::transport::test_support::{ChannelTransport, TransportEvent};
use mqtt_device_adapter::{Connection, Packet};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let (transport, in_tx, mut out_rx) = ChannelTransport::new();

    let sending_client = RecordingSendingClient::new(16);
    let bridge = FakeBridge::new(sending_client);

    let mut users = HashMap::new();
    users.insert("demo-device".to_string(), "secret".to_string());
    let auth = Arc::new(StaticAuthProvider::new(users, false));

    let mut connection = Connection::new(
        transport,
        "127.0.0.1:1883".parse().unwrap(),
        auth,
        bridge.clone(),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryQos2Store::new()),
        None,
        AdapterConfig::default(),
        QoS::AtLeastOnce,
    );

    let run_handle = tokio::spawn(async move {
        connection.run().await;
    });

    let printer = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            println!("<- {packet:?}");
        }
    });

    in_tx
        .send(TransportEvent::Packet(Packet::Connect(Box::new(Connect {
            client_id: "demo-device".to_string(),
            clean_session: true,
            keep_alive: 30,
            username: Some("demo-device".to_string()),
            password: Some(Bytes::from_static(b"secret")),
            will: None,
        }))))
        .unwrap();

    in_tx
        .send(TransportEvent::Packet(Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: vec![SubscribeFilter {
                filter: "demo/+/telemetry".to_string(),
                qos: QoS::AtLeastOnce,
            }],
        })))
        .unwrap();

    in_tx
        .send(TransportEvent::Packet(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Arc::from("demo/1/cmd"),
            packet_id: None,
            payload: Bytes::from_static(b"toggle"),
        })))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    bridge.push(UpstreamMessage {
        topic: Arc::from("demo/1/telemetry"),
        payload: Bytes::from_static(b"21.5C"),
        qos: QoS::AtLeastOnce,
        sequence_number: 1,
        delivery_count: 0,
        created_at: Instant::now(),
        feedback: RecordingFeedback::new(),
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    in_tx.send(TransportEvent::Eof).unwrap();
    let _ = run_handle.await;
    let _ = printer.await;
    println!("connection finished");
}
