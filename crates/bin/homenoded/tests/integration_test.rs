//! End-to-end smoke tests for the full homenoded stack.
//!
//! Each test spins up the complete application (virtual drivers, real
//! timer, real node, real TCP transport on an ephemeral port) and
//! exercises the wire protocol with the real client.

use std::sync::Arc;
use std::time::Duration;

use homenode_adapter_api_tcp::{TcpApiClient, serve};
use homenode_adapter_virtual::{OutputHandle, VirtualDriverFactory};
use homenode_app::node::{Node, NodeContext};
use homenode_app::ports::{ApiClient, DeviceCommand};
use homenode_app::timer::SoftwareTimer;
use homenode_domain::config::NodeConfig;

struct Harness {
    address: String,
    relay: OutputHandle,
    strip: OutputHandle,
}

/// Build a fully-wired node and serve it on an ephemeral port.
async fn harness() -> Harness {
    let config = NodeConfig::parse(&serde_json::json!({
        "metadata": { "id": "smoke-test", "schedule_keywords": {} },
        "device1": {
            "_type": "relay",
            "nickname": "Heater",
            "default_rule": "enabled",
            "schedule": {},
        },
        "device2": {
            "_type": "led-strip",
            "nickname": "Desk backlight",
            "min_rule": 0,
            "max_rule": 1023,
            "default_rule": 512,
            "schedule": {},
        },
        "sensor1": {
            "_type": "pir",
            "nickname": "Hallway motion",
            "default_rule": 5,
            "schedule": {},
            "targets": ["device1", "device2"],
        },
    }))
    .expect("smoke-test config should parse");

    let factory = VirtualDriverFactory::new();
    let timer = Arc::new(SoftwareTimer::new());
    let context = NodeContext {
        timer: Arc::clone(&timer),
        api: Arc::new(TcpApiClient::new(homenode_adapter_api_tcp::DEFAULT_PORT)),
    };
    let node = Node::build(config, &factory, context, None).expect("node should assemble");
    tokio::spawn(async move { timer.run().await });
    node.start().await;

    let relay = factory.output("device1".parse().unwrap()).unwrap();
    let strip = factory.output("device2".parse().unwrap()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = serve(listener, node).await;
    });

    Harness {
        address,
        relay,
        strip,
    }
}

fn client() -> TcpApiClient {
    TcpApiClient::new(0).with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn should_report_status_over_the_wire() {
    let harness = harness().await;
    let status = client()
        .call(&harness.address, vec![serde_json::json!("status")])
        .await
        .unwrap();

    assert_eq!(status["metadata"]["id"], "smoke-test");
    assert_eq!(status["devices"]["device1"]["type"], "relay");
    assert_eq!(status["devices"]["device2"]["nickname"], "Desk backlight");
    assert_eq!(status["sensors"]["sensor1"]["condition_met"], false);
    assert_eq!(
        status["sensors"]["sensor1"]["targets"],
        serde_json::json!(["device1", "device2"])
    );
}

#[tokio::test]
async fn should_turn_on_targets_when_a_sensor_is_triggered() {
    let harness = harness().await;
    let client = client();

    let response = client
        .call(
            &harness.address,
            vec![
                serde_json::json!("trigger_sensor"),
                serde_json::json!("sensor1"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(response, "Triggered");

    let status = client
        .call(&harness.address, vec![serde_json::json!("status")])
        .await
        .unwrap();
    assert_eq!(status["sensors"]["sensor1"]["condition_met"], true);
    assert_eq!(status["devices"]["device1"]["turned_on"], true);
    assert_eq!(status["devices"]["device2"]["turned_on"], true);

    // Startup settles the group to off (no motion yet), then the trigger
    // turns it on. The relay sees bare commands; the dimmable strip gets
    // its level.
    assert_eq!(
        harness.relay.commands(),
        vec![DeviceCommand::Off, DeviceCommand::On { level: None }]
    );
    assert_eq!(
        harness.strip.commands(),
        vec![DeviceCommand::Off, DeviceCommand::On { level: Some(512.0) }]
    );
}

#[tokio::test]
async fn should_apply_api_rules_over_the_wire() {
    let harness = harness().await;
    let client = client();

    client
        .call(
            &harness.address,
            vec![
                serde_json::json!("set_rule"),
                serde_json::json!("device2"),
                serde_json::json!(900),
            ],
        )
        .await
        .unwrap();

    let status = client
        .call(&harness.address, vec![serde_json::json!("status")])
        .await
        .unwrap();
    assert_eq!(status["devices"]["device2"]["current_rule"], 900.0);

    // Out-of-range rules come back in the error envelope.
    let err = client
        .call(
            &harness.address,
            vec![
                serde_json::json!("set_rule"),
                serde_json::json!("device2"),
                serde_json::json!(4096),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        homenode_domain::error::ApiError::Remote(_)
    ));
}

#[tokio::test]
async fn should_refuse_turning_on_a_disabled_device() {
    let harness = harness().await;
    let client = client();

    client
        .call(
            &harness.address,
            vec![serde_json::json!("disable"), serde_json::json!("device1")],
        )
        .await
        .unwrap();
    let err = client
        .call(
            &harness.address,
            vec![serde_json::json!("turn_on"), serde_json::json!("device1")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, homenode_domain::error::ApiError::Remote(ref m)
        if m.contains("disabled")));
}
