//! E2E tests for the reading path: sensor sample → JSON payload → topic.

mod helpers;

use std::fs;
use std::path::Path;
use std::time::Duration;

use rumqttc::QoS;
use serde_json::json;

use es_agent::publisher::{PublishOutcome, Publisher};
use es_agent::sampling::SamplingLoop;
use es_mqtt_channel::codes;
use es_protocol::{Reading, SensorSample};
use es_sensor::{IioConfig, IioSensor};
use helpers::{TOPIC_BASE, TestHarness};

/// One cycle publishes the three readings with rounded values and units.
#[tokio::test(start_paused = true)]
async fn e2e_cycle_publishes_rounded_readings() {
    let h = TestHarness::new();
    h.manager.connect().await;

    h.sampling().cycle().await;

    assert_eq!(
        h.payloads(),
        vec![
            (
                "sensors/bme680/temperature".to_string(),
                json!({"path": "temperature", "value": 21.46, "unit": "C"}),
            ),
            (
                "sensors/bme680/pressure".to_string(),
                json!({"path": "pressure", "value": 1013.25, "unit": "hPa"}),
            ),
            (
                "sensors/bme680/humidity".to_string(),
                json!({"path": "humidity", "value": 40.0, "unit": "%"}),
            ),
        ]
    );
    assert!(
        h.broker()
            .published()
            .iter()
            .all(|m| m.qos == QoS::AtMostOnce)
    );
}

/// The publisher never reaches the transport while disconnected.
#[tokio::test(start_paused = true)]
async fn e2e_no_publish_while_disconnected() {
    let h = TestHarness::new();
    h.manager.connect().await;
    h.broker().drop_connection(codes::UNSPECIFIED);

    let publisher = Publisher::new(&h.manager, TOPIC_BASE);
    for reading in helpers::indoor_sample().readings() {
        assert_eq!(publisher.publish(&reading).await, PublishOutcome::Skipped);
    }

    assert_eq!(h.publish_count(), 0);
}

/// A configured topic base prefixes every reading topic.
#[tokio::test(start_paused = true)]
async fn e2e_custom_topic_base() {
    let h = TestHarness::new();
    h.manager.connect().await;

    let publisher = Publisher::new(&h.manager, "greenhouse/north");
    publisher
        .publish(&Reading::new("humidity", 55.125, "%"))
        .await;

    let msg = h.broker().last_published().unwrap();
    assert_eq!(msg.topic, "greenhouse/north/humidity");
    let payload: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(payload["value"], 55.12);
}

/// Missed sensor reads skip the cycle without touching the broker.
#[tokio::test(start_paused = true)]
async fn e2e_missed_reads_skip_cycles() {
    let h = TestHarness::new();
    h.manager.connect().await;
    h.sensor.push(None);
    h.sensor.push(None);

    let mut sampling = h.sampling();
    let _ = tokio::time::timeout(Duration::from_secs(25), sampling.run()).await;

    // Cycles at 0 and 10 s miss; the one at 20 s publishes.
    assert_eq!(h.sensor.polls(), 3);
    assert_eq!(h.publish_count(), 3);
}

/// Publish errors are dropped; the next cycle publishes normally.
#[tokio::test(start_paused = true)]
async fn e2e_publish_failure_is_not_fatal() {
    let h = TestHarness::new();
    h.manager.connect().await;
    let mut sampling = h.sampling();

    h.broker().fail_publishes(true);
    let report = sampling.cycle().await;
    assert_eq!(report.failed, 3);
    assert_eq!(h.publish_count(), 0);
    assert!(h.manager.is_connected());

    h.broker().fail_publishes(false);
    let report = sampling.cycle().await;
    assert_eq!(report.sent, 3);
    assert_eq!(h.publish_count(), 3);
}

fn write_bme680(dir: &Path, temp: &str, pressure: &str, humidity: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("name"), "bme680\n").unwrap();
    fs::write(dir.join("in_temp_input"), format!("{temp}\n")).unwrap();
    fs::write(dir.join("in_pressure_input"), format!("{pressure}\n")).unwrap();
    fs::write(dir.join("in_humidityrelative_input"), format!("{humidity}\n")).unwrap();
}

/// Sysfs IIO values flow through scaling, rounding and publishing.
#[tokio::test]
async fn e2e_iio_sensor_to_broker() {
    let root = tempfile::tempdir().unwrap();
    write_bme680(&root.path().join("iio:device0"), "23456", "101.3254", "41.237");

    let h = TestHarness::new();
    let sensor = IioSensor::new(IioConfig {
        devices_root: root.path().display().to_string(),
        ..IioConfig::default()
    });
    let mut sampling = SamplingLoop::new(&h.manager, &sensor, TOPIC_BASE, Duration::from_secs(10));

    let report = sampling.cycle().await;
    assert!(report.reconnected);
    assert_eq!(report.sent, 3);

    let values: Vec<serde_json::Value> = h
        .payloads()
        .into_iter()
        .map(|(_, payload)| payload["value"].clone())
        .collect();
    assert_eq!(values, vec![json!(23.46), json!(1013.25), json!(41.24)]);
}

/// An unplugged sensor only costs cycles; nothing is published.
#[tokio::test]
async fn e2e_absent_iio_sensor_publishes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let h = TestHarness::new();
    let sensor = IioSensor::new(IioConfig {
        devices_root: root.path().display().to_string(),
        ..IioConfig::default()
    });
    let mut sampling = SamplingLoop::new(&h.manager, &sensor, TOPIC_BASE, Duration::from_secs(10));

    let report = sampling.cycle().await;

    assert!(!report.sampled);
    assert!(h.manager.is_connected());
    assert_eq!(h.publish_count(), 0);
}

/// A sample expands to temperature, pressure, humidity in that order.
#[test]
fn e2e_sample_expands_in_order() {
    let sample = SensorSample {
        temperature: 1.0,
        pressure: 2.0,
        humidity: 3.0,
    };
    let paths: Vec<String> = sample.readings().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["temperature", "pressure", "humidity"]);
}
