//! End-to-end runs of the bridge over a scripted serial port and a mock broker

use std::io;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use fillsense_bridge::config::QosLevel;
use fillsense_bridge::{BridgeError, InvalidReadingPolicy, ReadingError, StopReason};
use fillsense_devkit::{ScriptedSerial, SensorLineBuilder, TestHarness};
use rumqttc::QoS;
use serde_json::json;

#[tokio::test]
async fn test_documented_scenarios() {
    let harness = TestHarness::new();
    let summary = harness
        .run_lines(&[
            "{'fullness': 20, 'id': 'tank1'}",
            "{'fullness': 900, 'id': 'tank1'}",
            "{'fullness': 460, 'id': 'tank1'}",
            "{'fullness': 350}",
        ])
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::SourceClosed);
    assert_eq!(summary.stats.published, 4);
    assert_eq!(
        harness.raw_payloads(),
        vec![
            r#"{"fullness": 100.0, "id": "tank1"}"#,
            r#"{"fullness": 0.0, "id": "tank1"}"#,
            r#"{"fullness": 50.0, "id": "tank1"}"#,
            r#"{"fullness": 62.5}"#,
        ]
    );
}

#[tokio::test]
async fn test_publishes_at_least_once_on_telemetry_topic() {
    let harness = TestHarness::new();
    harness.run_lines(&["{'fullness': 460}"]).await.unwrap();

    let messages = harness.mqtt_client.get_published_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "v1/devices/me/telemetry");
    assert_eq!(messages[0].qos, QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_topic_and_qos_follow_config() {
    let harness = TestHarness::new()
        .with_topic("plant/bin-3/telemetry")
        .with_qos(QosLevel::ExactlyOnce);
    harness.run_lines(&["{'fullness': 460}"]).await.unwrap();

    let messages = harness.mqtt_client.find_messages_by_topic("plant/bin-3/telemetry");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].qos, QoS::ExactlyOnce);
    assert_eq!(
        harness.mqtt_client.get_json_payloads().unwrap(),
        vec![json!({"fullness": 50.0})]
    );
}

#[tokio::test]
async fn test_other_fields_pass_through() {
    let harness = TestHarness::new();
    let line = SensorLineBuilder::new()
        .field("id", "tank1")
        .field("battery", 3.7)
        .field("lid_open", false)
        .field("fullness", 460)
        .field("seq", 12)
        .build();
    harness.run_lines(&[line.as_str()]).await.unwrap();

    assert_eq!(
        harness.raw_payloads(),
        vec![r#"{"id": "tank1", "battery": 3.7, "lid_open": false, "fullness": 50.0, "seq": 12}"#]
    );
}

#[tokio::test]
async fn test_bad_lines_do_not_stop_the_loop() {
    let harness = TestHarness::new();
    let serial = ScriptedSerial::new()
        .line("")
        .line("not json at all")
        .line("{'fullness': ")
        .line("[1, 2]")
        .raw(vec![b'{', 0xfe, b'}', b'\n'])
        .line("{'fullness': 460, 'id': 'tank1'}");

    let summary = harness.run(serial).await.unwrap();

    assert_eq!(summary.stats.discarded, 5);
    assert_eq!(summary.stats.published, 1);
    assert_eq!(harness.payloads().unwrap(), vec![json!({"fullness": 50.0, "id": "tank1"})]);
}

#[tokio::test]
async fn test_runaway_line_without_newline_is_discarded() {
    let harness = TestHarness::new();
    let serial = ScriptedSerial::new()
        .raw("{'fullness': 460, 'junk': '".repeat(400))
        .timeout()
        .line("'}")
        .line("{'fullness': 20}");

    let summary = harness.run(serial).await.unwrap();

    assert_eq!(summary.stats.discarded, 1);
    assert_eq!(harness.payloads().unwrap(), vec![json!({"fullness": 100.0})]);
}

#[tokio::test]
async fn test_order_is_preserved() {
    let harness = TestHarness::new();
    let lines: Vec<String> = (0..20)
        .map(|seq| SensorLineBuilder::reading(20 + seq * 30).field("seq", seq).build())
        .collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    harness.run_lines(&lines).await.unwrap();

    let seqs: Vec<i64> = harness
        .payloads()
        .unwrap()
        .iter()
        .map(|p| p["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, (0..20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_published_fullness_stays_in_range() {
    let harness = TestHarness::new();
    let lines: Vec<String> = (-100..=1200)
        .step_by(25)
        .map(|raw| SensorLineBuilder::reading(raw).build())
        .collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    harness.run_lines(&lines).await.unwrap();

    let payloads = harness.payloads().unwrap();
    assert_eq!(payloads.len(), lines.len());
    for payload in payloads {
        let percent = payload["fullness"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&percent), "{payload}");
    }
}

#[tokio::test]
async fn test_missing_fullness_aborts_by_default() {
    let harness = TestHarness::new();
    let result = harness
        .run_lines(&[
            "{'fullness': 20}",
            "{'id': 'tank1'}",
            "{'fullness': 460}",
        ])
        .await;

    assert!(matches!(
        result,
        Err(BridgeError::InvalidReading(ReadingError::MissingFullness))
    ));
    assert_eq!(harness.payloads().unwrap(), vec![json!({"fullness": 100.0})]);
    assert!(harness.mqtt_client.is_closed(), "session released on fatal error");
}

#[tokio::test]
async fn test_non_numeric_fullness_aborts_by_default() {
    let harness = TestHarness::new();
    let result = harness.run_lines(&["{'fullness': 'high'}"]).await;

    assert!(matches!(
        result,
        Err(BridgeError::InvalidReading(ReadingError::NotNumeric(_)))
    ));
    assert_eq!(harness.mqtt_client.message_count(), 0);
}

#[tokio::test]
async fn test_skip_policy_keeps_going() {
    let harness = TestHarness::new().with_policy(InvalidReadingPolicy::Skip);
    let summary = harness
        .run_lines(&[
            "{'fullness': 20}",
            "{'id': 'tank1'}",
            "{'fullness': true}",
            "{'fullness': 460}",
        ])
        .await
        .unwrap();

    assert_eq!(summary.stats.published, 2);
    assert_eq!(summary.stats.rejected, 2);
    assert_eq!(
        harness.payloads().unwrap(),
        vec![json!({"fullness": 100.0}), json!({"fullness": 50.0})]
    );
}

#[tokio::test]
async fn test_line_split_across_reads_and_timeouts() {
    let harness = TestHarness::new().with_idle_reports();
    let serial = ScriptedSerial::new()
        .timeout()
        .raw("{'fullness': 4")
        .timeout()
        .timeout()
        .raw("60, 'id': 'tank1'}\r\n");

    let summary = harness.run(serial).await.unwrap();

    assert_eq!(summary.stop, StopReason::SourceClosed);
    assert_eq!(harness.payloads().unwrap(), vec![json!({"fullness": 50.0, "id": "tank1"})]);
}

#[tokio::test]
async fn test_serial_error_is_fatal() {
    let harness = TestHarness::new();
    let serial = ScriptedSerial::new()
        .line("{'fullness': 20}")
        .fail(io::ErrorKind::BrokenPipe)
        .line("{'fullness': 460}");

    let result = harness.run(serial).await;

    assert!(matches!(result, Err(BridgeError::SerialRead(_))));
    assert_eq!(harness.mqtt_client.message_count(), 1);
    assert!(harness.mqtt_client.is_closed());
}

#[tokio::test]
async fn test_publish_failure_is_fatal() {
    let harness = TestHarness::new();
    harness.mqtt_client.fail_after(1);

    let result = harness
        .run_lines(&["{'fullness': 20}", "{'fullness': 460}", "{'fullness': 350}"])
        .await;

    assert!(matches!(result, Err(BridgeError::MqttClient(_))));
    assert_eq!(harness.mqtt_client.message_count(), 1);
    assert!(harness.mqtt_client.is_closed());
}

#[tokio::test]
async fn test_shutdown_releases_both_connections() {
    let harness = TestHarness::new();
    let serial = ScriptedSerial::new()
        .line("{'fullness': 20}")
        .line("{'fullness': 460}")
        .hold_open();
    let released = serial.release_flag();

    let shutdown = async {
        harness.wait_for_messages(2, 2_000).await.ok();
    };
    let summary = harness.run_until(serial, shutdown).await.unwrap();

    assert_eq!(summary.stop, StopReason::Interrupted);
    assert_eq!(summary.stats.published, 2);
    assert!(harness.mqtt_client.is_closed());

    let start = Instant::now();
    while !released.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released.load(Ordering::SeqCst), "serial port released after shutdown");
}

#[tokio::test]
async fn test_shutdown_before_any_line() {
    let harness = TestHarness::new();
    let summary = harness
        .run_until(ScriptedSerial::new().hold_open(), async {})
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::Interrupted);
    assert_eq!(summary.stats.published, 0);
    assert!(harness.mqtt_client.is_closed());
}
