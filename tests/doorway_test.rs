//! End-to-end crossing tests on simulated devices with a file-backed ledger

use doorway_tracker::domain::types::{ConnectionState, Direction, SensorLocation, Subsystem};
use doorway_tracker::domain::RecordFilter;
use doorway_tracker::infra::config::DeviceMode;
use doorway_tracker::infra::{Config, Metrics};
use doorway_tracker::services::Doorway;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn mock_config(dir: &TempDir) -> Config {
    Config::default()
        .with_device_mode(DeviceMode::Simulated)
        .with_sim_probabilities(0.0, 0.0)
        .with_poll_interval_ms(10)
        .with_data_file(dir.path().join("ledger").join("tag_tracking.json").display().to_string())
}

#[tokio::test]
async fn test_tag_without_presence_is_not_recorded() {
    let dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new());
    let doorway = Doorway::from_config(mock_config(&dir), metrics.clone());
    doorway.start().await;

    doorway.simulator().unwrap().trigger_tag(Some("LONELY"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(doorway.ledger().is_empty());
    let summary = metrics.snapshot();
    assert_eq!(summary.tag_reads_total, 1);
    assert_eq!(summary.tags_discarded_total, 1);

    doorway.shutdown().await;
}

#[tokio::test]
async fn test_in_crossing_is_recorded_and_persisted() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(&dir);
    let doorway = Doorway::from_config(config.clone(), Arc::new(Metrics::new()));
    doorway.start().await;

    let sim = doorway.simulator().unwrap().clone();
    sim.simulate_movement(Direction::In, Some("E200001234567890ABCD1234")).await;

    let status = doorway.ledger().status();
    assert_eq!(status.total_records, 1);
    assert_eq!(status.rfid_reader, ConnectionState::Connected);
    let last = status.last_tag_read.unwrap();
    assert_eq!(last.rfid_tag, "E200001234567890ABCD1234");
    assert_eq!(last.direction, Direction::In);

    doorway.shutdown().await;
    assert_eq!(doorway.connection_state(Subsystem::RfidReader), ConnectionState::Disconnected);

    // The mirror survives a restart
    let raw = std::fs::read_to_string(config.data_file()).unwrap();
    assert!(raw.contains("\"direction\": \"IN\""));

    let reloaded = Doorway::from_config(config, Arc::new(Metrics::new()));
    let records = reloaded.ledger().query(&RecordFilter::new());
    assert_eq!(records, vec![last]);
}

#[tokio::test]
async fn test_latest_side_decides_direction() {
    let dir = TempDir::new().unwrap();
    let doorway = Doorway::from_config(mock_config(&dir), Arc::new(Metrics::new()));
    doorway.start().await;
    let sim = doorway.simulator().unwrap().clone();

    // Person walks in from outside, then is seen inside before the read
    sim.trigger_sensor(SensorLocation::Outside);
    tokio::time::sleep(Duration::from_millis(60)).await;
    sim.trigger_sensor(SensorLocation::Inside);
    tokio::time::sleep(Duration::from_millis(60)).await;
    sim.trigger_tag(Some("TAG-OUT"));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let records = doorway.ledger().tag_records("TAG-OUT");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].direction, Direction::Out);

    doorway.shutdown().await;
}

#[tokio::test]
async fn test_statistics_after_movements() {
    let dir = TempDir::new().unwrap();
    let doorway = Doorway::from_config(mock_config(&dir), Arc::new(Metrics::new()));
    doorway.start().await;
    let sim = doorway.simulator().unwrap().clone();

    sim.simulate_movement(Direction::In, Some("A")).await;
    doorway.ledger().append_manual("B", "in").unwrap();
    doorway.ledger().append_manual("A", "OUT").unwrap();

    let stats = doorway.ledger().statistics();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.in_count, 2);
    assert_eq!(stats.out_count, 1);
    assert_eq!(stats.current_balance, 1);
    assert_eq!(stats.unique_tags, 2);
    assert_eq!(stats.top_tags[0].tag, "A");
    assert_eq!(stats.top_tags[0].count, 2);

    doorway.shutdown().await;
}

#[tokio::test]
async fn test_serial_devices_missing_leave_doorway_in_error() {
    let dir = TempDir::new().unwrap();
    let config = Config::default()
        .with_data_file(dir.path().join("tag_tracking.json").display().to_string());
    let config = {
        let path = dir.path().join("serial.toml");
        std::fs::write(
            &path,
            r#"
[devices]
mode = "serial"
rfid_port = "/dev/does-not-exist-rfid"
sensor_inside_port = "/dev/does-not-exist-in"
sensor_outside_port = "/dev/does-not-exist-out"
"#,
        )
        .unwrap();
        Config::from_file(&path).unwrap().with_data_file(config.data_file())
    };

    let doorway = Doorway::from_config(config, Arc::new(Metrics::new()));
    assert!(!doorway.is_mock());
    doorway.start().await;

    let status = doorway.ledger().status();
    assert_eq!(status.rfid_reader, ConnectionState::Error);
    assert_eq!(status.sensor_inside, ConnectionState::Error);
    assert_eq!(status.sensor_outside, ConnectionState::Error);

    // The ledger still accepts operator records
    doorway.ledger().append_manual("T1", "IN").unwrap();
    assert_eq!(doorway.ledger().len(), 1);

    tokio::time::timeout(Duration::from_secs(1), doorway.shutdown()).await.unwrap();
}
