//! Device lifecycle and stream acquisition against the simulated LJM backend.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use rust_ljm::backend::ConfigValue;
use rust_ljm::constants::{LJME_DEVICE_NOT_FOUND, LJME_NO_SCANS_RETURNED};
use rust_ljm::manifest::ConfigManifest;
use rust_ljm::stream::{AnalogInputSettings, StreamIn, TriggerEdge, TriggerMode};
use rust_ljm::{
    ConnectionType, DeviceType, LabJackDevice, LjmError, MockLjm, StreamSettings, TriggerSettings,
};

fn open_usb(mock: &Arc<MockLjm>) -> LabJackDevice {
    LabJackDevice::open(mock.clone(), DeviceType::T7, ConnectionType::Usb, "ANY").unwrap()
}

#[test]
fn test_open_by_ip_over_ethernet() {
    let mock = Arc::new(MockLjm::new().with_ip_address(Ipv4Addr::new(10, 0, 0, 42)));
    let device =
        LabJackDevice::open(mock.clone(), DeviceType::Any, ConnectionType::Ethernet, "10.0.0.42")
            .unwrap();
    let info = device.info();
    assert_eq!(info.device_type, DeviceType::T7);
    assert_eq!(info.connection_type, ConnectionType::Ethernet);
    assert_eq!(info.ip_address, Ipv4Addr::new(10, 0, 0, 42));
    assert_eq!(mock.open_handle_count(), 1);
}

#[test]
fn test_open_unknown_serial_fails() {
    let mock = Arc::new(MockLjm::new().with_serial_number(470_012_345));
    let err = LabJackDevice::open(mock.clone(), DeviceType::T7, ConnectionType::Usb, "123")
        .unwrap_err();
    assert!(matches!(err, LjmError::Connection(_)));
    assert_eq!(err.ljm_code(), Some(LJME_DEVICE_NOT_FOUND));
    assert_eq!(mock.open_handle_count(), 0);

    let device =
        LabJackDevice::open(mock, DeviceType::T7, ConnectionType::Usb, "470012345").unwrap();
    assert_eq!(device.info().serial_number, 470_012_345);
}

#[test]
fn test_close_then_use() {
    let mock = Arc::new(MockLjm::new());
    let mut device = open_usb(&mock);
    device.close().unwrap();
    assert!(!device.is_open());
    assert_eq!(mock.open_handle_count(), 0);

    assert!(matches!(device.close(), Err(LjmError::NoConnection)));
    let err = device
        .stream_in(StreamSettings::new(["AIN0"]))
        .unwrap_err();
    assert!(matches!(err, LjmError::NoConnection));
}

#[test]
fn test_drop_closes_handle() {
    let mock = Arc::new(MockLjm::new());
    {
        let _device = open_usb(&mock);
        assert_eq!(mock.open_handle_count(), 1);
    }
    assert_eq!(mock.open_handle_count(), 0);
}

#[test]
fn test_apply_manifest_writes_resolved_overrides() {
    let mock = Arc::new(MockLjm::new());
    let device = open_usb(&mock);

    let mut manifest = ConfigManifest::builtin().unwrap();
    assert_eq!(device.apply_manifest(&manifest).unwrap(), 0);
    assert!(mock.library_writes().is_empty());

    manifest
        .set_from_str("LJM_DEBUG_LOG_FILE", "/var/log/ljm.log")
        .unwrap();
    manifest
        .set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_CONTINUOUS")
        .unwrap();
    manifest
        .set_from_str("LJM_ALLOWS_AUTO_CONDENSE_ADDRESSES", "false")
        .unwrap();

    assert_eq!(device.apply_manifest(&manifest).unwrap(), 3);
    let writes = mock.library_writes();
    // Numbers first, then strings
    assert_eq!(
        writes,
        vec![
            (
                "LJM_ALLOWS_AUTO_CONDENSE_ADDRESSES".to_string(),
                ConfigValue::Number(0.0)
            ),
            ("LJM_DEBUG_LOG_MODE".to_string(), ConfigValue::Number(2.0)),
            (
                "LJM_DEBUG_LOG_FILE".to_string(),
                ConfigValue::Text("/var/log/ljm.log".to_string())
            ),
        ]
    );
    assert_eq!(device.read_library_config("LJM_DEBUG_LOG_MODE").unwrap(), 2.0);
}

#[test]
fn test_library_rejection_is_reported() {
    let mock = Arc::new(MockLjm::new().with_failing_library_config("LJM_DEBUG_LOG_MODE"));
    let device = open_usb(&mock);
    let mut manifest = ConfigManifest::builtin().unwrap();
    manifest
        .set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_NEVER")
        .unwrap();
    let err = device.apply_manifest(&manifest).unwrap_err();
    assert!(matches!(err, LjmError::LibraryConfiguration(_)));
    assert!(err.is_library_error());
}

#[test]
fn test_stream_timestamps_use_total_sampling_rate() {
    let mock = Arc::new(MockLjm::new());
    let device = open_usb(&mock);
    let settings = StreamSettings::new(["AIN0", "AIN1", "AIN2", "AIN3"])
        .with_sampling_rate(1000.0)
        .with_duration(0.1);

    let recording = device.stream_in(settings).unwrap();
    assert_eq!(recording.plan.num_scans, 25);
    assert_eq!(recording.plan.num_reads, 1);
    assert_eq!(recording.scans, 25);
    assert!(!recording.is_triggered());

    let ain2 = recording.record("AIN2").unwrap();
    assert_eq!(ain2.len(), 25);
    assert!((ain2.times[0] - 0.002).abs() < 1e-12);
    assert!((ain2.times[1] - 0.006).abs() < 1e-12);
    assert!((ain2.values[3] - 2.003).abs() < 1e-12);
}

#[test]
fn test_custom_analog_front_end() {
    let mock = Arc::new(MockLjm::new());
    let device = open_usb(&mock);
    let settings = StreamSettings::new(["AIN0"])
        .with_sampling_rate(10.0)
        .with_duration(1.0)
        .with_analog_inputs(AnalogInputSettings {
            negative_channel: 1,
            range: 1.0,
        });
    let stream = StreamIn::new(&device, settings).unwrap();
    stream.configure().unwrap();

    let writes = mock.register_writes();
    assert_eq!(
        writes[..2],
        [
            ("AIN_ALL_NEGATIVE_CH".to_string(), ConfigValue::Number(1.0)),
            ("AIN_ALL_RANGE".to_string(), ConfigValue::Number(1.0)),
        ]
    );
}

#[test]
fn test_triggered_stream_configuration_order() {
    let mock = Arc::new(MockLjm::new().with_no_scans_reads(5));
    let device = open_usb(&mock);
    let trigger = TriggerSettings::new("DIO0")
        .with_mode(TriggerMode::ConditionalReset)
        .with_edge(TriggerEdge::Falling)
        .with_timeout(Duration::from_millis(2500));
    let settings = StreamSettings::new(["AIN0", "AIN1"])
        .with_sampling_rate(100.0)
        .with_duration(0.5)
        .with_trigger(trigger);

    let recording = device.stream_in(settings).unwrap();
    assert!(recording.is_triggered());
    assert_eq!(recording.empty_reads, 5);
    assert_eq!(recording.scans, 25);

    assert_eq!(
        mock.library_writes(),
        vec![
            ("LJM_STREAM_SCANS_RETURN".to_string(), ConfigValue::Number(1.0)),
            (
                "LJM_STREAM_RECEIVE_TIMEOUT_MS".to_string(),
                ConfigValue::Number(2500.0)
            ),
        ]
    );

    let trigger_writes: Vec<(String, ConfigValue)> = mock
        .register_writes()
        .into_iter()
        .skip(6)
        .collect();
    assert_eq!(
        trigger_writes,
        vec![
            ("DIO0_EF_ENABLE".to_string(), ConfigValue::Number(0.0)),
            ("STREAM_TRIGGER_INDEX".to_string(), ConfigValue::Number(2000.0)),
            ("DIO0_EF_INDEX".to_string(), ConfigValue::Number(12.0)),
            ("DIO0_EF_CONFIG_A".to_string(), ConfigValue::Number(0.0)),
            ("DIO0_EF_ENABLE".to_string(), ConfigValue::Number(1.0)),
        ]
    );
}

#[test]
fn test_frequency_in_falling_edge_index() {
    let mock = Arc::new(MockLjm::new());
    let device = open_usb(&mock);
    let trigger = TriggerSettings::new("FIO1")
        .with_mode(TriggerMode::FrequencyIn)
        .with_edge(TriggerEdge::Falling);
    let settings = StreamSettings::new(["AIN0"])
        .with_sampling_rate(100.0)
        .with_duration(0.1)
        .with_trigger(trigger);
    let stream = StreamIn::new(&device, settings).unwrap();
    stream.configure_trigger().unwrap();

    let writes = mock.register_writes();
    assert!(writes.contains(&("FIO1_EF_INDEX".to_string(), ConfigValue::Number(4.0))));
    assert!(!writes.iter().any(|(name, _)| name == "FIO1_EF_CONFIG_A"));
    // No timeout waits indefinitely
    assert!(mock.library_writes().contains(&(
        "LJM_STREAM_RECEIVE_TIMEOUT_MS".to_string(),
        ConfigValue::Number(0.0)
    )));
}

#[test]
fn test_invalid_channel_fails_before_start() {
    let mock = Arc::new(MockLjm::new());
    let device = open_usb(&mock);
    let err = device
        .stream_in(StreamSettings::new(["AIN0", "BOGUS"]).with_duration(0.1))
        .unwrap_err();
    assert!(matches!(err, LjmError::StreamRead(_)));
    assert!(mock.last_stream_start().is_none());
    assert_eq!(mock.stream_stop_count(), 0);
}

#[test]
fn test_mid_stream_failure_stops_and_reports_code() {
    let mock = Arc::new(MockLjm::new().with_read_failure(2, 1227));
    let device = open_usb(&mock);
    let settings = StreamSettings::new(["AIN0"])
        .with_sampling_rate(100.0)
        .with_duration(1.0)
        .with_scans_per_read(20);
    let err = device.stream_in(settings).unwrap_err();
    assert_eq!(err.ljm_code(), Some(1227));
    assert_eq!(mock.read_count(), 2);
    assert_eq!(mock.stream_stop_count(), 1);
    assert_ne!(err.ljm_code(), Some(LJME_NO_SCANS_RETURNED));
}
