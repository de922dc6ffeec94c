// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end exercise of the scan pipeline against the scripted backend:
// device discovery, open, option negotiation, a full scan with a
// deliberately tight buffer budget, and a jam/recovery cycle — all driven
// the way a UI would drive it, through `perform_step` and events.

use std::sync::Once;
use std::time::Duration;

use scanwerk_core::config::{BufferConfig, EngineConfig, ScanConfig};
use scanwerk_core::types::{
    FrameParameters, FrameType, HardwareStatus, OptionConstraint, OptionDescriptor, OptionValue,
};
use scanwerk_device::mock::MockBackend;
use scanwerk_device::{Scanner, ScannerEvent};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn rgb_params(lines: u32) -> FrameParameters {
    FrameParameters {
        frame_type: FrameType::Rgb,
        last_frame: true,
        bytes_per_line: 12,
        pixels_per_line: 4,
        lines: Some(lines),
        depth: 8,
    }
}

/// Step the bridge until `StopPolling`, collecting every event.
fn pump(scanner: &mut Scanner<MockBackend>) -> Vec<ScannerEvent> {
    let mut events = scanner.take_events();
    for _ in 0..10_000 {
        scanner.perform_step();
        let batch = scanner.take_events();
        let done = batch.contains(&ScannerEvent::StopPolling);
        events.extend(batch);
        if done {
            return events;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("polling never stopped; events so far: {events:?}");
}

#[test]
fn discover_configure_scan_and_render() {
    init_tracing();

    let backend = MockBackend::new();
    backend.set_options(
        vec![OptionDescriptor {
            index: 0,
            name: "mode".into(),
            title: "Scan mode".into(),
            description: "Colour mode of the acquisition".into(),
            constraint: OptionConstraint::StringList(vec!["Gray".into(), "Color".into()]),
            settable: true,
        }],
        vec![OptionValue::Text("Gray".into())],
    );
    // 16 lines of 4 RGB pixels, delivered in awkward 7-byte chunks so reads
    // straddle line boundaries.
    let payload: Vec<u8> = (0..16 * 12).map(|i| (i % 251) as u8).collect();
    backend.set_payload(rgb_params(16), payload.clone(), 7);

    // Budget of two lines forces producer back-off mid-scan.
    let config = EngineConfig {
        buffer: BufferConfig {
            max_total_bytes: 24,
        },
        scan: ScanConfig {
            min_read_lines: 1,
            max_read_bytes: 12,
            slot_retry_backoff_ms: 1,
        },
        default_device: None,
    };
    let mut scanner = Scanner::new(backend, config).expect("spawn scanner");

    scanner.refresh_devices().expect("refresh");
    let events = pump(&mut scanner);
    let devices = events
        .iter()
        .find_map(|e| match e {
            ScannerEvent::DevicesRefreshed(d) => Some(d.clone()),
            _ => None,
        })
        .expect("device list");
    assert_eq!(devices[0].name, "mock:0");

    scanner.open_device("mock:0").expect("open");
    let events = pump(&mut scanner);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScannerEvent::DeviceOpened { name } if name == "mock:0")));

    scanner
        .set_option_value("mode", OptionValue::Text("Color".into()))
        .expect("set mode");
    let events = pump(&mut scanner);
    assert!(events.iter().any(|e| matches!(
        e,
        ScannerEvent::OptionValuesChanged(v)
            if v == &[("mode".to_string(), OptionValue::Text("Color".into()))]
    )));

    scanner.start_scan().expect("start scan");
    let events = pump(&mut scanner);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScannerEvent::ImageUpdated)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ScannerEvent::ScanFinished { error: None })));

    let image = scanner.scan_image().expect("assembled raster");
    assert_eq!(image.lines_filled(), 16);
    let rendered = image.to_dynamic_image().expect("render").into_rgb8();
    assert_eq!(rendered.dimensions(), (4, 16));
    // Spot-check pixels against the scripted payload.
    assert_eq!(rendered.get_pixel(0, 0).0, [payload[0], payload[1], payload[2]]);
    let last = 15 * 12 + 3 * 3;
    assert_eq!(
        rendered.get_pixel(3, 15).0,
        [payload[last], payload[last + 1], payload[last + 2]]
    );
}

#[test]
fn jam_recovery_allows_a_second_scan() {
    init_tracing();

    let backend = MockBackend::new();
    let payload: Vec<u8> = (0..8 * 12).map(|i| i as u8).collect();
    backend.set_payload(rgb_params(8), payload.clone(), 12);
    backend.fail_next_read(HardwareStatus::Jammed, "paper jam");
    let script = backend.clone();

    let mut scanner = Scanner::new(backend, EngineConfig::default()).expect("spawn scanner");
    scanner.open_device("mock:0").expect("open");
    pump(&mut scanner);

    // First scan jams; the bridge recovers the device on its own.
    scanner.start_scan().expect("start scan");
    let events = pump(&mut scanner);
    assert!(events.iter().any(|e| matches!(
        e,
        ScannerEvent::ScanFinished { error: Some(text) } if text.contains("jam")
    )));
    assert!(events.iter().any(|e| matches!(e, ScannerEvent::DeviceClosed)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ScannerEvent::DeviceOpened { .. })));
    assert_eq!(script.open_count(), 2);

    // The recovered device scans cleanly.
    scanner.start_scan().expect("second scan");
    let events = pump(&mut scanner);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScannerEvent::ScanFinished { error: None })));
    assert_eq!(
        scanner.scan_image().expect("raster").lines_filled(),
        8
    );
}
