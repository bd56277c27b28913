mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{Call, MockCentral, Script, advert};
use switchstack_provision::{CoordinatorError, DeviceRegistry};
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(5);

fn secs(s: f32) -> Duration {
    Duration::from_secs_f32(s)
}

#[tokio::test(start_paused = true)]
async fn test_scan_keeps_prefixed_devices_only() {
    let central = MockCentral::new(Script {
        adverts: vec![
            (secs(0.5), advert("AA:01", "SH-IN-kitchen-01", -60)),
            (secs(1.0), advert("BB:02", "OtherDevice", -40)),
            (secs(2.0), advert("AA:01", "SH-IN-kitchen-01", -52)),
        ],
        ..Script::default()
    });
    let registry = DeviceRegistry::new(central.clone(), "SH-IN-");
    let started = Instant::now();

    let devices = registry.begin_scan(WINDOW).await.unwrap();

    assert!(started.elapsed() >= WINDOW);
    assert!(started.elapsed() < WINDOW + secs(1.0));
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "AA:01");
    assert_eq!(devices[0].name, "SH-IN-kitchen-01");
    assert_eq!(devices[0].rssi, Some(-52));
    assert_eq!(central.calls(), vec![Call::StartScan, Call::StopScan]);
}

#[tokio::test(start_paused = true)]
async fn test_identities_are_unique_under_repeated_adverts() {
    let mut adverts = Vec::new();
    for round in 0..20u32 {
        for id in ["A", "B", "C"] {
            adverts.push((
                secs(0.2 * round as f32),
                advert(id, &format!("SH-IN-{id}"), -50 - round as i16),
            ));
        }
    }
    let central = MockCentral::new(Script {
        adverts,
        ..Script::default()
    });
    let registry = DeviceRegistry::new(central, "SH-IN-");

    let devices = registry.begin_scan(WINDOW).await.unwrap();

    let ids: HashSet<_> = devices.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids.len(), devices.len());
    assert_eq!(devices.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_adverts_after_window_are_not_recorded() {
    let central = MockCentral::new(Script {
        adverts: vec![
            (secs(1.0), advert("AA:01", "SH-IN-kitchen-01", -60)),
            (secs(6.0), advert("AA:02", "SH-IN-hall-02", -60)),
        ],
        ..Script::default()
    });
    let registry = DeviceRegistry::new(central, "SH-IN-");

    let devices = registry.begin_scan(WINDOW).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "AA:01");
}

#[tokio::test(start_paused = true)]
async fn test_empty_scan_is_a_result() {
    let central = MockCentral::new(Script::default());
    let registry = DeviceRegistry::new(central.clone(), "SH-IN-");

    let devices = registry.begin_scan(WINDOW).await.unwrap();

    assert!(devices.is_empty());
    assert_eq!(central.count(|c| *c == Call::StartScan), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_scan_returns_early() {
    let central = MockCentral::new(Script {
        adverts: vec![
            (secs(0.5), advert("AA:01", "SH-IN-kitchen-01", -60)),
            (secs(3.0), advert("AA:02", "SH-IN-hall-02", -60)),
        ],
        ..Script::default()
    });
    let registry = Arc::new(DeviceRegistry::new(central.clone(), "SH-IN-"));
    let started = Instant::now();

    let scanning = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.begin_scan(WINDOW).await })
    };
    tokio::time::sleep(secs(1.0)).await;
    assert!(registry.is_scanning().await);
    registry.cancel_scan().await;

    let devices = scanning.await.unwrap().unwrap();
    assert!(started.elapsed() < WINDOW);
    assert_eq!(devices.len(), 1);
    assert!(!registry.is_scanning().await);
    assert_eq!(central.count(|c| *c == Call::StopScan), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_scan_when_idle_is_harmless() {
    let central = MockCentral::new(Script::default());
    let registry = DeviceRegistry::new(central.clone(), "SH-IN-");

    registry.cancel_scan().await;

    assert!(!registry.is_scanning().await);
    assert!(central.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_scan_is_rejected_while_running() {
    let central = MockCentral::new(Script::default());
    let registry = Arc::new(DeviceRegistry::new(central, "SH-IN-"));

    let first = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.begin_scan(WINDOW).await })
    };
    tokio::time::sleep(secs(1.0)).await;

    assert!(matches!(
        registry.begin_scan(WINDOW).await,
        Err(CoordinatorError::ScanInProgress)
    ));
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_new_scan_discards_previous_devices() {
    let central = MockCentral::new(Script {
        adverts: vec![(secs(1.0), advert("AA:01", "SH-IN-kitchen-01", -60))],
        ..Script::default()
    });
    let registry = DeviceRegistry::new(central, "SH-IN-");

    assert_eq!(registry.begin_scan(WINDOW).await.unwrap().len(), 1);
    assert!(registry.get("AA:01").await.is_some());

    // Scanning again replays the same advert; still exactly one record
    assert_eq!(registry.begin_scan(WINDOW).await.unwrap().len(), 1);
    assert_eq!(registry.devices().await.len(), 1);
}
