//! Integration tests for the fleet engine.

use fleetcast::{
    AnomalyField, DiffEvent, FileRepository, Fleet, FleetConfig, Sequence, VehicleId,
    VehicleRepository, VehicleStatus, VehicleUpdate,
};
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn recv(sub: &fleetcast::Subscription) -> DiffEvent {
    sub.handle.recv_timeout(Duration::from_millis(200)).unwrap()
}

// --- Realistic Workflow Tests ---

#[test]
fn test_route_day_workflow() {
    init_tracing();
    let fleet = Fleet::default();

    // Depot registers the bus before it goes out
    fleet
        .ingest(
            &VehicleUpdate::new("bus-101")
                .with_route("38")
                .with_endpoints("Ocean Beach", "Transbay")
                .with_capacity(60),
        )
        .unwrap();

    // A viewer opens the map
    let sub = fleet.subscribe();
    let bus = sub.snapshot.get(&VehicleId::from("bus-101")).unwrap();
    assert_eq!(bus.current_stop, None);
    assert_eq!(bus.capacity, Some(60));

    // Bus reports along the route
    let stops = ["Park Presidio", "Masonic", "Van Ness"];
    for (i, stop) in stops.iter().enumerate() {
        fleet
            .ingest(
                &VehicleUpdate::new("bus-101")
                    .with_stops(*stop, "next")
                    .with_passengers(10 * (i as i64 + 1))
                    .with_eta(format!("{} min", 12 - i)),
            )
            .unwrap();
    }
    fleet
        .ingest(&VehicleUpdate::new("bus-101").with_status("Delayed"))
        .unwrap();

    // Viewer replays the stream onto its snapshot
    let mut view = sub.snapshot.clone();
    for _ in 0..4 {
        view.apply(&recv(&sub)).unwrap();
    }

    let bus = view.get(&VehicleId::from("bus-101")).unwrap();
    assert_eq!(bus.current_stop.as_deref(), Some("Van Ness"));
    assert_eq!(bus.current_passengers, 30);
    assert_eq!(bus.eta.as_deref(), Some("10 min"));
    assert_eq!(bus.status, VehicleStatus::Delayed);
    assert_eq!(bus.route_number, "38");
    assert_eq!(view, {
        let mut current = fleet.snapshot();
        current.taken_at = view.taken_at;
        current
    });
}

#[test]
fn test_sequence_counts_every_apply() {
    let fleet = Fleet::default();

    for i in 0..30 {
        let id = format!("bus-{}", i % 4);
        fleet.ingest(&VehicleUpdate::new(id)).unwrap();
    }

    assert_eq!(fleet.store().sequence(), Sequence(30));
    assert_eq!(fleet.store().len(), 4);
}

#[test]
fn test_identical_updates_emit_twice() {
    let fleet = Fleet::default();
    let sub = fleet.subscribe();
    let update = VehicleUpdate::new("bus-5")
        .with_route("14")
        .with_status("OnTime")
        .with_passengers(12)
        .with_capacity(40);

    fleet.ingest(&update).unwrap();
    let after_one = fleet.get(&VehicleId::from("bus-5")).unwrap();

    fleet.ingest(&update).unwrap();
    let after_two = fleet.get(&VehicleId::from("bus-5")).unwrap();

    assert_eq!(recv(&sub).sequence(), Sequence(1));
    assert_eq!(recv(&sub).sequence(), Sequence(2));
    assert!(after_one.same_state(&after_two));
    assert_eq!(fleet.snapshot().len(), 1);
}

#[test]
fn test_clamping_over_capacity() {
    let fleet = Fleet::default();
    let sub = fleet.subscribe();

    let report = fleet
        .ingest_report(&VehicleUpdate::new("bus-1").with_capacity(40).with_passengers(45))
        .unwrap();

    assert!(report.is_anomalous());
    assert_eq!(report.anomalies[0].field, AnomalyField::CurrentPassengers);
    assert_eq!(report.anomalies[0].stored, 40);
    assert_eq!(fleet.get(&VehicleId::from("bus-1")).unwrap().current_passengers, 40);
    assert_eq!(fleet.stats().anomalies_clamped, 1);

    // Still applied and still published
    match recv(&sub) {
        DiffEvent::Upsert { vehicle, .. } => assert_eq!(vehicle.current_passengers, 40),
        other => panic!("Expected Upsert, got {:?}", other),
    }
}

#[test]
fn test_json_feed_ingestion() {
    let fleet = Fleet::default();

    let report = fleet
        .ingest_json(
            br#"{
                "identifier": "bus-22",
                "routeNumber": "5R",
                "from": "Fulton",
                "to": "Downtown",
                "currentStop": "Arguello",
                "nextStop": "Stanyan",
                "status": "On Time",
                "eta": "3 min",
                "currentPassengers": 18,
                "capacity": 80,
                "heading": 270
            }"#,
        )
        .unwrap();

    match report.event {
        DiffEvent::Upsert { vehicle, sequence } => {
            assert_eq!(sequence, Sequence(1));
            assert_eq!(vehicle.route_number, "5R");
            assert_eq!(vehicle.next_stop, "Stanyan");
            assert_eq!(vehicle.status, VehicleStatus::OnTime);
        }
        other => panic!("Expected Upsert, got {:?}", other),
    }
}

#[test]
fn test_removal_keeps_subscribers_consistent() {
    let fleet = Fleet::default();
    for id in ["a", "b", "c"] {
        fleet.ingest(&VehicleUpdate::new(id)).unwrap();
    }

    let sub = fleet.subscribe();
    fleet.remove(&VehicleId::from("b")).unwrap();
    fleet.ingest(&VehicleUpdate::new("d")).unwrap();

    let mut view = sub.snapshot.clone();
    view.apply(&recv(&sub)).unwrap();
    view.apply(&recv(&sub)).unwrap();

    let ids: Vec<&str> = view.vehicles.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c", "d"]);
    assert_eq!(view.sequence, fleet.store().sequence());
}

#[test]
fn test_late_joiner_gets_continuation() {
    let fleet = Fleet::default();
    let early = fleet.subscribe();

    for i in 0..5 {
        fleet.ingest(&VehicleUpdate::new(format!("bus-{}", i))).unwrap();
    }
    let late = fleet.subscribe();
    assert_eq!(late.snapshot.sequence, Sequence(5));

    for i in 5..8 {
        fleet.ingest(&VehicleUpdate::new(format!("bus-{}", i))).unwrap();
    }

    let early_seqs: Vec<u64> = early.handle.drain().iter().map(|e| e.sequence().0).collect();
    let late_seqs: Vec<u64> = late.handle.drain().iter().map(|e| e.sequence().0).collect();
    assert_eq!(early_seqs, (1..=8).collect::<Vec<_>>());
    assert_eq!(late_seqs, vec![6, 7, 8]);
}

#[test]
fn test_snapshot_service_polling() {
    let fleet = Fleet::default();
    let service = fleet.snapshot_service();

    let first = service.snapshot();
    fleet.ingest(&VehicleUpdate::new("bus-1")).unwrap();
    let second = service.snapshot();

    assert!(second.sequence > first.sequence);
    assert_eq!(service.latest_served(), Sequence(1));
    assert_eq!(service.vehicles().len(), 1);

    // Polling registers nothing
    assert_eq!(fleet.hub().subscriber_count(), 0);
}

#[test]
fn test_restart_from_file_image() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.img");

    {
        let repo = FileRepository::open(&path).unwrap();
        let fleet = Fleet::open(FleetConfig::default(), &repo).unwrap();
        fleet
            .ingest(&VehicleUpdate::new("bus-1").with_capacity(30).with_passengers(7))
            .unwrap();
        fleet
            .ingest(&VehicleUpdate::new("bus-2").with_status("Delayed"))
            .unwrap();
        fleet.persist(&repo).unwrap();
    }

    let repo = FileRepository::open(&path).unwrap();
    assert_eq!(repo.load().unwrap().len(), 2);

    let fleet = Fleet::open(FleetConfig::default(), &repo).unwrap();
    assert_eq!(fleet.store().sequence(), Sequence(0));
    assert_eq!(fleet.get(&VehicleId::from("bus-1")).unwrap().current_passengers, 7);
    assert_eq!(
        fleet.get(&VehicleId::from("bus-2")).unwrap().status,
        VehicleStatus::Delayed
    );

    // A joiner sees restored vehicles in its snapshot
    let sub = fleet.subscribe();
    assert_eq!(sub.snapshot.len(), 2);
}

#[test]
fn test_removal_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.img");

    {
        let repo = FileRepository::open(&path).unwrap();
        let fleet = Fleet::open(FleetConfig::default(), &repo).unwrap();
        fleet.ingest(&VehicleUpdate::new("bus-1")).unwrap();
        fleet.ingest(&VehicleUpdate::new("bus-2")).unwrap();
        fleet.persist(&repo).unwrap();
    }

    {
        let repo = FileRepository::open(&path).unwrap();
        let fleet = Fleet::open(FleetConfig::default(), &repo).unwrap();
        fleet.remove(&VehicleId::from("bus-1")).unwrap();
        fleet.persist(&repo).unwrap();
    }

    let repo = FileRepository::open(&path).unwrap();
    let fleet = Fleet::open(FleetConfig::default(), &repo).unwrap();
    let ids: Vec<String> = fleet
        .snapshot()
        .vehicles
        .iter()
        .map(|v| v.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["bus-2"]);
}

#[test]
fn test_count_without_capacity_is_kept() {
    let fleet = Fleet::default();

    let report = fleet
        .ingest_json(br#"{"identifier": "bus-1", "currentPassengers": 12}"#)
        .unwrap();
    assert!(!report.is_anomalous());

    let bus = fleet.get(&VehicleId::from("bus-1")).unwrap();
    assert_eq!(bus.current_passengers, 12);
    assert_eq!(bus.capacity, None);
    assert_eq!(fleet.stats().anomalies_clamped, 0);

    // Once a capacity arrives it bounds the count
    let report = fleet
        .ingest_report(&VehicleUpdate::new("bus-1").with_capacity(10))
        .unwrap();
    assert!(report.is_anomalous());
    assert_eq!(fleet.get(&VehicleId::from("bus-1")).unwrap().current_passengers, 10);
}

#[test]
fn test_stats() {
    let fleet = Fleet::default();
    let _sub = fleet.subscribe();

    fleet.ingest(&VehicleUpdate::new("bus-1")).unwrap();
    let _ = fleet.ingest(&VehicleUpdate::default());

    let stats = fleet.stats();
    assert_eq!(stats.vehicle_count, 1);
    assert_eq!(stats.sequence, Sequence(1));
    assert_eq!(stats.subscriber_count, 1);
    assert_eq!(stats.updates_rejected, 1);
    assert_eq!(stats.overflow_drops, 0);
}
