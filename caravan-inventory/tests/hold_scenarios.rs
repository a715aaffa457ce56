use caravan_core::events::RecordingPublisher;
use caravan_core::{Clock, DomainError, ManualClock};
use caravan_inventory::{
    AcquireRequest, ContextKey, HoldManager, HoldPolicy, HoldToken, MemoryInventoryStore,
    OwnerRef, UnitStatus,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

fn manager(clock: Arc<ManualClock>) -> Arc<HoldManager> {
    Arc::new(HoldManager::new(
        Arc::new(MemoryInventoryStore::new()),
        clock,
        Arc::new(RecordingPublisher::new()),
        HoldPolicy::default(),
    ))
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 10, 6, 0, 0).unwrap(),
    ))
}

fn journey() -> ContextKey {
    ContextKey::journey(NaiveDate::from_ymd_opt(2026, 4, 12).unwrap())
}

fn request(bus: Uuid, owner: &str, units: &[&str]) -> AcquireRequest {
    AcquireRequest {
        resource_id: bus,
        context: journey(),
        unit_ids: units.iter().map(|u| u.to_string()).collect(),
        owner: OwnerRef::new(owner),
        ttl_seconds: None,
        existing_token: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_race_for_one_seat_has_one_winner() {
    let manager = manager(clock());
    let bus = Uuid::new_v4();
    manager
        .provision(bus, journey(), vec!["A1".into()])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .acquire(request(bus, &format!("shopper-{}", i), &["A1"]))
                .await
        }));
    }

    let mut tokens = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(grant) => tokens.push(grant.hold_token),
            Err(DomainError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(tokens.len(), 1);
    assert_eq!(conflicts, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_requests_are_all_or_nothing() {
    let manager = manager(clock());
    let bus = Uuid::new_v4();
    manager
        .provision(bus, journey(), vec!["A1".into(), "A2".into(), "A3".into()])
        .await
        .unwrap();

    let left = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire(request(bus, "left", &["A1", "A2"])).await })
    };
    let right = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire(request(bus, "right", &["A2", "A3"])).await })
    };
    let left = left.await.unwrap();
    let right = right.await.unwrap();
    assert!(left.is_ok() ^ right.is_ok());

    let map = manager.seat_map(bus, journey(), None).await.unwrap();
    let held = map.iter().filter(|u| u.status == UnitStatus::Held).count();
    assert_eq!(held, 2);
}

#[tokio::test]
async fn test_checkout_flow_with_merge_release_and_expiry() {
    let clock = clock();
    let manager = manager(clock.clone());
    let bus = Uuid::new_v4();
    manager
        .provision(
            bus,
            journey(),
            ["A1", "A2", "A3", "A4"].iter().map(|s| s.to_string()).collect(),
        )
        .await
        .unwrap();

    let first = manager.acquire(request(bus, "dana", &["A1"])).await.unwrap();
    clock.advance(Duration::seconds(100));

    let mut add = request(bus, "dana", &["A2", "A3"]);
    add.existing_token = Some(first.hold_token.clone());
    let merged = manager.acquire(add).await.unwrap();
    assert_eq!(merged.hold_token, first.hold_token);
    assert_eq!(merged.unit_ids.len(), 3);
    assert_eq!(merged.expires_at, clock.now() + Duration::seconds(300));

    let released = manager
        .release(bus, &first.hold_token, Some(vec!["A3".into(), "A4".into()]))
        .await
        .unwrap();
    assert_eq!(released, vec!["A3".to_string()]);

    // someone else's view does not reveal the token
    let view = manager
        .seat_map(bus, journey(), Some(&OwnerRef::new("eve")))
        .await
        .unwrap();
    assert!(view.iter().all(|u| u.hold_token.is_none()));
    let mine = manager
        .seat_map(bus, journey(), Some(&OwnerRef::new("dana")))
        .await
        .unwrap();
    assert_eq!(mine.iter().filter(|u| u.held_by_you).count(), 2);

    clock.advance(Duration::seconds(301));
    let map = manager.seat_map(bus, journey(), None).await.unwrap();
    assert!(map.iter().all(|u| u.status == UnitStatus::Available));
    assert!(matches!(
        manager.confirm(bus, &first.hold_token, None).await,
        Err(DomainError::Expired(_))
    ));
    // release of a lapsed token stays a no-op
    assert!(manager
        .release(bus, &first.hold_token, None)
        .await
        .unwrap()
        .is_empty());
    assert!(manager
        .release(bus, &HoldToken::from("hld_never_issued"), None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_confirmed_units_stay_booked() {
    let manager = manager(clock());
    let bus = Uuid::new_v4();
    manager
        .provision(bus, journey(), vec!["B1".into(), "B2".into()])
        .await
        .unwrap();

    let grant = manager.acquire(request(bus, "finn", &["B1", "B2"])).await.unwrap();
    manager
        .confirm(bus, &grant.hold_token, Some(vec!["B2".into()]))
        .await
        .unwrap();

    assert!(manager.release(bus, &grant.hold_token, None).await.unwrap().is_empty());
    assert!(matches!(
        manager.acquire(request(bus, "gus", &["B2"])).await,
        Err(DomainError::Conflict(_))
    ));
    let grant = manager.acquire(request(bus, "gus", &["B1"])).await.unwrap();
    assert_eq!(grant.unit_ids, vec!["B1".to_string()]);

    let mut foreign = request(bus, "finn", &["B1"]);
    foreign.existing_token = Some(grant.hold_token);
    assert!(matches!(
        manager.acquire(foreign).await,
        Err(DomainError::Invalid(_))
    ));
}
