//! Runs against a live PostgreSQL when `DATABASE_URL` is set; otherwise each test returns early.

use caravan_core::events::RecordingPublisher;
use caravan_core::{Actor, DomainError, SystemClock};
use caravan_inventory::{AcquireRequest, ContextKey, HoldManager, HoldPolicy, OwnerRef};
use caravan_pooling::{PoolCoordinator, ReviewDecision};
use caravan_store::{DbClient, PgGroupStore, PgInventoryStore};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

async fn db() -> Option<DbClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = DbClient::new(&url, 10).await.expect("connect");
    db.migrate().await.expect("migrate");
    Some(db)
}

#[tokio::test]
async fn test_concurrent_acquire_single_winner() {
    let Some(db) = db().await else {
        return;
    };
    let manager = Arc::new(HoldManager::new(
        Arc::new(PgInventoryStore::new(db.pool.clone())),
        Arc::new(SystemClock),
        Arc::new(RecordingPublisher::new()),
        HoldPolicy::default(),
    ));
    let bus = Uuid::new_v4();
    let date = ContextKey::journey(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
    manager
        .provision(bus, date, vec!["A1".into(), "A2".into()])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for owner in ["alice", "bob"] {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .acquire(AcquireRequest {
                    resource_id: bus,
                    context: date,
                    unit_ids: vec!["A1".into()],
                    owner: OwnerRef::new(owner),
                    ttl_seconds: None,
                    existing_token: None,
                })
                .await
        }));
    }

    let mut granted = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(DomainError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!((granted, conflicts), (1, 1));
}

#[tokio::test]
async fn test_hold_survives_reload_and_confirms() {
    let Some(db) = db().await else {
        return;
    };
    let store = Arc::new(PgInventoryStore::new(db.pool.clone()));
    let manager = HoldManager::new(
        store.clone(),
        Arc::new(SystemClock),
        Arc::new(RecordingPublisher::new()),
        HoldPolicy::default(),
    );
    let hotel = Uuid::new_v4();
    let stay = ContextKey::stay(
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 5, 3).unwrap(),
    )
    .unwrap();
    manager
        .provision(hotel, stay, vec!["101".into(), "102".into()])
        .await
        .unwrap();

    let grant = manager
        .acquire(AcquireRequest {
            resource_id: hotel,
            context: stay,
            unit_ids: vec!["101".into(), "102".into()],
            owner: OwnerRef::new("carol"),
            ttl_seconds: Some(120),
            existing_token: None,
        })
        .await
        .unwrap();

    let booked = manager
        .confirm(hotel, &grant.hold_token, Some(vec!["101".into()]))
        .await
        .unwrap();
    assert_eq!(booked, vec!["101".to_string()]);

    let map = manager.seat_map(hotel, stay, None).await.unwrap();
    let statuses: Vec<&str> = map.iter().map(|u| u.status.as_str()).collect();
    assert_eq!(statuses, vec!["BOOKED", "AVAILABLE"]);
    assert!(matches!(
        manager.confirm(hotel, &grant.hold_token, None).await,
        Err(DomainError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_group_round_trip() {
    let Some(db) = db().await else {
        return;
    };
    let coordinator = PoolCoordinator::new(
        Arc::new(PgGroupStore::new(db.pool.clone())),
        Arc::new(SystemClock),
        Arc::new(RecordingPublisher::new()),
        50,
    );
    let creator = Actor::customer(format!("creator-{}", Uuid::new_v4()));
    let group = coordinator
        .create_group(&creator, Uuid::new_v4(), 2)
        .await
        .unwrap();

    for user in ["pg-u1", "pg-u2"] {
        let member = coordinator
            .join(&Actor::customer(user), group.id)
            .await
            .unwrap();
        coordinator
            .review_member(&creator, group.id, member.id, ReviewDecision::Approved)
            .await
            .unwrap();
    }

    let agg = coordinator.get_group(group.id).await.unwrap();
    assert_eq!(agg.group.current_size, 2);
    assert_eq!(agg.group.status.as_str(), "CLOSED");
    assert_eq!(agg.members.len(), 2);

    let mine = coordinator.my_groups(&creator).await.unwrap();
    assert_eq!(mine.len(), 1);
}
