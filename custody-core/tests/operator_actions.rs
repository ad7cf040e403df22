//! Operator actions (status changes, reroutes) observed through later scans.

mod helpers;

use custody_core::admin::StatusChange;
use custody_core::custody::{CustodyViolation, RerouteRequest};
use custody_core::store::RecordStore;
use custody_core::types::{NextAllowed, PartStatus};
use custody_core::{CheckDetail, CheckKind, RiskLevel, ServiceError};
use helpers::*;

#[tokio::test]
async fn test_flagged_part_fails_next_scan_critically() {
    let p = part("PART_VALVE_1", &berlin_route(), 0);
    let store = seeded_store(vec![p.clone()]).await;
    let pipeline = pipeline(store.clone());

    let receipt = pipeline
        .admin()
        .set_status(&StatusChange {
            part_id: p.part_id.clone(),
            status: PartStatus::Flagged,
            reason: "serial reported on a stolen-goods list".into(),
            operator_id: "OPS-7".into(),
        })
        .await
        .unwrap();
    assert!(receipt.anomaly_recorded);

    let report = pipeline.submit(submission(&p, "HUB_BERLIN")).await.unwrap();
    let custody = report.outcome(CheckKind::Custody).unwrap();
    assert!(custody.is_critical_failure());
    let CheckDetail::Custody(detail) = &custody.detail else {
        panic!("custody outcome carries custody detail");
    };
    assert_eq!(detail.violation, Some(CustodyViolation::PartBlocked));
    assert_eq!(detail.part_status, Some(PartStatus::Flagged));
    assert_eq!(report.assessment.level, RiskLevel::Critical);

    let stored = store.get_part(&p.part_id).await.unwrap().unwrap();
    assert_eq!(stored.current_checkpoint, "FACTORY_X");
}

#[tokio::test]
async fn test_reroute_opens_new_next_checkpoint() {
    let p = part("PART_VALVE_2", &berlin_route(), 0);
    let store = seeded_store(vec![p.clone()]).await;
    let pipeline = pipeline(store.clone());

    let receipt = pipeline
        .admin()
        .reroute(&RerouteRequest {
            part_id: p.part_id.clone(),
            new_route: vec!["FACTORY_X".into(), "HUB_MUNICH".into(), "WAREHOUSE_DE".into()],
            reason: "Berlin hub closed".into(),
            operator_id: "OPS-7".into(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.next_allowed, NextAllowed::Checkpoint("HUB_MUNICH".into()));

    let old_stop = pipeline.submit(submission(&p, "HUB_BERLIN")).await.unwrap();
    assert!(!old_stop.outcome(CheckKind::Custody).unwrap().passed);

    let new_stop = pipeline.submit(submission(&p, "HUB_MUNICH")).await.unwrap();
    assert!(new_stop.outcome(CheckKind::Custody).unwrap().passed);
    let stored = store.get_part(&p.part_id).await.unwrap().unwrap();
    assert_eq!(stored.current_checkpoint, "HUB_MUNICH");
}

#[tokio::test]
async fn test_reroute_of_delivered_part_is_rejected() {
    let p = part("PART_VALVE_3", &berlin_route(), 2);
    let store = seeded_store(vec![p.clone()]).await;
    let pipeline = pipeline(store);

    let result = pipeline
        .admin()
        .reroute(&RerouteRequest {
            part_id: p.part_id.clone(),
            new_route: vec!["FACTORY_X".into(), "WAREHOUSE_DE".into(), "STORE_B".into()],
            reason: "late resale".into(),
            operator_id: "OPS-7".into(),
        })
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidRequest(_))));
}
