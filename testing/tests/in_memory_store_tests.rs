//! Contract tests for `InMemoryRequestStore`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use chrono::Duration;
use curare_core::environment::Clock;
use curare_core::lifecycle::{LifecycleCommand, LifecycleEngine};
use curare_core::pricing::DEFAULT_ADDITIONAL_PATIENT_FEE;
use curare_core::principal::Principal;
use curare_core::store::{CatalogStore, RequestStore, StatsScope};
use curare_core::types::{CareRequest, CareRequestStatus};
use curare_core::{CareError, StoreError};
use curare_testing::{fixtures, test_clock, InMemoryRequestStore, ManualClock};
use std::sync::Arc;
use uuid::Uuid;

fn store() -> InMemoryRequestStore {
    InMemoryRequestStore::with_catalog(
        vec![fixtures::service_type(), fixtures::inactive_service_type()],
        fixtures::symptoms(),
    )
}

fn submitted(patient: &Principal, clock: &dyn Clock) -> CareRequest {
    LifecycleEngine::submit(
        patient,
        fixtures::simple_request(),
        fixtures::service_type(),
        &fixtures::symptoms(),
        DEFAULT_ADDITIONAL_PATIENT_FEE,
        clock,
    )
    .unwrap()
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn lists_are_newest_first() {
    let store = store();
    let clock = ManualClock::new(fixtures::epoch());
    let patient = Principal::patient(Uuid::new_v4());

    let first = submitted(&patient, &clock);
    clock.advance(Duration::minutes(1));
    let second = submitted(&patient, &clock);
    store.insert_submission(&first).await.unwrap();
    store.insert_submission(&second).await.unwrap();

    let mine = store
        .find_by_patient(patient.as_patient().unwrap())
        .await
        .unwrap();
    assert_eq!(
        mine.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );

    let unclaimed = store.find_unclaimed(1, None).await.unwrap();
    assert_eq!(unclaimed.len(), 1);
    assert_eq!(unclaimed[0].id, second.id);
}

#[tokio::test]
async fn duplicate_submission_is_a_conflict() {
    let store = store();
    let request = submitted(&Principal::patient(Uuid::new_v4()), &test_clock());
    store.insert_submission(&request).await.unwrap();
    let err = store.insert_submission(&request).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn dismissed_requests_are_hidden_from_that_provider_only() {
    let store = store();
    let request = submitted(&Principal::patient(Uuid::new_v4()), &test_clock());
    store.insert_submission(&request).await.unwrap();

    let declining = Principal::provider(Uuid::new_v4()).as_provider().unwrap();
    let other = Principal::provider(Uuid::new_v4()).as_provider().unwrap();
    store
        .record_dismissal(request.id, declining, fixtures::epoch())
        .await
        .unwrap();
    // Idempotent.
    store
        .record_dismissal(request.id, declining, fixtures::epoch())
        .await
        .unwrap();

    assert!(store.find_unclaimed(20, Some(declining)).await.unwrap().is_empty());
    assert_eq!(store.find_unclaimed(20, Some(other)).await.unwrap().len(), 1);
    assert_eq!(store.find_unclaimed(20, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn catalog_queries() {
    let store = store();
    let active = store.active_service_types().await.unwrap();
    assert_eq!(active, vec![fixtures::service_type()]);

    let names: Vec<String> = store
        .list_symptoms()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["Chest pain", "Cough", "Fever"]);

    let found = store.search_symptoms("CO", 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, fixtures::COUGH_ID);

    let known = store
        .symptoms(&[fixtures::FEVER_ID, curare_core::ids::SymptomId::new()])
        .await
        .unwrap();
    assert_eq!(known.len(), 1);
}

// ============================================================================
// Conditional writes
// ============================================================================

#[tokio::test]
async fn stale_transition_matches_no_row() {
    let store = store();
    let request = submitted(&Principal::patient(Uuid::new_v4()), &test_clock());
    store.insert_submission(&request).await.unwrap();

    let a = Principal::provider(Uuid::new_v4());
    let b = Principal::provider(Uuid::new_v4());
    let claim_a = LifecycleEngine::decide(&request, &a, LifecycleCommand::Claim, &test_clock()).unwrap();
    let claim_b = LifecycleEngine::decide(&request, &b, LifecycleCommand::Claim, &test_clock()).unwrap();

    let won = store.apply_transition(&claim_a).await.unwrap().unwrap();
    assert_eq!(won.provider_id, a.as_provider());
    assert_eq!(won.version.value(), 2);

    assert!(store.apply_transition(&claim_b).await.unwrap().is_none());
    assert_eq!(store.get(request.id).unwrap().provider_id, a.as_provider());
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let store = Arc::new(store());
    let request = submitted(&Principal::patient(Uuid::new_v4()), &test_clock());
    store.insert_submission(&request).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            let snapshot = request.clone();
            tokio::spawn(async move {
                let provider = Principal::provider(Uuid::new_v4());
                let transition =
                    LifecycleEngine::decide(&snapshot, &provider, LifecycleCommand::Claim, &test_clock())
                        .unwrap();
                store
                    .apply_transition(&transition)
                    .await
                    .unwrap()
                    .map(|_| provider)
            })
        })
        .collect();

    let winners: Vec<Principal> = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|result| result.unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    let stored = store.get(request.id).unwrap();
    assert_eq!(stored.status, CareRequestStatus::Matched);
    assert_eq!(stored.provider_id, winners[0].as_provider());
}

// ============================================================================
// Stats and outages
// ============================================================================

#[tokio::test]
async fn stats_count_revenue_and_activity() {
    let store = store();
    let clock = test_clock();
    let patient = Principal::patient(Uuid::new_v4());
    let provider = Principal::provider(Uuid::new_v4());

    let mut done = submitted(&patient, &clock);
    let waiting = submitted(&patient, &clock);
    store.insert_submission(&done).await.unwrap();
    store.insert_submission(&waiting).await.unwrap();

    for command in [
        LifecycleCommand::Claim,
        LifecycleCommand::advance(curare_core::lifecycle::AdvanceOperation::StartEnRoute),
        LifecycleCommand::advance(curare_core::lifecycle::AdvanceOperation::MarkArrived),
        LifecycleCommand::advance(curare_core::lifecycle::AdvanceOperation::StartVisit),
        LifecycleCommand::advance(curare_core::lifecycle::AdvanceOperation::Complete),
    ] {
        let transition = LifecycleEngine::decide(&done, &provider, command, &clock).unwrap();
        done = store.apply_transition(&transition).await.unwrap().unwrap();
    }

    let platform = store
        .stats(StatsScope::Platform, fixtures::epoch())
        .await
        .unwrap();
    assert_eq!(platform.completed_visits, 1);
    assert_eq!(platform.total_revenue, done.pricing.total_price);
    assert_eq!(platform.unclaimed_requests, 1);
    assert_eq!(platform.active_requests, 1);
    assert_eq!(platform.completed_since, 1);

    let mine = store
        .stats(
            StatsScope::Provider(provider.as_provider().unwrap()),
            fixtures::epoch() + Duration::days(1),
        )
        .await
        .unwrap();
    assert_eq!(mine.completed_visits, 1);
    assert_eq!(mine.completed_since, 0);
    assert_eq!(mine.active_requests, 0);
}

#[tokio::test]
async fn outage_surfaces_as_store_unavailable() {
    let store = store();
    store.set_unavailable(true);
    let err: CareError = store.find_unclaimed(20, None).await.unwrap_err().into();
    assert!(matches!(err, CareError::StoreUnavailable(_)));
    assert!(store.ping().await.is_err());

    store.set_unavailable(false);
    assert!(store.ping().await.is_ok());
}
