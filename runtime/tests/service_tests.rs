//! Integration tests for `CareService` over the in-memory store.
//!
//! Covers the lifecycle scenarios, claim races, the matching gateway,
//! dashboards and change feed delivery.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use chrono::Duration;
use curare_core::CareError;
use curare_core::lifecycle::AdvanceOperation;
use curare_core::pricing::Money;
use curare_core::principal::Principal;
use curare_core::types::{CareRequest, CareRequestStatus, CancelledBy};
use curare_runtime::{
    CareService, ChangeKind, FeedKey, HealthStatus, LastWriteWins, ServiceConfig,
};
use curare_testing::fixtures::{self, NewCareRequestBuilder, catalog_symptom, custom_symptom};
use curare_testing::{InMemoryRequestStore, ManualClock};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    service: Arc<CareService>,
    store: Arc<InMemoryRequestStore>,
    clock: ManualClock,
}

fn harness() -> Harness {
    harness_with(ServiceConfig::default())
}

fn harness_with(config: ServiceConfig) -> Harness {
    let store = Arc::new(InMemoryRequestStore::with_catalog(
        vec![fixtures::service_type(), fixtures::inactive_service_type()],
        fixtures::symptoms(),
    ));
    let clock = ManualClock::new(fixtures::epoch());
    let service = Arc::new(CareService::new(
        store.clone(),
        store.clone(),
        Arc::new(clock.clone()),
        config,
    ));
    Harness {
        service,
        store,
        clock,
    }
}

fn patient() -> Principal {
    Principal::patient(Uuid::new_v4())
}

fn provider() -> Principal {
    Principal::provider(Uuid::new_v4())
}

fn admin() -> Principal {
    Principal::admin(Uuid::new_v4())
}

impl Harness {
    async fn submit(&self, patient: &Principal) -> CareRequest {
        self.service
            .create_care_request(Some(patient), fixtures::simple_request())
            .await
            .unwrap()
    }

    async fn advance(&self, provider: &Principal, request: &CareRequest, op: AdvanceOperation) -> CareRequest {
        self.service
            .advance_status(Some(provider), request.id, op, None)
            .await
            .unwrap()
    }

    async fn complete_visit(&self, provider: &Principal, request: &CareRequest) -> CareRequest {
        self.service
            .claim_request(Some(provider), request.id)
            .await
            .unwrap();
        for op in [
            AdvanceOperation::StartEnRoute,
            AdvanceOperation::MarkArrived,
            AdvanceOperation::StartVisit,
        ] {
            self.advance(provider, request, op).await;
        }
        self.service
            .advance_status(
                Some(provider),
                request.id,
                AdvanceOperation::Complete,
                Some("Rest and fluids".to_string()),
            )
            .await
            .unwrap()
    }
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn submission_is_searching_and_persisted() {
    let h = harness();
    let alice = patient();

    let request = h.submit(&alice).await;

    assert_eq!(request.status, CareRequestStatus::Searching);
    assert_eq!(request.version.value(), 1);
    assert_eq!(request.pricing.total_price, Money::from_cents(10_000));
    assert_eq!(h.store.get(request.id).unwrap(), request);

    let mine = h.service.list_my_requests(Some(&alice)).await.unwrap();
    assert_eq!(mine, vec![request]);
}

#[tokio::test]
async fn submission_prices_every_extra_patient() {
    let h = harness();
    let input = NewCareRequestBuilder::new()
        .case_patient("Ada", vec![catalog_symptom(fixtures::FEVER_ID, 3)])
        .case_patient("Byron", vec![custom_symptom("Rash", 2)])
        .donation(Money::from_cents(1_000))
        .build();

    let request = h
        .service
        .create_care_request(Some(&patient()), input)
        .await
        .unwrap();

    assert_eq!(request.pricing.additional_fees, Money::from_cents(5_000));
    assert_eq!(request.pricing.total_price, Money::from_cents(16_000));
    assert_eq!(request.pricing.patient_responsibility, Money::from_cents(16_000));
    assert_eq!(request.case_patients.len(), 2);
}

#[tokio::test]
async fn submission_rejects_bad_input() {
    let h = harness();
    let alice = patient();

    let err = h
        .service
        .create_care_request(None, fixtures::simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthenticated));

    let err = h
        .service
        .create_care_request(Some(&provider()), fixtures::simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));

    let unknown_service = NewCareRequestBuilder::new()
        .service_type(curare_core::ids::ServiceTypeId::new())
        .case_patient("Ada", vec![custom_symptom("Headache", 3)])
        .build();
    let inactive_service = NewCareRequestBuilder::new()
        .service_type(fixtures::INACTIVE_SERVICE_TYPE_ID)
        .case_patient("Ada", vec![custom_symptom("Headache", 3)])
        .build();
    let unknown_symptom = NewCareRequestBuilder::new()
        .case_patient(
            "Ada",
            vec![catalog_symptom(curare_core::ids::SymptomId::new(), 3)],
        )
        .build();
    let nobody = NewCareRequestBuilder::new().build();
    let oversized_donation = NewCareRequestBuilder::new()
        .case_patient("Ada", vec![custom_symptom("Headache", 3)])
        .donation(Money::from_cents(u64::MAX))
        .build();
    let total_past_max = NewCareRequestBuilder::new()
        .case_patient("Ada", vec![custom_symptom("Headache", 3)])
        .donation(Money::MAX)
        .build();

    for input in [
        unknown_service,
        inactive_service,
        unknown_symptom,
        nobody,
        oversized_donation,
        total_past_max,
    ] {
        let err = h
            .service
            .create_care_request(Some(&alice), input)
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::ValidationFailed(_)), "{err:?}");
    }
    assert!(h.store.is_empty());
}

// ============================================================================
// Matching gateway
// ============================================================================

#[tokio::test]
async fn second_claim_reports_already_claimed() {
    let h = harness();
    let request = h.submit(&patient()).await;
    let (p1, p2) = (provider(), provider());

    let claimed = h.service.claim_request(Some(&p1), request.id).await.unwrap();
    assert_eq!(claimed.status, CareRequestStatus::Matched);
    assert_eq!(claimed.provider_id, p1.as_provider());
    assert!(claimed.matched_at.is_some());

    let err = h
        .service
        .claim_request(Some(&p2), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::RequestAlreadyClaimed(id) if id == request.id));
    assert_eq!(err.code(), "REQUEST_ALREADY_CLAIMED");
    assert_eq!(h.store.get(request.id).unwrap().provider_id, p1.as_provider());
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let h = harness();
    let request = h.submit(&patient()).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&h.service);
            let id = request.id;
            tokio::spawn(async move {
                let provider = provider();
                service
                    .claim_request(Some(&provider), id)
                    .await
                    .map(|_| provider)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(provider) => winners.push(provider),
            Err(err) => assert!(matches!(err, CareError::RequestAlreadyClaimed(_)), "{err:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = h.store.get(request.id).unwrap();
    assert_eq!(stored.status, CareRequestStatus::Matched);
    assert_eq!(stored.provider_id, winners[0].as_provider());
    assert_eq!(stored.version.value(), 2);
}

#[tokio::test]
async fn claiming_a_cancelled_request_fails_precondition() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    h.service
        .cancel_request(Some(&alice), request.id, None)
        .await
        .unwrap();

    let err = h
        .service
        .claim_request(Some(&provider()), request.id)
        .await
        .unwrap_err();
    assert!(err.is_precondition_failure(), "{err:?}");
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let h = harness();
    let id = curare_core::ids::CareRequestId::new();
    let err = h
        .service
        .claim_request(Some(&provider()), id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::RequestNotFound(missing) if missing == id));
}

#[tokio::test]
async fn unclaimed_list_is_newest_first_and_paged() {
    let h = harness_with(ServiceConfig {
        unclaimed_page_size: 2,
        ..ServiceConfig::default()
    });
    let alice = patient();
    let first = h.submit(&alice).await;
    h.clock.advance(Duration::minutes(1));
    let second = h.submit(&alice).await;
    h.clock.advance(Duration::minutes(1));
    let third = h.submit(&alice).await;

    let page = h.service.list_unclaimed(Some(&provider())).await.unwrap();
    assert_eq!(
        page.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![third.id, second.id]
    );

    h.service
        .claim_request(Some(&provider()), third.id)
        .await
        .unwrap();
    let page = h.service.list_unclaimed(Some(&admin())).await.unwrap();
    assert_eq!(
        page.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );

    let err = h.service.list_unclaimed(Some(&alice)).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
}

#[tokio::test]
async fn decline_hides_request_from_that_provider_only() {
    let h = harness();
    let request = h.submit(&patient()).await;
    let (declining, other) = (provider(), provider());

    h.service
        .decline_request(Some(&declining), request.id)
        .await
        .unwrap();

    assert!(h.service.list_unclaimed(Some(&declining)).await.unwrap().is_empty());
    assert_eq!(h.service.list_unclaimed(Some(&other)).await.unwrap().len(), 1);
    assert_eq!(h.store.get(request.id).unwrap().status, CareRequestStatus::Searching);

    // The request is still claimable by the provider who declined it.
    let claimed = h
        .service
        .claim_request(Some(&declining), request.id)
        .await
        .unwrap();
    assert_eq!(claimed.provider_id, declining.as_provider());
}

#[tokio::test]
async fn declining_a_claimed_request_is_a_no_op() {
    let h = harness();
    let request = h.submit(&patient()).await;
    let (winner, late) = (provider(), provider());
    h.service.claim_request(Some(&winner), request.id).await.unwrap();

    h.service.decline_request(Some(&late), request.id).await.unwrap();

    assert!(!h.store.is_dismissed(request.id, late.as_provider().unwrap()));
    let err = h
        .service
        .decline_request(Some(&patient()), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn full_visit_reaches_completed_with_notes() {
    let h = harness();
    let p = provider();
    let request = h.submit(&patient()).await;

    let done = h.complete_visit(&p, &request).await;

    assert_eq!(done.status, CareRequestStatus::Completed);
    assert_eq!(done.provider_notes.as_deref(), Some("Rest and fluids"));
    assert!(done.arrived_at.is_some());
    assert!(done.completed_at.is_some());
    assert_eq!(done.version.value(), 6);
    assert!(done.check_invariants().is_ok());

    assert!(h.service.active_request(Some(&p)).await.unwrap().is_none());
    let history = h.service.provider_history(Some(&p)).await.unwrap();
    assert_eq!(history, vec![done]);
}

#[tokio::test]
async fn active_request_follows_the_visit() {
    let h = harness();
    let p = provider();
    let request = h.submit(&patient()).await;
    assert!(h.service.active_request(Some(&p)).await.unwrap().is_none());

    h.service.claim_request(Some(&p), request.id).await.unwrap();
    let en_route = h.advance(&p, &request, AdvanceOperation::StartEnRoute).await;

    let active = h.service.active_request(Some(&p)).await.unwrap().unwrap();
    assert_eq!(active, en_route);
    assert_eq!(active.status, CareRequestStatus::EnRoute);
}

#[tokio::test]
async fn wrong_provider_cannot_advance() {
    let h = harness();
    let (assigned, intruder) = (provider(), provider());
    let request = h.submit(&patient()).await;
    h.service.claim_request(Some(&assigned), request.id).await.unwrap();
    h.advance(&assigned, &request, AdvanceOperation::StartEnRoute).await;

    let err = h
        .service
        .advance_status(Some(&intruder), request.id, AdvanceOperation::MarkArrived, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CareError::NotAuthorized(_)));
    assert_eq!(h.store.get(request.id).unwrap().status, CareRequestStatus::EnRoute);
}

#[tokio::test]
async fn skipping_a_step_fails_precondition_and_changes_nothing() {
    let h = harness();
    let p = provider();
    let request = h.submit(&patient()).await;
    let claimed = h.service.claim_request(Some(&p), request.id).await.unwrap();

    let err = h
        .service
        .advance_status(Some(&p), request.id, AdvanceOperation::Complete, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CareError::PreconditionFailed { status: CareRequestStatus::Matched, .. }
    ));
    assert_eq!(h.store.get(request.id).unwrap(), claimed);
}

#[tokio::test]
async fn cancel_on_completed_fails_precondition() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    h.complete_visit(&provider(), &request).await;

    let err = h
        .service
        .cancel_request(Some(&alice), request.id, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CareError::PreconditionFailed { status: CareRequestStatus::Completed, .. }
    ));
    assert_eq!(h.store.get(request.id).unwrap().status, CareRequestStatus::Completed);
}

#[tokio::test]
async fn patient_cancels_matched_request_and_provider_is_released() {
    let h = harness();
    let alice = patient();
    let p = provider();
    let request = h.submit(&alice).await;
    h.service.claim_request(Some(&p), request.id).await.unwrap();

    let cancelled = h
        .service
        .cancel_request(Some(&alice), request.id, Some("  Feeling better ".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, CareRequestStatus::Cancelled);
    assert!(cancelled.provider_id.is_none());
    assert!(cancelled.cancelled_at.is_some());
    let cancellation = cancelled.cancellation.unwrap();
    assert_eq!(cancellation.cancelled_by, CancelledBy::Patient);
    assert_eq!(cancellation.reason.as_deref(), Some("Feeling better"));
    assert!(h.service.active_request(Some(&p)).await.unwrap().is_none());
}

#[tokio::test]
async fn only_owner_or_admin_can_cancel() {
    let h = harness();
    let request = h.submit(&patient()).await;

    for outsider in [patient(), provider()] {
        let err = h
            .service
            .cancel_request(Some(&outsider), request.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::NotAuthorized(_)));
    }

    let cancelled = h
        .service
        .cancel_request(Some(&admin()), request.id, Some("Duplicate".to_string()))
        .await
        .unwrap();
    assert_eq!(
        cancelled.cancellation.unwrap().cancelled_by,
        CancelledBy::Admin
    );
}

#[tokio::test]
async fn admin_reassign_hands_the_visit_to_another_provider() {
    let h = harness();
    let (first, second) = (provider(), provider());
    let request = h.submit(&patient()).await;
    h.service.claim_request(Some(&first), request.id).await.unwrap();
    h.advance(&first, &request, AdvanceOperation::StartEnRoute).await;
    h.advance(&first, &request, AdvanceOperation::MarkArrived).await;

    let reassigned = h
        .service
        .admin_reassign(Some(&admin()), request.id, second.as_provider().unwrap())
        .await
        .unwrap();
    assert_eq!(reassigned.provider_id, second.as_provider());
    assert_eq!(reassigned.status, CareRequestStatus::Matched);
    assert!(reassigned.arrived_at.is_none());

    let err = h
        .service
        .advance_status(Some(&first), request.id, AdvanceOperation::StartEnRoute, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
    h.advance(&second, &request, AdvanceOperation::StartEnRoute).await;

    let err = h
        .service
        .admin_reassign(Some(&first), request.id, first.as_provider().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
}

#[tokio::test]
async fn reads_respect_visibility() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    let (assigned, other) = (provider(), provider());

    assert!(h.service.get_care_request(Some(&alice), request.id).await.is_ok());
    assert!(h.service.get_care_request(Some(&other), request.id).await.is_ok());
    let err = h
        .service
        .get_care_request(Some(&patient()), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));

    h.service.claim_request(Some(&assigned), request.id).await.unwrap();
    assert!(h.service.get_care_request(Some(&assigned), request.id).await.is_ok());
    assert!(h.service.get_care_request(Some(&admin()), request.id).await.is_ok());
    let err = h
        .service
        .get_care_request(Some(&other), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));

    let err = h.service.get_care_request(None, request.id).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthenticated));
}

// ============================================================================
// Dashboards and catalog
// ============================================================================

#[tokio::test]
async fn admin_list_filters_and_caps() {
    let h = harness();
    let alice = patient();
    let a = h.submit(&alice).await;
    h.clock.advance(Duration::minutes(1));
    h.submit(&alice).await;
    h.clock.advance(Duration::minutes(1));
    h.submit(&alice).await;
    h.service.claim_request(Some(&provider()), a.id).await.unwrap();
    let root = admin();

    let matched = h
        .service
        .admin_list(Some(&root), Some(CareRequestStatus::Matched), None)
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, a.id);

    assert_eq!(h.service.admin_list(Some(&root), None, Some(2)).await.unwrap().len(), 2);
    assert_eq!(h.service.admin_list(Some(&root), None, Some(500)).await.unwrap().len(), 3);

    let err = h.service.admin_list(Some(&alice), None, None).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
}

#[tokio::test]
async fn stats_count_today_from_midnight_utc() {
    let h = harness();
    let p = provider();
    let alice = patient();
    h.clock.advance(Duration::hours(9));
    let done = h.submit(&alice).await;
    h.submit(&alice).await;
    h.complete_visit(&p, &done).await;

    let platform = h.service.admin_stats(Some(&admin())).await.unwrap();
    assert_eq!(platform.completed_visits, 1);
    assert_eq!(platform.completed_today, 1);
    assert_eq!(platform.total_revenue, Money::from_cents(10_000));
    assert_eq!(platform.revenue_today, Money::from_cents(10_000));
    assert_eq!(platform.unclaimed_requests, 1);
    assert_eq!(platform.active_requests, 1);

    h.clock.advance(Duration::days(1));
    let mine = h.service.provider_stats(Some(&p)).await.unwrap();
    assert_eq!(mine.total_visits, 1);
    assert_eq!(mine.today_visits, 0);
    assert_eq!(mine.today_earnings, Money::ZERO);
    assert_eq!(mine.available_requests, 1);

    let err = h.service.admin_stats(Some(&p)).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
}

#[tokio::test]
async fn catalog_lists_and_searches() {
    let h = harness();

    let services = h.service.service_types().await.unwrap();
    assert_eq!(services, vec![fixtures::service_type()]);

    assert_eq!(h.service.symptoms(None).await.unwrap().len(), 3);
    assert_eq!(h.service.symptoms(Some("   ")).await.unwrap().len(), 3);
    let found = h.service.symptoms(Some("fev")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, fixtures::FEVER_ID);
}

// ============================================================================
// Change feed
// ============================================================================

async fn next_event(sub: &mut curare_runtime::Subscription) -> curare_runtime::ChangeEvent {
    tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("subscription closed")
}

#[tokio::test]
async fn request_subscribers_see_every_write_in_order() {
    let h = harness();
    let alice = patient();
    let p = provider();
    let request = h.submit(&alice).await;

    let mut sub = h
        .service
        .subscribe(Some(&alice), FeedKey::Request(request.id))
        .await
        .unwrap();

    h.service.claim_request(Some(&p), request.id).await.unwrap();
    h.advance(&p, &request, AdvanceOperation::StartEnRoute).await;

    let claimed = next_event(&mut sub).await;
    assert_eq!(claimed.kind, ChangeKind::Updated);
    assert_eq!(claimed.request.status, CareRequestStatus::Matched);
    assert_eq!(claimed.version.value(), 2);

    let en_route = next_event(&mut sub).await;
    assert_eq!(en_route.request.status, CareRequestStatus::EnRoute);
    assert_eq!(en_route.version.value(), 3);

    let mut view = LastWriteWins::new();
    assert!(view.apply(&en_route));
    assert!(!view.apply(&claimed));
    assert_eq!(view.get(request.id).unwrap().status, CareRequestStatus::EnRoute);
}

#[tokio::test]
async fn unclaimed_pool_watchers_see_requests_enter_and_leave() {
    let h = harness();
    let watcher = provider();
    let mut pool = h
        .service
        .subscribe(Some(&watcher), FeedKey::AllUnclaimed)
        .await
        .unwrap();

    let request = h.submit(&patient()).await;
    let created = next_event(&mut pool).await;
    assert_eq!(created.kind, ChangeKind::Created);
    assert_eq!(created.request.id, request.id);

    h.service.claim_request(Some(&provider()), request.id).await.unwrap();
    let left = next_event(&mut pool).await;
    assert!(left.was_unclaimed);
    assert_eq!(left.request.status, CareRequestStatus::Matched);

    // Further progress no longer concerns the pool.
    let mut all = h.service.subscribe(Some(&admin()), FeedKey::All).await.unwrap();
    h.service
        .cancel_request(Some(&admin()), request.id, None)
        .await
        .unwrap();
    assert_eq!(next_event(&mut all).await.request.status, CareRequestStatus::Cancelled);
    assert!(pool.try_recv().is_none());
}

#[tokio::test]
async fn closing_a_subscription_releases_its_channel() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    let key = FeedKey::Request(request.id);

    let mut first = h.service.subscribe(Some(&alice), key).await.unwrap();
    let second = h.service.subscribe(Some(&alice), key).await.unwrap();
    assert_eq!(h.service.feed().subscriber_count(key), 2);

    first.close();
    first.close();
    assert!(first.is_closed());
    assert!(first.recv().await.is_none());
    assert_eq!(h.service.feed().subscriber_count(key), 1);

    drop(second);
    assert_eq!(h.service.feed().active_channels(), 0);

    // Writes with no subscribers are simply not delivered.
    h.service.claim_request(Some(&provider()), request.id).await.unwrap();
    assert_eq!(h.service.feed().active_channels(), 0);
}

#[tokio::test]
async fn subscriptions_are_authorized() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;

    let err = h.service.subscribe(None, FeedKey::All).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthenticated));
    let err = h.service.subscribe(Some(&alice), FeedKey::All).await.unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
    let err = h
        .service
        .subscribe(Some(&provider()), FeedKey::All)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
    let err = h
        .service
        .subscribe(Some(&alice), FeedKey::AllUnclaimed)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
    let err = h
        .service
        .subscribe(Some(&patient()), FeedKey::Request(request.id))
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::NotAuthorized(_)));
    let err = h
        .service
        .subscribe(Some(&alice), FeedKey::Request(curare_core::ids::CareRequestId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::RequestNotFound(_)));

    assert_eq!(h.service.feed().active_channels(), 0);
}

#[tokio::test]
async fn bystander_loses_the_request_feed_once_another_provider_claims() {
    let h = harness();
    let alice = patient();
    let bystander = provider();
    let winner = provider();
    let request = h.submit(&alice).await;
    let key = FeedKey::Request(request.id);

    let mut watching = h.service.subscribe(Some(&bystander), key).await.unwrap();
    let mut owner = h.service.subscribe(Some(&alice), key).await.unwrap();

    h.complete_visit(&winner, &request).await;

    let revoked = tokio::time::timeout(std::time::Duration::from_secs(1), watching.recv())
        .await
        .unwrap();
    assert!(revoked.is_none());
    assert!(watching.is_revoked());
    assert!(watching.is_closed());
    assert!(watching.try_recv().is_none());
    assert!(matches!(
        h.service.get_care_request(Some(&bystander), request.id).await,
        Err(CareError::NotAuthorized(_))
    ));

    // The owner still sees the whole visit, notes included.
    let mut last = next_event(&mut owner).await;
    while last.request.status != CareRequestStatus::Completed {
        last = next_event(&mut owner).await;
    }
    assert_eq!(last.request.provider_notes.as_deref(), Some("Rest and fluids"));
    assert!(!owner.is_revoked());
    assert_eq!(h.service.feed().subscriber_count(key), 1);
}

#[tokio::test]
async fn reassigned_provider_loses_the_request_feed() {
    let h = harness();
    let alice = patient();
    let first = provider();
    let second = provider();
    let request = h.submit(&alice).await;
    h.service.claim_request(Some(&first), request.id).await.unwrap();

    let mut sub = h
        .service
        .subscribe(Some(&first), FeedKey::Request(request.id))
        .await
        .unwrap();
    h.advance(&first, &request, AdvanceOperation::StartEnRoute).await;
    assert_eq!(next_event(&mut sub).await.request.status, CareRequestStatus::EnRoute);

    h.service
        .admin_reassign(Some(&admin()), request.id, second.as_provider().unwrap())
        .await
        .unwrap();

    assert!(sub.recv().await.is_none());
    assert!(sub.is_revoked());
    assert_eq!(h.service.feed().active_channels(), 0);
}

#[tokio::test]
async fn feed_stream_yields_events() {
    use futures::StreamExt;

    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    let sub = h
        .service
        .subscribe(Some(&alice), FeedKey::Request(request.id))
        .await
        .unwrap();
    let mut stream = Box::pin(sub.into_stream());

    h.service
        .cancel_request(Some(&alice), request.id, None)
        .await
        .unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.request.status, CareRequestStatus::Cancelled);
}

// ============================================================================
// Outages
// ============================================================================

#[tokio::test]
async fn store_outage_surfaces_as_store_unavailable() {
    let h = harness();
    let alice = patient();
    let request = h.submit(&alice).await;
    assert!(h.service.ready().await.is_ok());
    assert_eq!(h.service.health().await.status, HealthStatus::Healthy);

    h.store.set_unavailable(true);

    let err = h
        .service
        .claim_request(Some(&provider()), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::StoreUnavailable(_)));
    let err = h
        .service
        .create_care_request(Some(&alice), fixtures::simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, CareError::StoreUnavailable(_)));
    assert!(h.service.ready().await.is_err());
    let report = h.service.health().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.is_ready());

    h.store.set_unavailable(false);
    assert_eq!(h.store.get(request.id).unwrap().status, CareRequestStatus::Searching);
}
