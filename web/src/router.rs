//! Route table and middleware stack.

use crate::AppState;
use crate::handlers::{admin, care_requests, catalog, feed, health, metrics, provider};
use crate::middleware::request_context_layer;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Build the application router.
///
/// Layers, outermost first: request id assignment, HTTP tracing, request id
/// propagation to the response, request context.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Patients
        .route(
            "/care-requests",
            post(care_requests::create).get(care_requests::list_mine),
        )
        .route("/care-requests/:id", get(care_requests::get_one))
        .route("/care-requests/:id/cancel", post(care_requests::cancel))
        // Providers
        .route("/provider/requests", get(provider::unclaimed))
        .route("/provider/requests/:id/claim", post(provider::claim))
        .route("/provider/requests/:id/decline", post(provider::decline))
        .route("/provider/requests/:id/advance", post(provider::advance))
        .route("/provider/active", get(provider::active))
        .route("/provider/history", get(provider::history))
        .route("/provider/stats", get(provider::stats))
        // Admins
        .route("/admin/requests", get(admin::list))
        .route("/admin/requests/:id/cancel", post(care_requests::cancel))
        .route("/admin/requests/:id/assign", post(admin::assign))
        .route("/admin/stats", get(admin::stats))
        // Catalog
        .route("/service-types", get(catalog::service_types))
        .route("/symptoms", get(catalog::symptoms))
        // Change feed
        .route("/feed/requests/:id", get(feed::request))
        .route("/feed/unclaimed", get(feed::unclaimed))
        .route("/feed/all", get(feed::all));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/metrics", get(metrics::render))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(request_context_layer()),
        )
        .with_state(state)
}
