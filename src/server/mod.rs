//! Thin HTTP surface over the core (SPEC_FULL §6, "ambient stack"). Request
//! parsing and response shaping only: every route delegates straight into
//! a core component and lets `AppError`'s `IntoResponse` impl produce the
//! `{detail: {code, message}}` envelope of §7.

pub mod auth;
pub mod dto;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::chain_adapter::ChainAdapter;
use crate::config::AppConfig;
use crate::event_bus::EventBus;
use crate::ledger::Ledger;
use crate::job::JobStateMachine;
use crate::negotiation::NegotiationEngine;
use crate::reputation::ReputationService;
use crate::verifier::PaymentVerifier;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub ledger: Ledger,
    pub jobs: JobStateMachine,
    pub negotiations: NegotiationEngine,
    pub verifier: PaymentVerifier,
    pub reputation: ReputationService,
    pub events: EventBus,
}

/// Wires the core components onto a `PgPool` and assembles the router.
/// `chain` is the chain adapter collaborator; a real deployment supplies an
/// RPC-backed implementation, while tests and local runs pass
/// `MockChainAdapter`.
pub fn configure_app(pool: PgPool, config: AppConfig, chain: Arc<dyn ChainAdapter>) -> Router {
    let events = EventBus::new();
    let ledger = Ledger::new(pool.clone());
    let jobs = JobStateMachine::new(
        pool.clone(),
        ledger.clone(),
        events.clone(),
        config.default_currency.clone(),
    );
    let negotiations = NegotiationEngine::new(pool.clone(), config.clone());
    let verifier = PaymentVerifier::new(
        pool.clone(),
        ledger.clone(),
        chain,
        config.clone(),
        events.clone(),
    );
    let reputation = ReputationService::new(pool.clone(), events.clone());

    let state = AppState {
        pool,
        config,
        ledger,
        jobs,
        negotiations,
        verifier,
        reputation,
        events,
    };

    Router::new()
        .route("/healthz", get(routes::health::health_check))
        .route("/jobs", post(routes::jobs::create_job))
        .route("/jobs/:id", get(routes::jobs::get_job))
        .route("/jobs/:id/start", post(routes::jobs::start_job))
        .route("/jobs/:id/deliver", post(routes::jobs::deliver_job))
        .route(
            "/jobs/:id/request-revision",
            post(routes::jobs::request_revision),
        )
        .route("/jobs/:id/complete", post(routes::jobs::complete_job))
        .route("/jobs/:id/cancel", post(routes::jobs::cancel_job))
        .route("/jobs/:id/fail", post(routes::jobs::fail_job))
        .route(
            "/negotiations/start",
            post(routes::negotiations::start_negotiation),
        )
        .route(
            "/negotiations/:id/respond",
            post(routes::negotiations::respond_to_negotiation),
        )
        .route("/negotiations/:id", get(routes::negotiations::get_negotiation))
        .route(
            "/negotiations/:id/offers",
            get(routes::negotiations::list_offers),
        )
        .route("/payments/verify", post(routes::payments::verify_payment))
        .route("/events", get(routes::events::stream_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
