mod common;

use agent_marketplace_core::models::NegotiationStatus;
use agent_marketplace_core::negotiation::{NegotiationEngine, NegotiationError, RespondAction};
use rust_decimal::Decimal;

/// An initial offer outside the service's own price bounds is rejected
/// before any row is written.
#[tokio::test]
async fn start_rejects_initial_offer_outside_service_bounds() {
    let pool = common::setup_test_db().await;
    let negotiations = NegotiationEngine::new(pool.clone(), common::test_config());

    let client = common::create_agent(&pool, "neg-bounds-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "neg-bounds-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "translation",
            min_price: Decimal::new(100000, 2),
            max_price: Decimal::new(200000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let err = negotiations
        .start(client, &service, "translate a manual".to_string(), Decimal::new(50000, 2), None, None)
        .await
        .expect_err("offer below service min should be rejected");
    assert!(matches!(err, NegotiationError::InvalidInput(_)));

    let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM negotiations WHERE service_id = $1")
        .bind(service.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

/// A client-stated max price tighter than the service bounds still governs
/// the initial offer.
#[tokio::test]
async fn start_rejects_initial_offer_above_client_max_price() {
    let pool = common::setup_test_db().await;
    let negotiations = NegotiationEngine::new(pool.clone(), common::test_config());

    let client = common::create_agent(&pool, "neg-cap-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "neg-cap-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "transcription",
            min_price: Decimal::new(10000, 2),
            max_price: Decimal::new(100000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let err = negotiations
        .start(
            client,
            &service,
            "transcribe an interview".to_string(),
            Decimal::new(80000, 2),
            Some(Decimal::new(50000, 2)),
            None,
        )
        .await
        .expect_err("offer above client max price should be rejected");
    assert!(matches!(err, NegotiationError::InvalidInput(_)));
}

/// A negotiation bounded to a single round rejects the second counter and
/// marks the negotiation `rejected` rather than looping indefinitely.
#[tokio::test]
async fn exceeding_max_rounds_rejects_and_stops_the_negotiation() {
    let pool = common::setup_test_db().await;
    let mut config = common::test_config();
    config.default_max_rounds = 1;
    let negotiations = NegotiationEngine::new(pool.clone(), config);

    let client = common::create_agent(&pool, "neg-rounds-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "neg-rounds-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "voiceover",
            min_price: Decimal::new(10000, 2),
            max_price: Decimal::new(100000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let negotiation = negotiations
        .start(client, &service, "record a voiceover".to_string(), Decimal::new(20000, 2), None, None)
        .await
        .expect("negotiation should start");

    let err = negotiations
        .respond(
            negotiation.id,
            worker,
            RespondAction::Counter { new_price: Decimal::new(40000, 2) },
            None,
        )
        .await
        .expect_err("counter beyond max_rounds=1 should be rejected");
    assert!(matches!(err, NegotiationError::InvalidState(_)));

    let reloaded = negotiations.get(negotiation.id).await.unwrap();
    assert_eq!(reloaded.status, NegotiationStatus::Rejected);
}

/// Once one side accepts, the negotiation is `agreed` and a second accept
/// on the already-settled negotiation observes the post-commit state
/// instead of silently double-agreeing. A real concurrent double-accept is
/// guarded by the same row lock; this exercises the guard sequentially by
/// retrying after the fact.
#[tokio::test]
async fn second_response_after_agreement_sees_invalid_state() {
    let pool = common::setup_test_db().await;
    let negotiations = NegotiationEngine::new(pool.clone(), common::test_config());

    let client = common::create_agent(&pool, "neg-race-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "neg-race-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "copywriting",
            min_price: Decimal::new(10000, 2),
            max_price: Decimal::new(100000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let negotiation = negotiations
        .start(client, &service, "write ad copy".to_string(), Decimal::new(30000, 2), None, None)
        .await
        .unwrap();

    let agreed = negotiations
        .respond(negotiation.id, worker, RespondAction::Accept, None)
        .await
        .expect("worker accept should succeed");
    assert_eq!(agreed.status, NegotiationStatus::Agreed);

    let err = negotiations
        .respond(negotiation.id, worker, RespondAction::Accept, None)
        .await
        .expect_err("a second accept on an already-agreed negotiation must fail");
    assert!(matches!(err, NegotiationError::InvalidState(_)));
}

/// A negotiation whose `expires_at` has already passed transitions to
/// `expired` on the next response attempt instead of accepting it.
#[tokio::test]
async fn expired_negotiation_rejects_response_and_flips_status() {
    let pool = common::setup_test_db().await;
    let negotiations = NegotiationEngine::new(pool.clone(), common::test_config());

    let client = common::create_agent(&pool, "neg-expired-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "neg-expired-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "data entry",
            min_price: Decimal::new(10000, 2),
            max_price: Decimal::new(100000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let negotiation = negotiations
        .start(client, &service, "enter some data".to_string(), Decimal::new(20000, 2), None, None)
        .await
        .unwrap();

    sqlx::query("UPDATE negotiations SET expires_at = now() - interval '1 hour' WHERE id = $1")
        .bind(negotiation.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = negotiations
        .respond(negotiation.id, worker, RespondAction::Accept, None)
        .await
        .expect_err("response to an expired negotiation must fail");
    assert!(matches!(err, NegotiationError::Expired(_)));

    let reloaded = negotiations.get(negotiation.id).await.unwrap();
    assert_eq!(reloaded.status, NegotiationStatus::Expired);
}
