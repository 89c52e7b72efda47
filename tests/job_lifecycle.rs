mod common;

use agent_marketplace_core::event_bus::EventBus;
use agent_marketplace_core::job::{JobError, JobStateMachine};
use agent_marketplace_core::ledger::Ledger;
use agent_marketplace_core::models::{JobStatus, PricingSource};
use agent_marketplace_core::negotiation::{NegotiationEngine, RespondAction};
use rust_decimal::Decimal;
use serde_json::json;

/// Negotiate a price, hire against it, run the job to completion, and check
/// that balances and reputation land where the settlement math says they
/// should.
#[tokio::test]
async fn happy_path_settles_balances_and_reputation() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let negotiations = NegotiationEngine::new(pool.clone(), common::test_config());
    let jobs = JobStateMachine::new(pool.clone(), ledger.clone(), events.clone(), "AGNT".to_string());

    let client = common::create_agent(&pool, "job-happy-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "job-happy-worker", Decimal::ZERO).await;
    let service = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "ghostwriting",
            min_price: Decimal::new(100000, 2),
            max_price: Decimal::new(500000, 2),
            allow_negotiation: true,
        },
    )
    .await;
    let service = common::load_service(&pool, service).await;

    let negotiation = negotiations
        .start(client, &service, "write a whitepaper".to_string(), Decimal::new(200000, 2), None, None)
        .await
        .expect("negotiation should start");

    let negotiation = negotiations
        .respond(
            negotiation.id,
            worker,
            RespondAction::Counter { new_price: Decimal::new(300000, 2) },
            None,
        )
        .await
        .expect("worker counter should be accepted");
    assert_eq!(negotiation.round_count, 2);

    let negotiation = negotiations
        .respond(negotiation.id, client, RespondAction::Accept, None)
        .await
        .expect("client accept should be accepted");
    assert_eq!(negotiation.current_price, Decimal::new(300000, 2));

    let job = jobs
        .create(
            client,
            &service,
            None,
            json!({"brief": "10 pages"}),
            None,
            PricingSource::Negotiation { negotiation_id: negotiation.id },
        )
        .await
        .expect("job should be created and funded");
    assert_eq!(job.price, Decimal::new(300000, 2));
    assert_eq!(job.status, JobStatus::Pending);

    let (client_available, client_escrow) = common::agent_balances(&pool, client).await;
    assert_eq!(client_available, Decimal::new(700000, 2));
    assert_eq!(client_escrow, Decimal::new(300000, 2));

    let job = jobs.start(job.id, worker).await.expect("worker should start job");
    assert_eq!(job.status, JobStatus::InProgress);

    let job = jobs
        .deliver(job.id, worker, "text".to_string(), json!({"result": "draft"}), None)
        .await
        .expect("worker should deliver");
    assert_eq!(job.status, JobStatus::Delivered);

    let job = jobs
        .complete(job.id, client, 5, Some("excellent work".to_string()))
        .await
        .expect("client should complete job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rating, Some(5));

    let (client_available, client_escrow) = common::agent_balances(&pool, client).await;
    let (worker_available, _) = common::agent_balances(&pool, worker).await;
    assert_eq!(client_escrow, Decimal::ZERO);
    assert_eq!(client_available, Decimal::new(700000, 2));
    assert_eq!(worker_available, Decimal::new(300000, 2));

    let (worker_score, worker_jobs_completed) = common::agent_reputation(&pool, worker).await;
    assert_eq!(worker_jobs_completed, 1);
    assert_eq!(worker_score, Decimal::from(5));
}

/// A pending job can be cancelled by the client and its escrow refunded in
/// full; a started job cannot be cancelled at all.
#[tokio::test]
async fn cancel_refunds_escrow_and_only_works_while_pending() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let jobs = JobStateMachine::new(pool.clone(), ledger.clone(), events.clone(), "AGNT".to_string());

    let client = common::create_agent(&pool, "job-cancel-client", Decimal::new(500000, 2)).await;
    let worker = common::create_agent(&pool, "job-cancel-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "logo design",
            min_price: Decimal::new(50000, 2),
            max_price: Decimal::new(150000, 2),
            allow_negotiation: false,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let job = jobs
        .create(client, &service, None, json!({}), None, PricingSource::Midpoint)
        .await
        .expect("job should be created");
    let expected_price = service.midpoint_price();
    assert_eq!(job.price, expected_price);

    let (available, escrow) = common::agent_balances(&pool, client).await;
    assert_eq!(available, Decimal::new(500000, 2) - expected_price);
    assert_eq!(escrow, expected_price);

    let job = jobs.cancel(job.id, client).await.expect("pending job should cancel");
    assert_eq!(job.status, JobStatus::Cancelled);

    let (available, escrow) = common::agent_balances(&pool, client).await;
    assert_eq!(available, Decimal::new(500000, 2));
    assert_eq!(escrow, Decimal::ZERO);

    // A second job, started this time, must reject cancellation outright.
    let job2 = jobs
        .create(client, &service, None, json!({}), None, PricingSource::Midpoint)
        .await
        .expect("second job should be created");
    jobs.start(job2.id, worker).await.expect("worker starts job2");

    let err = jobs
        .cancel(job2.id, client)
        .await
        .expect_err("cancelling an in-progress job must fail");
    assert!(matches!(err, JobError::InvalidState(_)));
}

/// Creating a job against a service priced beyond the client's available
/// balance must leave no job row and no escrow movement behind.
#[tokio::test]
async fn create_fails_cleanly_when_client_cannot_cover_price() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let jobs = JobStateMachine::new(pool.clone(), ledger.clone(), events.clone(), "AGNT".to_string());

    let client = common::create_agent(&pool, "job-poor-client", Decimal::new(1000, 2)).await;
    let worker = common::create_agent(&pool, "job-poor-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "audit",
            min_price: Decimal::new(500000, 2),
            max_price: Decimal::new(900000, 2),
            allow_negotiation: false,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let err = jobs
        .create(client, &service, None, json!({}), None, PricingSource::Midpoint)
        .await
        .expect_err("job creation should fail for insufficient funds");
    assert!(matches!(err, JobError::Ledger(_)));

    let (available, escrow) = common::agent_balances(&pool, client).await;
    assert_eq!(available, Decimal::new(1000, 2));
    assert_eq!(escrow, Decimal::ZERO);

    let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM jobs WHERE client_agent_id = $1")
        .bind(client)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

/// A job created against a parent whose own ancestor chain is corrupted
/// into a cycle is rejected rather than walked forever.
#[tokio::test]
async fn rejects_parent_job_with_cyclic_ancestor_chain() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let jobs = JobStateMachine::new(pool.clone(), ledger.clone(), events.clone(), "AGNT".to_string());

    let client = common::create_agent(&pool, "job-cycle-client", Decimal::new(1000000, 2)).await;
    let worker = common::create_agent(&pool, "job-cycle-worker", Decimal::ZERO).await;
    let service_id = common::create_service(
        &pool,
        common::ServiceSpec {
            owner: worker,
            name: "research",
            min_price: Decimal::new(10000, 2),
            max_price: Decimal::new(20000, 2),
            allow_negotiation: false,
        },
    )
    .await;
    let service = common::load_service(&pool, service_id).await;

    let job_a = jobs
        .create(client, &service, None, json!({}), None, PricingSource::Midpoint)
        .await
        .expect("job a should be created");
    let job_b = jobs
        .create(client, &service, None, json!({}), Some(job_a.id), PricingSource::Midpoint)
        .await
        .expect("job b should be created with job a as parent");

    // Corrupt the chain directly: point job_a's parent at job_b, forming a cycle.
    sqlx::query("UPDATE jobs SET parent_job_id = $1 WHERE id = $2")
        .bind(job_b.id)
        .bind(job_a.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = jobs
        .create(client, &service, None, json!({}), Some(job_b.id), PricingSource::Midpoint)
        .await
        .expect_err("a cyclic ancestor chain must be rejected");
    assert!(matches!(err, JobError::InvalidInput(_)));
}
