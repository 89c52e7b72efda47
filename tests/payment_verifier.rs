mod common;

use agent_marketplace_core::chain_adapter::{Log, MockChainAdapter, Receipt};
use agent_marketplace_core::event_bus::EventBus;
use agent_marketplace_core::ledger::Ledger;
use agent_marketplace_core::models::TransactionType;
use agent_marketplace_core::verifier::{PaymentVerifier, VerifyError, VerifyRequest};
use rust_decimal::Decimal;
use std::sync::Arc;

const TOKEN: &str = "0x036cbd53842c5426634e7929541ec2318f3dcf7e";
const TX_HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn transfer_log(to: &str, raw_value: u64) -> Log {
    Log {
        address: TOKEN.to_string(),
        topics: vec![
            agent_marketplace_core::chain_adapter::TRANSFER_EVENT_TOPIC0.to_string(),
            format!("0x000000000000000000000000{}", "1111111111111111111111111111111111111111"),
            format!("0x000000000000000000000000{}", to.trim_start_matches("0x")),
        ],
        data: format!("0x{:064x}", raw_value),
    }
}

fn platform_config() -> agent_marketplace_core::config::AppConfig {
    let mut config = common::test_config();
    config.platform_token_address = TOKEN.to_string();
    config
}

#[tokio::test]
async fn verify_and_credit_tops_up_available_balance() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let config = platform_config();
    let chain = Arc::new(MockChainAdapter::new());
    chain.script_decimals(TOKEN, 6);
    chain.script_receipt(
        TX_HASH,
        Receipt {
            success: true,
            block_number: 100,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            logs: vec![transfer_log(&config.platform_wallet_address, 100_000_000)],
        },
    );
    let verifier = PaymentVerifier::new(pool.clone(), ledger, chain.clone() as Arc<dyn agent_marketplace_core::chain_adapter::ChainAdapter>, config, events);

    let agent = common::create_agent(&pool, "verify-topup-agent", Decimal::ZERO).await;

    let new_balance = verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(100, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: agent,
            transaction_type: TransactionType::TopUp,
            recipient_agent_id: None,
            token_address: None,
        })
        .await
        .expect("verification should succeed");
    assert_eq!(new_balance, Decimal::new(100, 0));

    let (available, _) = common::agent_balances(&pool, agent).await;
    assert_eq!(available, Decimal::new(100, 0));
}

/// Submitting the same `tx_hash` twice must credit exactly once; the second
/// call observes `AlreadyProcessed` and the balance is not double-counted.
#[tokio::test]
async fn replaying_a_credited_transaction_is_rejected() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let config = platform_config();
    let chain = Arc::new(MockChainAdapter::new());
    chain.script_decimals(TOKEN, 6);
    chain.script_receipt(
        TX_HASH,
        Receipt {
            success: true,
            block_number: 100,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            logs: vec![transfer_log(&config.platform_wallet_address, 50_000_000)],
        },
    );
    let verifier = PaymentVerifier::new(
        pool.clone(),
        ledger,
        chain.clone() as Arc<dyn agent_marketplace_core::chain_adapter::ChainAdapter>,
        config,
        events,
    );

    let agent = common::create_agent(&pool, "verify-replay-agent", Decimal::ZERO).await;

    verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(50, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: agent,
            transaction_type: TransactionType::TopUp,
            recipient_agent_id: None,
            token_address: None,
        })
        .await
        .expect("first verification should succeed");

    let err = verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(50, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: agent,
            transaction_type: TransactionType::TopUp,
            recipient_agent_id: None,
            token_address: None,
        })
        .await
        .expect_err("replaying a credited tx_hash must fail");
    assert!(matches!(err, VerifyError::AlreadyProcessed(_)));

    let (available, _) = common::agent_balances(&pool, agent).await;
    assert_eq!(available, Decimal::new(50, 0));
}

/// An on-chain transfer whose amount doesn't match what was claimed fails
/// verification and the transaction is recorded `failed`, never credited.
#[tokio::test]
async fn mismatched_amount_fails_verification() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let config = platform_config();
    let chain = Arc::new(MockChainAdapter::new());
    chain.script_decimals(TOKEN, 6);
    chain.script_receipt(
        TX_HASH,
        Receipt {
            success: true,
            block_number: 100,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            logs: vec![transfer_log(&config.platform_wallet_address, 1_000_000)],
        },
    );
    let verifier = PaymentVerifier::new(
        pool.clone(),
        ledger,
        chain.clone() as Arc<dyn agent_marketplace_core::chain_adapter::ChainAdapter>,
        config,
        events,
    );

    let agent = common::create_agent(&pool, "verify-amount-agent", Decimal::ZERO).await;

    let err = verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(999, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: agent,
            transaction_type: TransactionType::TopUp,
            recipient_agent_id: None,
            token_address: None,
        })
        .await
        .expect_err("mismatched transfer amount must fail verification");
    assert!(matches!(err, VerifyError::VerificationFailed(_)));

    let (available, _) = common::agent_balances(&pool, agent).await;
    assert_eq!(available, Decimal::ZERO);

    let status: String = sqlx::query_scalar("SELECT status FROM payment_transactions WHERE tx_hash = $1")
        .bind(TX_HASH)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "failed");
}

/// A p2p payment to a recipient with a wallet on file verifies against
/// that wallet address and credits the recipient, not the sender.
#[tokio::test]
async fn p2p_payment_credits_recipient_wallet() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let config = platform_config();
    let recipient_wallet = "0x3333333333333333333333333333333333333333";
    let chain = Arc::new(MockChainAdapter::new());
    chain.script_decimals(TOKEN, 6);
    chain.script_receipt(
        TX_HASH,
        Receipt {
            success: true,
            block_number: 100,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            logs: vec![transfer_log(recipient_wallet, 25_000_000)],
        },
    );
    let verifier = PaymentVerifier::new(
        pool.clone(),
        ledger,
        chain.clone() as Arc<dyn agent_marketplace_core::chain_adapter::ChainAdapter>,
        config,
        events,
    );

    let sender = common::create_agent(&pool, "verify-p2p-success-sender", Decimal::ZERO).await;
    let recipient =
        common::create_agent_with_wallet(&pool, "verify-p2p-success-recipient", Decimal::ZERO, recipient_wallet)
            .await;

    let new_balance = verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(25, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: sender,
            transaction_type: TransactionType::P2p,
            recipient_agent_id: Some(recipient),
            token_address: None,
        })
        .await
        .expect("p2p verification should succeed");
    assert_eq!(new_balance, Decimal::new(25, 0));

    let (sender_available, _) = common::agent_balances(&pool, sender).await;
    let (recipient_available, _) = common::agent_balances(&pool, recipient).await;
    assert_eq!(sender_available, Decimal::ZERO);
    assert_eq!(recipient_available, Decimal::new(25, 0));
}

/// A p2p payment requires the recipient agent to have a wallet address on
/// file; without one the transaction never reaches the chain adapter.
#[tokio::test]
async fn p2p_payment_without_recipient_wallet_is_rejected() {
    let pool = common::setup_test_db().await;
    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();
    let config = platform_config();
    let chain: Arc<dyn agent_marketplace_core::chain_adapter::ChainAdapter> =
        Arc::new(MockChainAdapter::new());
    let verifier = PaymentVerifier::new(pool.clone(), ledger, chain, config, events);

    let sender = common::create_agent(&pool, "verify-p2p-sender", Decimal::ZERO).await;
    let recipient = common::create_agent(&pool, "verify-p2p-recipient", Decimal::ZERO).await;

    let err = verifier
        .verify_and_credit(VerifyRequest {
            tx_hash: TX_HASH.to_string(),
            expected_amount: Decimal::new(10, 0),
            currency: "AGNT".to_string(),
            initiator_agent_id: sender,
            transaction_type: TransactionType::P2p,
            recipient_agent_id: Some(recipient),
            token_address: None,
        })
        .await
        .expect_err("p2p payment to a walletless recipient must fail");
    assert!(matches!(err, VerifyError::InvalidInput(_)));
}
