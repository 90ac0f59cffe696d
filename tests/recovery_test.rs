mod common;

use common::{MockClient, clients, eventually, stored_deal};
use std::sync::Arc;
use std::time::Duration;
use xswap::application::recovery::SwapRecovery;
use xswap::domain::deal::{SwapClientType, SwapDeal, SwapFailureReason, SwapPhase, SwapState};
use xswap::domain::ports::{DealStore, PaymentStatus, RecoveryTracker};
use xswap::domain::preimage::generate_preimage_and_hash;
use xswap::infrastructure::in_memory::InMemoryDealStore;

struct Fixture {
    recovery: SwapRecovery,
    store: InMemoryDealStore,
    btc: Arc<MockClient>,
    ltc: Arc<MockClient>,
    weth: Arc<MockClient>,
}

fn fixture(interval: Duration) -> Fixture {
    let btc = MockClient::new(SwapClientType::Lnd, 40, 10.0);
    let ltc = MockClient::new(SwapClientType::Lnd, 40, 2.5);
    let weth = MockClient::new(SwapClientType::Raiden, 100, 0.25);
    let store = InMemoryDealStore::new();
    let recovery = SwapRecovery::new(
        clients(&btc, &ltc, &weth),
        Arc::new(store.clone()),
        interval,
    );
    Fixture {
        recovery,
        store,
        btc,
        ltc,
        weth,
    }
}

/// A maker deal paying LTC and receiving BTC, stuck while paying.
fn paying_deal() -> (String, SwapDeal) {
    let (r_preimage, r_hash) = generate_preimage_and_hash();
    (
        r_preimage,
        stored_deal(&r_hash, SwapPhase::SendingPayment, SwapState::Active),
    )
}

#[tokio::test]
async fn test_succeeded_payment_settles_invoice() {
    let f = fixture(Duration::from_secs(60));
    let (r_preimage, deal) = paying_deal();
    let preimage = r_preimage.clone();
    f.ltc
        .configure(|b| b.lookup = Ok(PaymentStatus::Succeeded(preimage)));

    f.recovery.recover_deal(deal.clone()).await;

    assert_eq!(f.btc.settled(), vec![(deal.r_hash.clone(), r_preimage.clone())]);
    assert!(!f.recovery.is_pending(&deal.r_hash).await);
    let stored = f.store.get_deal(&deal.r_hash).await.unwrap().unwrap();
    assert_eq!(stored.state, SwapState::Recovered);
    assert_eq!(stored.r_preimage, Some(r_preimage));
    assert!(f.recovery.take_recovered(&deal.r_hash).await.is_none());
}

#[tokio::test]
async fn test_failed_payment_releases_invoice() {
    let f = fixture(Duration::from_secs(60));
    let (_, deal) = paying_deal();
    f.ltc.configure(|b| b.lookup = Ok(PaymentStatus::Failed));

    f.recovery.recover_deal(deal.clone()).await;

    assert_eq!(f.btc.removed_invoices(&deal.r_hash), 1);
    let stored = f.store.get_deal(&deal.r_hash).await.unwrap().unwrap();
    assert_eq!(stored.state, SwapState::Error);
    assert_eq!(
        stored.failure_reason,
        Some(SwapFailureReason::SendPaymentFailure)
    );
    assert!(f.recovery.pending_hashes().await.is_empty());
}

#[tokio::test]
async fn test_pending_payment_is_checked_again() {
    let f = fixture(Duration::from_secs(60));
    let (r_preimage, deal) = paying_deal();

    f.recovery.recover_deal(deal.clone()).await;
    assert!(f.recovery.is_pending(&deal.r_hash).await);
    assert!(f.store.get_deal(&deal.r_hash).await.unwrap().is_none());

    let preimage = r_preimage.clone();
    f.ltc
        .configure(|b| b.lookup = Ok(PaymentStatus::Succeeded(preimage)));
    f.recovery.check_pending().await;

    assert!(!f.recovery.is_pending(&deal.r_hash).await);
    assert_eq!(f.btc.settled().len(), 1);
}

#[tokio::test]
async fn test_unsettled_invoice_stays_pending() {
    let f = fixture(Duration::from_secs(60));
    let (r_preimage, deal) = paying_deal();
    f.ltc
        .configure(|b| b.lookup = Ok(PaymentStatus::Succeeded(r_preimage)));
    f.btc.configure(|b| {
        b.settle_error = Some(xswap::error::ClientError::Disconnected)
    });

    f.recovery.recover_deal(deal.clone()).await;
    assert!(f.recovery.is_pending(&deal.r_hash).await);
}

#[tokio::test]
async fn test_deal_interrupted_before_paying_fails() {
    let f = fixture(Duration::from_secs(60));
    let (_, r_hash) = generate_preimage_and_hash();
    let deal = stored_deal(&r_hash, SwapPhase::SwapAccepted, SwapState::Active);

    f.recovery.recover_deal(deal).await;

    let stored = f.store.get_deal(&r_hash).await.unwrap().unwrap();
    assert_eq!(stored.state, SwapState::Error);
    assert_eq!(stored.failure_reason, Some(SwapFailureReason::UnknownError));
    assert_eq!(f.btc.removed_invoices(&r_hash), 1);
    assert!(
        f.ltc
            .calls()
            .iter()
            .all(|call| !matches!(call, common::ClientCall::LookupPayment(_)))
    );
}

#[tokio::test]
async fn test_token_network_preimage_waits_for_resolve() {
    let f = fixture(Duration::from_secs(60));
    let (r_preimage, r_hash) = generate_preimage_and_hash();
    let mut deal = stored_deal(&r_hash, SwapPhase::SendingPayment, SwapState::Active);
    deal.pair_id = "WETH/BTC".to_string();
    deal.maker_currency = "WETH".to_string();
    deal.taker_currency = "BTC".to_string();
    let preimage = r_preimage.clone();
    f.btc
        .configure(|b| b.lookup = Ok(PaymentStatus::Succeeded(preimage)));

    f.recovery.recover_deal(deal).await;

    assert!(f.weth.settled().is_empty());
    assert!(!f.recovery.is_pending(&r_hash).await);
    let recovered = f.recovery.take_recovered(&r_hash).await.unwrap();
    assert_eq!(recovered.r_preimage, Some(r_preimage));
    assert!(f.recovery.take_recovered(&r_hash).await.is_none());
}

#[tokio::test]
async fn test_started_tracker_polls_pending_deals() {
    let f = fixture(Duration::from_millis(20));
    let (_, deal) = paying_deal();
    f.recovery.recover_deal(deal.clone()).await;
    assert!(f.recovery.is_pending(&deal.r_hash).await);

    f.recovery.start().await;
    f.ltc.configure(|b| b.lookup = Ok(PaymentStatus::Failed));

    let recovery = &f.recovery;
    let r_hash = deal.r_hash.as_str();
    assert!(eventually(move || async move { !recovery.is_pending(r_hash).await }).await);
    f.recovery.stop().await;

    let stored = f.store.get_deal(r_hash).await.unwrap().unwrap();
    assert_eq!(stored.state, SwapState::Error);
}
