//! Reference recovery tracker.
//!
//! Deals whose outgoing payment has an unknown outcome are polled on an
//! interval until the outbound payment network reports a definite result.
//! A deal is only ever released once its terminal state has been persisted.

use crate::domain::deal::{SwapClientType, SwapDeal, SwapFailureReason, SwapPhase, SwapState};
use crate::domain::ports::{CurrencyClients, DealStoreRef, PaymentStatus, RecoveryTracker};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Inner {
    clients: CurrencyClients,
    store: DealStoreRef,
    interval: Duration,
    pending: Mutex<HashMap<String, SwapDeal>>,
    /// Deals whose preimage was learned but could not be settled directly;
    /// handed out on the next resolve request for their hash.
    recovered: Mutex<HashMap<String, SwapDeal>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SwapRecovery {
    inner: Arc<Inner>,
}

/// What a single recovery attempt concluded for a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Settled,
    AwaitingResolve,
    Failed,
    StillPending,
}

impl SwapRecovery {
    pub fn new(clients: CurrencyClients, store: DealStoreRef, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients,
                store,
                interval,
                pending: Mutex::new(HashMap::new()),
                recovered: Mutex::new(HashMap::new()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Runs one recovery attempt over every pending deal.
    pub async fn check_pending(&self) {
        let pending: Vec<SwapDeal> = self.inner.pending.lock().await.values().cloned().collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "checking pending swaps");
        }
        for deal in pending {
            self.check_deal(deal).await;
        }
    }

    async fn check_deal(&self, mut deal: SwapDeal) -> RecoveryOutcome {
        let r_hash = deal.r_hash.clone();
        let outcome = if deal.phase < SwapPhase::SendingPayment {
            // We never paid, so nothing can be claimed from us.
            self.release_inbound(&deal).await;
            deal.state = SwapState::Error;
            deal.failure_reason = Some(SwapFailureReason::UnknownError);
            deal.append_error("interrupted before payment was sent");
            RecoveryOutcome::Failed
        } else {
            self.check_payment(&mut deal).await
        };

        match outcome {
            RecoveryOutcome::StillPending => return outcome,
            RecoveryOutcome::AwaitingResolve => {
                self.inner.recovered.lock().await.insert(r_hash.clone(), deal.clone());
            }
            RecoveryOutcome::Settled | RecoveryOutcome::Failed => {}
        }

        if let Err(err) = self.inner.store.save_deal(deal).await {
            error!(r_hash = %r_hash, error = %err, "could not persist recovered deal");
            self.inner.recovered.lock().await.remove(&r_hash);
            return RecoveryOutcome::StillPending;
        }
        self.inner.pending.lock().await.remove(&r_hash);
        info!(r_hash = %r_hash, ?outcome, "swap recovery finished");
        outcome
    }

    async fn check_payment(&self, deal: &mut SwapDeal) -> RecoveryOutcome {
        let outbound = deal.outbound_currency().to_string();
        let Some(client) = self.inner.clients.get(&outbound) else {
            warn!(r_hash = %deal.r_hash, currency = %outbound, "no client to recover payment");
            return RecoveryOutcome::StillPending;
        };

        match client.lookup_payment(&deal.r_hash, &outbound).await {
            Ok(PaymentStatus::Succeeded(preimage)) => {
                deal.r_preimage = Some(preimage.clone());
                self.claim_inbound(deal, &preimage).await
            }
            Ok(PaymentStatus::Failed) => {
                self.release_inbound(deal).await;
                deal.state = SwapState::Error;
                deal.failure_reason = Some(SwapFailureReason::SendPaymentFailure);
                deal.append_error("payment failed during recovery");
                RecoveryOutcome::Failed
            }
            Ok(PaymentStatus::Pending) => RecoveryOutcome::StillPending,
            Err(err) => {
                warn!(r_hash = %deal.r_hash, error = %err, "could not look up payment");
                RecoveryOutcome::StillPending
            }
        }
    }

    async fn claim_inbound(&self, deal: &mut SwapDeal, preimage: &str) -> RecoveryOutcome {
        let inbound = deal.inbound_currency().to_string();
        let Some(client) = self.inner.clients.get(&inbound) else {
            warn!(r_hash = %deal.r_hash, currency = %inbound, "no client to claim inbound payment");
            return RecoveryOutcome::StillPending;
        };

        match client.client_type() {
            SwapClientType::Lnd => match client.settle_invoice(&deal.r_hash, preimage).await {
                Ok(()) => {
                    deal.state = SwapState::Recovered;
                    RecoveryOutcome::Settled
                }
                Err(err) => {
                    warn!(r_hash = %deal.r_hash, error = %err, "could not settle recovered invoice");
                    RecoveryOutcome::StillPending
                }
            },
            SwapClientType::Raiden => RecoveryOutcome::AwaitingResolve,
        }
    }

    async fn release_inbound(&self, deal: &SwapDeal) {
        if let Some(client) = self.inner.clients.get(deal.inbound_currency())
            && let Err(err) = client.remove_invoice(&deal.r_hash).await
        {
            warn!(r_hash = %deal.r_hash, error = %err, "could not remove invoice during recovery");
        }
    }
}

#[async_trait]
impl RecoveryTracker for SwapRecovery {
    async fn start(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return;
        }
        let recovery = self.clone();
        let period = self.inner.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                recovery.check_pending().await;
            }
        }));
    }

    async fn stop(&self) {
        if let Some(task) = self.inner.task.lock().await.take() {
            task.abort();
        }
    }

    async fn recover_deal(&self, deal: SwapDeal) {
        info!(r_hash = %deal.r_hash, phase = ?deal.phase, "recovering deal");
        self.inner
            .pending
            .lock()
            .await
            .insert(deal.r_hash.clone(), deal.clone());
        self.check_deal(deal).await;
    }

    async fn is_pending(&self, r_hash: &str) -> bool {
        self.inner.pending.lock().await.contains_key(r_hash)
    }

    async fn pending_hashes(&self) -> Vec<String> {
        self.inner.pending.lock().await.keys().cloned().collect()
    }

    async fn take_recovered(&self, r_hash: &str) -> Option<SwapDeal> {
        self.inner.recovered.lock().await.remove(r_hash)
    }
}
