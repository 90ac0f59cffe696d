use crate::application::timers::DealTimers;
use crate::config::EngineConfig;
use crate::domain::amounts::{calculate_maker_taker_amounts, split_pair_id};
use crate::domain::deal::{
    ResolveRequest, SanitySwap, SwapDeal, SwapEvent, SwapFailureReason, SwapPhase, SwapRole,
    SwapState, SwapSuccess, now_millis,
};
use crate::domain::lock::calculate_lock_buffer;
use crate::domain::order::{OrderToAccept, OwnOrder, PeerOrder};
use crate::domain::packets::{
    Packet, PacketBody, PacketType, SanitySwapInit, SwapAccepted, SwapComplete, SwapFailed,
    SwapRequest,
};
use crate::domain::ports::{
    CurrencyClientRef, CurrencyClients, DealStoreRef, PeerPoolRef, PeerRef, RecoveryTrackerRef,
    ReputationEvent, ReputationSinkRef,
};
use crate::domain::preimage::generate_preimage_and_hash;
use crate::error::{ClientError, PeerError, Result, SwapError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

type SwapOutcome = std::result::Result<SwapSuccess, SwapFailureReason>;

const FAILED_DEALS_CAPACITY: usize = 1024;

/// Deals that failed before they were ever persisted, oldest evicted first.
#[derive(Default)]
struct FailedDeals {
    order: VecDeque<String>,
    deals: HashMap<String, SwapDeal>,
}

impl FailedDeals {
    fn insert(&mut self, deal: SwapDeal) {
        let r_hash = deal.r_hash.clone();
        if self.deals.insert(r_hash.clone(), deal).is_none() {
            self.order.push_back(r_hash);
        }
        while self.order.len() > FAILED_DEALS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.deals.remove(&oldest);
            }
        }
    }
}

struct Inner {
    config: EngineConfig,
    clients: CurrencyClients,
    pool: PeerPoolRef,
    store: DealStoreRef,
    reputation: ReputationSinkRef,
    recovery: RecoveryTrackerRef,
    /// Active deals only. A deal leaves this table when it completes, fails
    /// or is handed to recovery.
    deals: Mutex<HashMap<String, SwapDeal>>,
    sanity_swaps: Mutex<HashMap<String, SanitySwap>>,
    used_hashes: Mutex<HashSet<String>>,
    failed_deals: Mutex<FailedDeals>,
    /// Callers of `execute_swap` waiting on the outcome of their hash.
    waiters: Mutex<HashMap<String, oneshot::Sender<SwapOutcome>>>,
    deal_timers: Mutex<DealTimers>,
    sanity_timers: Mutex<DealTimers>,
    events: mpsc::UnboundedSender<SwapEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SwapEvent>>>,
}

/// Drives swap deals from creation to completion or failure.
///
/// `SwapEngine` is cheap to clone; clones share the same deal table. Locks on
/// internal state are never held across a call to a collaborator, so slow
/// clients or peers only stall the deal they are working on.
#[derive(Clone)]
pub struct SwapEngine {
    inner: Arc<Inner>,
}

impl SwapEngine {
    pub fn new(
        config: EngineConfig,
        clients: CurrencyClients,
        pool: PeerPoolRef,
        store: DealStoreRef,
        reputation: ReputationSinkRef,
        recovery: RecoveryTrackerRef,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                clients,
                pool,
                store,
                reputation,
                recovery,
                deals: Mutex::new(HashMap::new()),
                sanity_swaps: Mutex::new(HashMap::new()),
                used_hashes: Mutex::new(HashSet::new()),
                failed_deals: Mutex::new(FailedDeals::default()),
                waiters: Mutex::new(HashMap::new()),
                deal_timers: Mutex::new(DealTimers::new()),
                sanity_timers: Mutex::new(DealTimers::new()),
                events,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Starts the recovery tracker and reloads persisted deals.
    ///
    /// Every stored hash is retired, and deals still marked active are handed
    /// to recovery since their in-flight state was lost.
    pub async fn start(&self) -> Result<()> {
        self.inner.recovery.start().await;

        let deals = self.inner.store.all_deals().await?;
        let mut interrupted = Vec::new();
        {
            let mut used_hashes = self.inner.used_hashes.lock().await;
            for deal in deals {
                used_hashes.insert(deal.r_hash.clone());
                if deal.state == SwapState::Active {
                    interrupted.push(deal);
                }
            }
        }

        info!(interrupted = interrupted.len(), "swap engine started");
        for deal in interrupted {
            self.inner.recovery.recover_deal(deal).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.inner.recovery.stop().await;
        self.inner.deal_timers.lock().await.cancel_all();
        self.inner.sanity_timers.lock().await.cancel_all();
        info!("swap engine stopped");
    }

    /// Takes the receiver of swap outcome events. Only the first call gets it.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<SwapEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    /// Checks that both currencies of the pair have a connected client.
    pub fn is_pair_supported(&self, pair_id: &str) -> bool {
        match split_pair_id(pair_id) {
            Ok((base, quote)) => [base, quote]
                .iter()
                .all(|currency| self.client(currency).is_some_and(|c| c.is_connected())),
            Err(_) => false,
        }
    }

    pub async fn get_deal(&self, r_hash: &str) -> Option<SwapDeal> {
        self.inner.deals.lock().await.get(r_hash).cloned()
    }

    /// A deal that failed before it was persisted.
    pub async fn get_failed_deal(&self, r_hash: &str) -> Option<SwapDeal> {
        self.inner.failed_deals.lock().await.deals.get(r_hash).cloned()
    }

    pub async fn active_deal_count(&self) -> usize {
        self.inner.deals.lock().await.len()
    }

    pub async fn sanity_swap_count(&self) -> usize {
        self.inner.sanity_swaps.lock().await.len()
    }

    pub async fn pending_swap_hashes(&self) -> Vec<String> {
        self.inner.recovery.pending_hashes().await
    }

    fn client(&self, currency: &str) -> Option<&CurrencyClientRef> {
        self.inner.clients.get(currency)
    }

    // ---- taker ----

    /// Swaps against a remote maker order and waits for the outcome.
    ///
    /// Fails with [`SwapError::SwapFailed`] and no deal created when the pair
    /// is unsupported or no route to the maker exists. Otherwise resolves once
    /// the deal for the generated hash completes or fails.
    pub async fn execute_swap(&self, maker: PeerOrder, taker: OwnOrder) -> Result<SwapSuccess> {
        let peer = self.verify_execution(&maker, &taker).await?;
        let (r_hash, outcome) = self.begin_swap(&maker, &taker, peer).await?;

        match outcome.await {
            Ok(Ok(success)) => Ok(success),
            Ok(Err(reason)) => Err(SwapError::SwapFailed(reason)),
            Err(_) => Err(SwapError::InternalError(Box::new(std::io::Error::other(
                format!("outcome channel for deal {r_hash} closed"),
            )))),
        }
    }

    async fn verify_execution(&self, maker: &PeerOrder, taker: &OwnOrder) -> Result<PeerRef> {
        if maker.pair_id != taker.pair_id || !self.is_pair_supported(&maker.pair_id) {
            return Err(SwapError::SwapFailed(SwapFailureReason::SwapClientNotSetup));
        }

        let quantity = maker.quantity.min(taker.quantity);
        let amounts = calculate_maker_taker_amounts(
            &self.inner.config,
            quantity,
            maker.price,
            maker.is_buy,
            &maker.pair_id,
        )?;
        let client = self
            .client(&amounts.maker_currency)
            .ok_or(SwapError::SwapFailed(SwapFailureReason::SwapClientNotSetup))?;

        let peer = self
            .inner
            .pool
            .get_peer(&maker.peer_pub_key)
            .ok_or_else(|| PeerError::Disconnected(maker.peer_pub_key.clone()))?;
        let destination = peer
            .get_identifier(client.client_type(), &amounts.maker_currency)
            .ok_or(SwapError::SwapFailed(SwapFailureReason::SwapClientNotSetup))?;

        match client
            .get_route(amounts.maker_units, &destination, &amounts.maker_currency, None)
            .await
        {
            Ok(Some(_)) => Ok(peer),
            Ok(None) => Err(SwapError::SwapFailed(SwapFailureReason::NoRouteFound)),
            Err(err) => {
                warn!(currency = %amounts.maker_currency, error = %err, "route lookup failed");
                Err(SwapError::SwapFailed(SwapFailureReason::UnexpectedClientError))
            }
        }
    }

    async fn begin_swap(
        &self,
        maker: &PeerOrder,
        taker: &OwnOrder,
        peer: PeerRef,
    ) -> Result<(String, oneshot::Receiver<SwapOutcome>)> {
        let quantity = maker.quantity.min(taker.quantity);
        let amounts = calculate_maker_taker_amounts(
            &self.inner.config,
            quantity,
            maker.price,
            maker.is_buy,
            &maker.pair_id,
        )?;
        let (Some(maker_client), Some(taker_client)) = (
            self.client(&amounts.maker_currency),
            self.client(&amounts.taker_currency),
        ) else {
            return Err(SwapError::SwapFailed(SwapFailureReason::SwapClientNotSetup));
        };

        let (r_preimage, r_hash) = generate_preimage_and_hash();
        let request = SwapRequest {
            r_hash: r_hash.clone(),
            taker_cltv_delta: taker_client.final_lock(),
            order_id: maker.id.clone(),
            pair_id: maker.pair_id.clone(),
            proposed_quantity: quantity,
        };
        let deal = SwapDeal {
            r_hash: r_hash.clone(),
            r_preimage: Some(r_preimage),
            role: SwapRole::Taker,
            phase: SwapPhase::SwapCreated,
            state: SwapState::Active,
            pair_id: maker.pair_id.clone(),
            order_id: maker.id.clone(),
            local_id: taker.local_id.clone(),
            proposed_quantity: quantity,
            quantity,
            price: maker.price,
            is_buy: maker.is_buy,
            maker_currency: amounts.maker_currency.clone(),
            taker_currency: amounts.taker_currency,
            maker_amount: amounts.maker_amount,
            taker_amount: amounts.taker_amount,
            maker_units: amounts.maker_units,
            taker_units: amounts.taker_units,
            taker_cltv_delta: request.taker_cltv_delta,
            maker_cltv_delta: None,
            taker_max_time_lock: None,
            destination: peer.get_identifier(maker_client.client_type(), &amounts.maker_currency),
            peer_pub_key: peer.node_pub_key(),
            create_time: now_millis(),
            execute_time: None,
            complete_time: None,
            failure_reason: None,
            error_message: None,
        };

        if !self.reserve_hash(&r_hash).await {
            return Err(SwapError::SwapFailed(SwapFailureReason::PaymentHashReuse));
        }
        let (waiter, outcome) = oneshot::channel();
        self.inner.waiters.lock().await.insert(r_hash.clone(), waiter);
        self.insert_deal(deal).await;
        self.arm_deal_timer(
            &r_hash,
            self.inner.config.swap_accept_timeout(),
            SwapFailureReason::DealTimedOut,
        )
        .await;

        if !self.is_pair_supported(&maker.pair_id) {
            self.fail_deal(&r_hash, SwapFailureReason::SwapClientNotSetup, None)
                .await?;
            return Err(SwapError::SwapFailed(SwapFailureReason::SwapClientNotSetup));
        }

        // Requested before the packet leaves so an immediate answer finds the
        // deal in the phase it expects.
        self.set_deal_phase(&r_hash, SwapPhase::SwapRequested).await?;
        if let Err(err) = peer
            .send_packet(Packet::new(PacketBody::SwapRequest(request)))
            .await
        {
            self.fail_deal(&r_hash, SwapFailureReason::UnknownError, Some(err.to_string()))
                .await?;
            return Err(err.into());
        }

        info!(r_hash = %r_hash, peer = %maker.peer_pub_key, "swap requested");
        Ok((r_hash, outcome))
    }

    /// Handles the maker's acceptance of one of our swap requests.
    pub async fn handle_swap_accepted(&self, body: SwapAccepted, peer: PeerRef) -> Result<()> {
        let r_hash = body.r_hash.as_str();
        let Some(deal) = self.get_deal(r_hash).await else {
            warn!(r_hash, "received swap accepted for unknown deal");
            return Ok(());
        };
        if deal.phase != SwapPhase::SwapRequested {
            warn!(r_hash, phase = ?deal.phase, "received swap accepted for deal not in SwapRequested");
            return Ok(());
        }

        self.arm_deal_timer(
            r_hash,
            self.inner.config.swap_complete_timeout(),
            SwapFailureReason::SwapTimedOut,
        )
        .await;

        if body.quantity == 0 {
            return self
                .fail_and_notify(
                    r_hash,
                    &peer,
                    SwapFailureReason::InvalidSwapPacketReceived,
                    "accepted quantity must be a positive number",
                    None,
                )
                .await;
        }
        if body.quantity > deal.proposed_quantity {
            return self
                .fail_and_notify(
                    r_hash,
                    &peer,
                    SwapFailureReason::InvalidSwapPacketReceived,
                    "accepted quantity should not be greater than proposed quantity",
                    None,
                )
                .await;
        }
        let reduced = if body.quantity < deal.proposed_quantity {
            Some(calculate_maker_taker_amounts(
                &self.inner.config,
                body.quantity,
                deal.price,
                deal.is_buy,
                &deal.pair_id,
            )?)
        } else {
            None
        };

        let updated = self
            .update_deal(r_hash, |deal| {
                deal.maker_cltv_delta = Some(body.maker_cltv_delta);
                deal.quantity = body.quantity;
                if let Some(amounts) = &reduced {
                    deal.maker_amount = amounts.maker_amount;
                    deal.maker_units = amounts.maker_units;
                    deal.taker_amount = amounts.taker_amount;
                    deal.taker_units = amounts.taker_units;
                }
                deal.clone()
            })
            .await;
        let Some(deal) = updated else {
            return Ok(());
        };

        let (Some(maker_client), Some(taker_client)) = (
            self.client(&deal.maker_currency).cloned(),
            self.client(&deal.taker_currency).cloned(),
        ) else {
            error!(r_hash, "missing currency client for accepted deal");
            return Ok(());
        };

        if let Err(err) = taker_client
            .add_invoice(r_hash, deal.taker_units, Some(deal.taker_cltv_delta))
            .await
        {
            return self
                .fail_and_notify(
                    r_hash,
                    &peer,
                    SwapFailureReason::UnexpectedClientError,
                    &err.to_string(),
                    None,
                )
                .await;
        }

        let deal = self.set_deal_phase(r_hash, SwapPhase::SendingPayment).await?;
        match maker_client.send_payment(&deal).await {
            Ok(_) => {
                self.apply_phase(
                    r_hash,
                    SwapPhase::PaymentReceived,
                    Some(SwapPhase::SendingPayment),
                )
                .await?;
                self.set_deal_phase(r_hash, SwapPhase::SwapCompleted).await?;
                let complete = Packet::new(PacketBody::SwapComplete(SwapComplete {
                    r_hash: r_hash.to_string(),
                }));
                peer.send_packet(complete).await?;
                Ok(())
            }
            Err(ClientError::PaymentRejected(message)) => {
                // The maker rejected the payment, so it already knows the swap failed.
                self.fail_deal(r_hash, SwapFailureReason::RemoteError, Some(message))
                    .await
            }
            Err(err) => {
                self.fail_and_notify(
                    r_hash,
                    &peer,
                    SwapFailureReason::SendPaymentFailure,
                    &err.to_string(),
                    None,
                )
                .await
            }
        }
    }

    // ---- maker ----

    /// Accepts a swap request against our own order.
    ///
    /// Returns `Ok(false)` when the request was rejected; the peer is told why
    /// with a `SwapFailed` packet answering `req_id`.
    pub async fn accept_deal(
        &self,
        order: OrderToAccept,
        req_id: &str,
        request: SwapRequest,
        peer: PeerRef,
    ) -> Result<bool> {
        let r_hash = request.r_hash.clone();
        debug!(r_hash = %r_hash, peer = %peer.node_pub_key(), "trying to accept deal");

        if !request.validate() {
            self.send_error_to_peer(
                &peer,
                &r_hash,
                SwapFailureReason::InvalidSwapPacketReceived,
                Some("invalid swap request".to_string()),
                Some(req_id),
            )
            .await;
            return Ok(false);
        }
        if !self.reserve_hash(&r_hash).await {
            self.send_error_to_peer(
                &peer,
                &r_hash,
                SwapFailureReason::PaymentHashReuse,
                None,
                Some(req_id),
            )
            .await;
            return Ok(false);
        }

        let amounts = match calculate_maker_taker_amounts(
            &self.inner.config,
            order.quantity,
            order.price,
            order.is_buy,
            &request.pair_id,
        ) {
            Ok(amounts) => amounts,
            Err(err) => {
                self.send_error_to_peer(
                    &peer,
                    &r_hash,
                    SwapFailureReason::SwapClientNotSetup,
                    Some(err.to_string()),
                    Some(req_id),
                )
                .await;
                return Ok(false);
            }
        };

        let Some(maker_client) = self.client(&amounts.maker_currency).cloned() else {
            self.send_error_to_peer(
                &peer,
                &r_hash,
                SwapFailureReason::SwapClientNotSetup,
                Some("Unsupported maker currency".to_string()),
                Some(req_id),
            )
            .await;
            return Ok(false);
        };
        let Some(taker_client) = self.client(&amounts.taker_currency).cloned() else {
            self.send_error_to_peer(
                &peer,
                &r_hash,
                SwapFailureReason::SwapClientNotSetup,
                Some("Unsupported taker currency".to_string()),
                Some(req_id),
            )
            .await;
            return Ok(false);
        };
        let Some(taker_identifier) =
            peer.get_identifier(taker_client.client_type(), &amounts.taker_currency)
        else {
            self.send_error_to_peer(
                &peer,
                &r_hash,
                SwapFailureReason::SwapClientNotSetup,
                Some(format!("peer has no {} identifier", amounts.taker_currency)),
                Some(req_id),
            )
            .await;
            return Ok(false);
        };

        let deal = SwapDeal {
            r_hash: r_hash.clone(),
            r_preimage: None,
            role: SwapRole::Maker,
            phase: SwapPhase::SwapCreated,
            state: SwapState::Active,
            pair_id: request.pair_id.clone(),
            order_id: request.order_id.clone(),
            local_id: order.local_id.clone(),
            proposed_quantity: request.proposed_quantity,
            quantity: order.quantity,
            price: order.price,
            is_buy: order.is_buy,
            maker_currency: amounts.maker_currency.clone(),
            taker_currency: amounts.taker_currency.clone(),
            maker_amount: amounts.maker_amount,
            taker_amount: amounts.taker_amount,
            maker_units: amounts.maker_units,
            taker_units: amounts.taker_units,
            taker_cltv_delta: request.taker_cltv_delta,
            maker_cltv_delta: None,
            taker_max_time_lock: None,
            destination: Some(taker_identifier.clone()),
            peer_pub_key: peer.node_pub_key(),
            create_time: now_millis(),
            execute_time: None,
            complete_time: None,
            failure_reason: None,
            error_message: None,
        };
        self.insert_deal(deal).await;
        self.arm_deal_timer(
            &r_hash,
            self.inner.config.swap_complete_timeout(),
            SwapFailureReason::SwapTimedOut,
        )
        .await;

        if !self.is_pair_supported(&request.pair_id) {
            self.fail_and_notify(
                &r_hash,
                &peer,
                SwapFailureReason::SwapClientNotSetup,
                "swap clients are not connected",
                Some(req_id),
            )
            .await?;
            return Ok(false);
        }

        let route = match taker_client
            .get_route(
                amounts.taker_units,
                &taker_identifier,
                &amounts.taker_currency,
                Some(request.taker_cltv_delta),
            )
            .await
        {
            Ok(Some(route)) => route,
            Ok(None) => {
                self.fail_and_notify(
                    &r_hash,
                    &peer,
                    SwapFailureReason::NoRouteFound,
                    "Unable to find route to destination",
                    Some(req_id),
                )
                .await?;
                return Ok(false);
            }
            Err(err) => {
                self.fail_and_notify(
                    &r_hash,
                    &peer,
                    SwapFailureReason::UnexpectedClientError,
                    &err.to_string(),
                    Some(req_id),
                )
                .await?;
                return Ok(false);
            }
        };

        let height = match taker_client.get_height().await {
            Ok(height) => height,
            Err(err) => {
                self.fail_and_notify(
                    &r_hash,
                    &peer,
                    SwapFailureReason::UnexpectedClientError,
                    &format!("Unable to fetch block height: {err}"),
                    Some(req_id),
                )
                .await?;
                return Ok(false);
            }
        };

        let mut maker_cltv_delta = 0;
        if height > 0 {
            let route_lock_duration = route.total_time_lock.saturating_sub(height);
            let taker_max_time_lock = route_lock_duration + taker_client.final_lock();
            let lock_buffer = calculate_lock_buffer(
                taker_max_time_lock,
                taker_client.minutes_per_block(),
                maker_client.minutes_per_block(),
                self.inner.config.lock_buffer_quantile,
            );
            maker_cltv_delta = lock_buffer + maker_client.final_lock();
            debug!(
                r_hash = %r_hash,
                route_lock_duration,
                lock_buffer,
                maker_cltv_delta,
                "calculated lock delta for final hop to maker"
            );
            self.update_deal(&r_hash, |deal| {
                deal.taker_max_time_lock = Some(taker_max_time_lock);
                deal.maker_cltv_delta = Some(maker_cltv_delta);
            })
            .await;
        }

        if maker_cltv_delta == 0 {
            self.fail_and_notify(
                &r_hash,
                &peer,
                SwapFailureReason::UnexpectedClientError,
                "Could not calculate makerCltvDelta.",
                Some(req_id),
            )
            .await?;
            return Ok(false);
        }

        if let Err(err) = maker_client
            .add_invoice(&r_hash, amounts.maker_units, Some(maker_cltv_delta))
            .await
        {
            self.fail_and_notify(
                &r_hash,
                &peer,
                SwapFailureReason::UnexpectedClientError,
                &format!("could not add invoice while accepting deal: {err}"),
                Some(req_id),
            )
            .await?;
            return Ok(false);
        }

        self.set_deal_phase(&r_hash, SwapPhase::SwapAccepted).await?;

        let accepted = PacketBody::SwapAccepted(SwapAccepted {
            r_hash: r_hash.clone(),
            maker_cltv_delta,
            quantity: request.proposed_quantity,
        });
        peer.send_packet(Packet::response(accepted, req_id)).await?;
        info!(r_hash = %r_hash, peer = %peer.node_pub_key(), maker_cltv_delta, "deal accepted");
        Ok(true)
    }

    pub async fn handle_swap_complete(&self, body: SwapComplete) -> Result<()> {
        if self.get_deal(&body.r_hash).await.is_none() {
            error!(r_hash = %body.r_hash, "received swap complete for unknown deal");
            return Ok(());
        }
        self.set_deal_phase(&body.r_hash, SwapPhase::SwapCompleted)
            .await?;
        Ok(())
    }

    /// Records a failure reported by the peer.
    ///
    /// For a deal that already left memory, the peer's reason is appended to
    /// the stored deal if we had failed it on their behalf.
    pub async fn handle_swap_failed(&self, body: SwapFailed) -> Result<()> {
        let r_hash = body.r_hash.as_str();
        if self.get_deal(r_hash).await.is_some() {
            return self
                .fail_deal(r_hash, body.failure_reason, body.error_message)
                .await;
        }

        match self.inner.store.get_deal(r_hash).await? {
            Some(mut stored)
                if stored.state == SwapState::Error
                    && stored.failure_reason == Some(SwapFailureReason::RemoteError) =>
            {
                let message = format!(
                    "{:?} - {}",
                    body.failure_reason,
                    body.error_message.as_deref().unwrap_or_default()
                );
                stored.append_error(&message);
                self.inner.store.save_deal(stored).await?;
            }
            Some(_) => warn!(r_hash, "received unexpected swap failed packet"),
            None => warn!(r_hash, "received swap failed packet for unknown deal"),
        }
        Ok(())
    }

    /// Dispatches a packet received from `peer`.
    pub async fn handle_packet(&self, packet: Packet, peer: PeerRef) -> Result<()> {
        match packet.body {
            PacketBody::SwapAccepted(mut body) => {
                body.r_hash.make_ascii_lowercase();
                self.handle_swap_accepted(body, peer).await
            }
            PacketBody::SwapComplete(mut body) => {
                body.r_hash.make_ascii_lowercase();
                self.handle_swap_complete(body).await
            }
            PacketBody::SwapFailed(mut body) => {
                body.r_hash.make_ascii_lowercase();
                self.handle_swap_failed(body).await
            }
            PacketBody::SanitySwapInit(body) => {
                self.handle_sanity_swap_init(&packet.header.id, body, peer)
                    .await
            }
            PacketBody::SwapRequest(_) | PacketBody::SanitySwapAck => {
                debug!(id = %packet.header.id, "packet is handled outside the dispatcher");
                Ok(())
            }
        }
    }

    // ---- hash resolution ----

    /// Called by the payment layer when a hold payment for `r_hash` arrives on
    /// an invoice-settling network. Resolves the preimage, settles the invoice
    /// and marks the payment received.
    pub async fn handle_htlc_accepted(
        &self,
        currency: &str,
        r_hash: &str,
        amount: u128,
    ) -> Result<()> {
        let r_hash = r_hash.to_ascii_lowercase();
        let r_hash = r_hash.as_str();
        let client = self
            .client(currency)
            .cloned()
            .ok_or_else(|| SwapError::UnsupportedCurrency(currency.to_string()))?;

        let preimage = match self.resolve_hash(r_hash, amount, Some(currency)).await {
            Ok(preimage) => preimage,
            Err(err) => {
                error!(r_hash, error = %err, "could not resolve hash for incoming htlc");
                return Err(err);
            }
        };
        client.settle_invoice(r_hash, &preimage).await?;

        if self.get_deal(r_hash).await.is_some()
            && let Some(deal) = self
                .apply_phase(
                    r_hash,
                    SwapPhase::PaymentReceived,
                    Some(SwapPhase::SendingPayment),
                )
                .await?
            && deal.role == SwapRole::Maker
        {
            self.arm_completion_timer(r_hash).await;
        }
        Ok(())
    }

    /// Returns the preimage for an incoming payment to `r_hash`.
    ///
    /// As maker this pays the taker on the other leg first. A payment whose
    /// outcome is unknown withdraws the deal and hands it to recovery.
    pub async fn resolve_hash(
        &self,
        r_hash: &str,
        amount: u128,
        currency: Option<&str>,
    ) -> Result<String> {
        let r_hash = r_hash.to_ascii_lowercase();
        let r_hash = r_hash.as_str();
        let Some(deal) = self.get_deal(r_hash).await else {
            if amount == 1 {
                return self.resolve_sanity_swap(r_hash, amount, currency).await;
            }
            return Err(SwapError::PaymentHashNotFound(r_hash.to_string()));
        };

        let expected = deal.inbound_currency();
        if let Some(received) = currency.filter(|c| *c != expected) {
            return Err(SwapError::CurrencyMismatch {
                expected: expected.to_string(),
                received: received.to_string(),
            });
        }

        if deal.role == SwapRole::Taker {
            debug!(r_hash, "resolving hash as taker");
            return deal
                .r_preimage
                .ok_or_else(|| SwapError::MissingPreimage(r_hash.to_string()));
        }

        debug!(r_hash, "resolving hash as maker");
        let client = self
            .client(&deal.taker_currency)
            .cloned()
            .ok_or_else(|| SwapError::UnsupportedCurrency(deal.taker_currency.clone()))?;
        let deal = self.set_deal_phase(r_hash, SwapPhase::SendingPayment).await?;

        match client.send_payment(&deal).await {
            Ok(preimage) => {
                self.update_deal(r_hash, |deal| deal.r_preimage = Some(preimage.clone()))
                    .await;
                Ok(preimage)
            }
            Err(err @ ClientError::UnknownPayment(_)) => {
                let taken = self
                    .take_deal_if(r_hash, |deal| deal.phase == SwapPhase::SendingPayment)
                    .await;
                if let Some(deal) = taken {
                    self.escalate_to_recovery(deal, SwapFailureReason::UnknownError)
                        .await;
                }
                Err(err.into())
            }
            Err(err) => {
                let peer_pub_key = deal.peer_pub_key.clone();
                self.fail_deal(
                    r_hash,
                    SwapFailureReason::SendPaymentFailure,
                    Some(err.to_string()),
                )
                .await?;
                if let Some(peer) = self.inner.pool.get_peer(&peer_pub_key) {
                    self.send_error_to_peer(
                        &peer,
                        r_hash,
                        SwapFailureReason::SendPaymentFailure,
                        Some(err.to_string()),
                        None,
                    )
                    .await;
                }
                Err(err.into())
            }
        }
    }

    /// Answers a preimage request from a token-network client.
    pub async fn handle_resolve_request(&self, request: ResolveRequest) -> Result<String> {
        let r_hash = request.r_hash.to_ascii_lowercase();
        let r_hash = r_hash.as_str();
        debug!(r_hash, amount = %request.amount, "handling resolve request");

        if let Some(mut recovered) = self.inner.recovery.take_recovered(r_hash).await
            && let Some(preimage) = recovered.r_preimage.clone()
        {
            recovered.state = SwapState::Recovered;
            if let Err(err) = self.inner.store.save_deal(recovered).await {
                error!(r_hash, error = %err, "could not persist recovered deal");
            }
            info!(r_hash, "returning recovered preimage");
            return Ok(preimage);
        }

        let Some(deal) = self.get_deal(r_hash).await else {
            if self.inner.recovery.is_pending(r_hash).await {
                return Err(SwapError::PaymentPending(r_hash.to_string()));
            }
            let probing = self.inner.sanity_swaps.lock().await.contains_key(r_hash);
            if probing {
                return self.resolve_hash(r_hash, request.amount, None).await;
            }
            return match self.inner.store.get_deal(r_hash).await? {
                Some(SwapDeal {
                    r_preimage: Some(preimage),
                    ..
                }) => Ok(preimage),
                _ => Err(SwapError::PaymentHashNotFound(r_hash.to_string())),
            };
        };

        if let Err(message) = self.validate_resolve_request(&deal, &request) {
            error!(r_hash, %message, "invalid resolve request");
            self.fail_deal(
                r_hash,
                SwapFailureReason::InvalidResolveRequest,
                Some(message.clone()),
            )
            .await?;
            if let Some(peer) = self.inner.pool.get_peer(&deal.peer_pub_key) {
                self.send_error_to_peer(
                    &peer,
                    r_hash,
                    SwapFailureReason::InvalidResolveRequest,
                    Some(message.clone()),
                    None,
                )
                .await;
            }
            return Err(SwapError::InvalidResolveRequest(r_hash.to_string(), message));
        }

        let preimage = self.resolve_hash(r_hash, request.amount, None).await?;
        let deal = self
            .set_deal_phase(r_hash, SwapPhase::PaymentReceived)
            .await?;
        if deal.role == SwapRole::Maker {
            self.arm_completion_timer(r_hash).await;
        }
        debug!(r_hash, "resolve request answered");
        Ok(preimage)
    }

    fn validate_resolve_request(
        &self,
        deal: &SwapDeal,
        request: &ResolveRequest,
    ) -> std::result::Result<(), String> {
        let (expected_amount, source, destination) = match deal.role {
            SwapRole::Maker => {
                let lock_expiration_delta =
                    i128::from(request.expiration) - i128::from(request.chain_height);
                let minimum = i128::from(deal.maker_cltv_delta.unwrap_or_default())
                    - i128::from(self.inner.config.lock_expiration_slippage);
                if minimum > lock_expiration_delta {
                    return Err("Insufficient CLTV received on first leg".to_string());
                }
                (deal.maker_units, "Taker", "Maker")
            }
            SwapRole::Taker => (deal.taker_units, "Maker", "Taker"),
        };

        let expected_token = self.inner.config.token_address(deal.inbound_currency());
        match expected_token {
            Some(expected) if expected.eq_ignore_ascii_case(&request.token_address) => {}
            _ => {
                return Err(format!(
                    "Token address {} did not match {}",
                    request.token_address,
                    expected_token.unwrap_or("none")
                ));
            }
        }

        if request.amount < expected_amount {
            return Err(format!(
                "Amount sent from {source} to {destination} is too small"
            ));
        }
        Ok(())
    }

    // ---- sanity swaps ----

    /// Probes whether a payment of the smallest unit of `currency` can flow to
    /// `peer` and back.
    pub async fn execute_sanity_swap(&self, currency: &str, peer: PeerRef) -> bool {
        let Some(client) = self.client(currency).cloned() else {
            return false;
        };
        let Some(destination) = peer.get_identifier(client.client_type(), currency) else {
            return false;
        };

        let (r_preimage, r_hash) = generate_preimage_and_hash();
        let peer_pub_key = peer.node_pub_key();
        self.inner.sanity_swaps.lock().await.insert(
            r_hash.clone(),
            SanitySwap {
                r_hash: r_hash.clone(),
                currency: currency.to_string(),
                peer_pub_key: peer_pub_key.clone(),
                r_preimage: Some(r_preimage),
            },
        );
        self.arm_sanity_timer(&r_hash, self.inner.config.sanity_swap_complete_timeout())
            .await;

        let init = Packet::new(PacketBody::SanitySwapInit(SanitySwapInit {
            currency: currency.to_string(),
            r_hash: r_hash.clone(),
        }));
        let init_id = init.header.id.clone();
        let init_timeout = self.inner.config.sanity_swap_init_timeout();
        let initiated = tokio::try_join!(
            async {
                client
                    .add_invoice(&r_hash, 1, None)
                    .await
                    .map_err(SwapError::from)
            },
            async { peer.send_packet(init).await.map_err(SwapError::from) },
            async {
                peer.wait_for_response(&init_id, PacketType::SanitySwapAck, init_timeout)
                    .await
                    .map_err(SwapError::from)
            },
        );
        if let Err(err) = initiated {
            warn!(currency, r_hash = %r_hash, error = %err, "sanity swap could not be initiated");
            self.drop_sanity_swap(&r_hash).await;
            return false;
        }

        match client
            .send_smallest_amount(&r_hash, &destination, currency)
            .await
        {
            Ok(_) => {
                debug!(currency, peer = %peer_pub_key, r_hash = %r_hash, "sanity swap succeeded");
                self.inner.sanity_timers.lock().await.cancel(&r_hash);
                self.inner.sanity_swaps.lock().await.remove(&r_hash);
                true
            }
            Err(err) => {
                warn!(currency, peer = %peer_pub_key, r_hash = %r_hash, error = %err, "sanity swap payment failed");
                self.drop_sanity_swap(&r_hash).await;
                false
            }
        }
    }

    /// Responds to a peer's sanity swap init with a matching invoice.
    pub async fn handle_sanity_swap_init(
        &self,
        req_id: &str,
        body: SanitySwapInit,
        peer: PeerRef,
    ) -> Result<()> {
        let SanitySwapInit { currency, r_hash } = body;
        let Some(client) = self.client(&currency).cloned() else {
            warn!(currency = %currency, "received sanity swap for unsupported currency");
            return Ok(());
        };

        self.inner.sanity_swaps.lock().await.insert(
            r_hash.clone(),
            SanitySwap {
                r_hash: r_hash.clone(),
                currency: currency.clone(),
                peer_pub_key: peer.node_pub_key(),
                r_preimage: None,
            },
        );
        if let Err(err) = client.add_invoice(&r_hash, 1, None).await {
            error!(r_hash = %r_hash, error = %err, "could not add invoice for sanity swap");
            self.inner.sanity_swaps.lock().await.remove(&r_hash);
            return Ok(());
        }

        self.arm_sanity_timer(&r_hash, self.inner.config.sanity_swap_complete_timeout())
            .await;
        peer.send_packet(Packet::response(PacketBody::SanitySwapAck, req_id))
            .await?;
        Ok(())
    }

    async fn resolve_sanity_swap(
        &self,
        r_hash: &str,
        amount: u128,
        currency: Option<&str>,
    ) -> Result<String> {
        if amount != 1 {
            return Err(SwapError::InvalidSanitySwapAmount(amount));
        }

        let sanity = {
            let mut sanity_swaps = self.inner.sanity_swaps.lock().await;
            let known = sanity_swaps
                .get(r_hash)
                .ok_or_else(|| SwapError::PaymentHashNotFound(r_hash.to_string()))?;
            if let Some(received) = currency.filter(|c| *c != known.currency) {
                return Err(SwapError::CurrencyMismatch {
                    expected: known.currency.clone(),
                    received: received.to_string(),
                });
            }
            sanity_swaps
                .remove(r_hash)
                .ok_or_else(|| SwapError::PaymentHashNotFound(r_hash.to_string()))?
        };
        self.inner.sanity_timers.lock().await.cancel(r_hash);

        if let Some(preimage) = sanity.r_preimage {
            return Ok(preimage);
        }

        let client = self
            .client(&sanity.currency)
            .cloned()
            .ok_or_else(|| SwapError::UnsupportedCurrency(sanity.currency.clone()))?;
        let peer = self
            .inner
            .pool
            .get_peer(&sanity.peer_pub_key)
            .ok_or_else(|| PeerError::Disconnected(sanity.peer_pub_key.clone()))?;
        let destination = peer
            .get_identifier(client.client_type(), &sanity.currency)
            .ok_or_else(|| SwapError::UnsupportedCurrency(sanity.currency.clone()))?;

        match client
            .send_smallest_amount(r_hash, &destination, &sanity.currency)
            .await
        {
            Ok(preimage) => {
                debug!(r_hash, currency = %sanity.currency, "sanity swap resolved");
                Ok(preimage)
            }
            Err(err) => {
                warn!(r_hash, currency = %sanity.currency, error = %err, "sanity swap payment failed");
                self.remove_invoice(&sanity.currency, r_hash).await;
                Err(err.into())
            }
        }
    }

    async fn drop_sanity_swap(&self, r_hash: &str) {
        self.inner.sanity_timers.lock().await.cancel(r_hash);
        let removed = self.inner.sanity_swaps.lock().await.remove(r_hash);
        if let Some(sanity) = removed {
            self.remove_invoice(&sanity.currency, r_hash).await;
        }
    }

    async fn arm_sanity_timer(&self, r_hash: &str, delay: Duration) {
        let engine = Arc::downgrade(&self.inner);
        let key = r_hash.to_string();
        self.inner
            .sanity_timers
            .lock()
            .await
            .arm(r_hash, delay, move |generation| async move {
                if let Some(inner) = engine.upgrade() {
                    SwapEngine { inner }
                        .handle_sanity_timeout(&key, generation)
                        .await;
                }
            });
    }

    async fn handle_sanity_timeout(&self, r_hash: &str, generation: u64) {
        if !self.inner.sanity_timers.lock().await.claim(r_hash, generation) {
            return;
        }
        let removed = self.inner.sanity_swaps.lock().await.remove(r_hash);
        if let Some(sanity) = removed {
            warn!(r_hash, currency = %sanity.currency, "sanity swap timed out");
            self.remove_invoice(&sanity.currency, r_hash).await;
        }
    }

    // ---- failure ----

    /// Fails an active deal.
    ///
    /// Cancels its timer, persists it if it got past creation, releases its
    /// invoice and emits a failure event. Failing a deal that already failed
    /// appends `message` to the stored deal instead.
    pub async fn fail_deal(
        &self,
        r_hash: &str,
        reason: SwapFailureReason,
        message: Option<String>,
    ) -> Result<()> {
        let removed = self
            .take_deal_if(r_hash, |deal| deal.state == SwapState::Active)
            .await;
        match removed {
            Some(deal) => {
                self.finish_failed_deal(deal, reason, message).await;
                Ok(())
            }
            None => self.fold_stored_failure(r_hash, message.as_deref()).await,
        }
    }

    async fn finish_failed_deal(
        &self,
        mut deal: SwapDeal,
        reason: SwapFailureReason,
        message: Option<String>,
    ) {
        let r_hash = deal.r_hash.clone();
        match &message {
            Some(message) => debug!(r_hash = %r_hash, ?reason, %message, "deal failed"),
            None => debug!(r_hash = %r_hash, ?reason, "deal failed"),
        }

        self.inner.deal_timers.lock().await.cancel(&r_hash);
        deal.state = SwapState::Error;
        deal.complete_time = Some(now_millis());
        deal.failure_reason = Some(reason);
        deal.error_message = message;

        self.penalize(&deal, reason).await;
        if deal.phase.is_initial() {
            self.inner.failed_deals.lock().await.insert(deal.clone());
        } else if let Err(err) = self.inner.store.save_deal(deal.clone()).await {
            error!(r_hash = %r_hash, error = %err, "could not persist failed deal");
        }
        self.remove_invoice(deal.inbound_currency(), &r_hash).await;
        self.notify_failed(deal, reason).await;
    }

    async fn fold_stored_failure(&self, r_hash: &str, message: Option<&str>) -> Result<()> {
        if let Some(deal) = self.inner.failed_deals.lock().await.deals.get_mut(r_hash) {
            if let Some(message) = message {
                deal.append_error(message);
            }
            debug!(r_hash, error_message = ?deal.error_message, "folded repeated failure");
            return Ok(());
        }

        let mut deal = self
            .inner
            .store
            .get_deal(r_hash)
            .await?
            .ok_or_else(|| SwapError::DealNotFound(r_hash.to_string()))?;
        match deal.state {
            SwapState::Error => {
                if let Some(message) = message {
                    deal.append_error(message);
                    self.inner.store.save_deal(deal.clone()).await?;
                }
                debug!(r_hash, error_message = ?deal.error_message, "folded repeated failure");
                Ok(())
            }
            SwapState::Completed => Err(SwapError::DealCompleted(r_hash.to_string())),
            SwapState::Active | SwapState::Recovered => {
                Err(SwapError::DealNotActive(r_hash.to_string()))
            }
        }
    }

    async fn penalize(&self, deal: &SwapDeal, reason: SwapFailureReason) {
        let reputation = &self.inner.reputation;
        let node = deal.peer_pub_key.as_str();
        match reason {
            SwapFailureReason::SwapTimedOut
            | SwapFailureReason::SendPaymentFailure
            | SwapFailureReason::NoRouteFound
            | SwapFailureReason::SwapClientNotSetup => {
                if reason == SwapFailureReason::SwapTimedOut {
                    reputation
                        .add_reputation_event(node, ReputationEvent::SwapTimeout)
                        .await;
                }
                match self.inner.pool.get_peer(node) {
                    Some(peer) => peer.deactivate_pair(&deal.pair_id).await,
                    None => debug!(peer = node, pair_id = %deal.pair_id, "could not drop trading pair"),
                }
                reputation
                    .add_reputation_event(node, ReputationEvent::SwapFailure)
                    .await;
            }
            SwapFailureReason::InvalidResolveRequest
            | SwapFailureReason::DealTimedOut
            | SwapFailureReason::InvalidSwapPacketReceived
            | SwapFailureReason::PaymentHashReuse => {
                reputation
                    .add_reputation_event(node, ReputationEvent::SwapMisbehavior)
                    .await;
            }
            SwapFailureReason::UnexpectedClientError
            | SwapFailureReason::RemoteError
            | SwapFailureReason::UnknownError => {}
        }
    }

    async fn fail_and_notify(
        &self,
        r_hash: &str,
        peer: &PeerRef,
        reason: SwapFailureReason,
        message: &str,
        req_id: Option<&str>,
    ) -> Result<()> {
        self.fail_deal(r_hash, reason, Some(message.to_string()))
            .await?;
        self.send_error_to_peer(peer, r_hash, reason, Some(message.to_string()), req_id)
            .await;
        Ok(())
    }

    async fn send_error_to_peer(
        &self,
        peer: &PeerRef,
        r_hash: &str,
        reason: SwapFailureReason,
        message: Option<String>,
        req_id: Option<&str>,
    ) {
        let body = PacketBody::SwapFailed(SwapFailed {
            r_hash: r_hash.to_string(),
            failure_reason: reason,
            error_message: message,
        });
        let packet = match req_id {
            Some(req_id) => Packet::response(body, req_id),
            None => Packet::new(body),
        };
        debug!(r_hash, ?reason, peer = %peer.node_pub_key(), "sending swap error to peer");
        if let Err(err) = peer.send_packet(packet).await {
            warn!(r_hash, error = %err, "could not send swap error to peer");
        }
    }

    async fn escalate_to_recovery(&self, deal: SwapDeal, reason: SwapFailureReason) {
        let r_hash = deal.r_hash.clone();
        self.inner.deal_timers.lock().await.cancel(&r_hash);
        warn!(r_hash = %r_hash, "outcome of outgoing payment is unknown, handing deal to recovery");

        let stored = match self.inner.store.get_deal(&r_hash).await {
            Ok(Some(stored)) => stored,
            Ok(None) => deal.clone(),
            Err(err) => {
                error!(r_hash = %r_hash, error = %err, "could not load deal for recovery");
                deal.clone()
            }
        };
        self.inner.recovery.recover_deal(stored).await;
        self.notify_failed(deal, reason).await;
    }

    async fn remove_invoice(&self, currency: &str, r_hash: &str) {
        if let Some(client) = self.client(currency)
            && let Err(err) = client.remove_invoice(r_hash).await
        {
            warn!(r_hash, currency, error = %err, "could not remove invoice");
        }
    }

    // ---- timers ----

    async fn arm_deal_timer(&self, r_hash: &str, delay: Duration, reason: SwapFailureReason) {
        let engine = Arc::downgrade(&self.inner);
        let key = r_hash.to_string();
        self.inner
            .deal_timers
            .lock()
            .await
            .arm(r_hash, delay, move |generation| async move {
                if let Some(inner) = engine.upgrade() {
                    SwapEngine { inner }
                        .handle_swap_timeout(&key, generation, reason)
                        .await;
                }
            });
    }

    async fn handle_swap_timeout(&self, r_hash: &str, generation: u64, reason: SwapFailureReason) {
        if !self.inner.deal_timers.lock().await.claim(r_hash, generation) {
            return;
        }
        let taken = self
            .take_deal_if(r_hash, |deal| deal.phase < SwapPhase::PaymentReceived)
            .await;
        let Some(deal) = taken else {
            return;
        };
        warn!(r_hash, phase = ?deal.phase, ?reason, "deal timed out");

        if deal.role == SwapRole::Maker && deal.phase == SwapPhase::SendingPayment {
            self.escalate_to_recovery(deal, reason).await;
            return;
        }

        let peer = self.inner.pool.get_peer(&deal.peer_pub_key);
        self.finish_failed_deal(deal, reason, None).await;
        if let Some(peer) = peer {
            self.send_error_to_peer(&peer, r_hash, reason, None, None)
                .await;
        }
    }

    /// Both legs of a maker deal in `PaymentReceived` have settled; only the
    /// taker's `SwapComplete` is outstanding.
    async fn arm_completion_timer(&self, r_hash: &str) {
        let engine = Arc::downgrade(&self.inner);
        let key = r_hash.to_string();
        self.inner.deal_timers.lock().await.arm(
            r_hash,
            self.inner.config.swap_complete_timeout(),
            move |generation| async move {
                if let Some(inner) = engine.upgrade() {
                    SwapEngine { inner }
                        .handle_completion_timeout(&key, generation)
                        .await;
                }
            },
        );
    }

    async fn handle_completion_timeout(&self, r_hash: &str, generation: u64) {
        if !self.inner.deal_timers.lock().await.claim(r_hash, generation) {
            return;
        }
        warn!(r_hash, "peer never confirmed completion, completing deal");
        if let Err(err) = self
            .apply_phase(
                r_hash,
                SwapPhase::SwapCompleted,
                Some(SwapPhase::PaymentReceived),
            )
            .await
        {
            error!(r_hash, error = %err, "could not complete deal");
        }
    }

    // ---- deal table ----

    async fn reserve_hash(&self, r_hash: &str) -> bool {
        self.inner
            .used_hashes
            .lock()
            .await
            .insert(r_hash.to_string())
    }

    async fn insert_deal(&self, deal: SwapDeal) {
        debug!(r_hash = %deal.r_hash, role = ?deal.role, pair_id = %deal.pair_id, "new deal");
        self.inner
            .deals
            .lock()
            .await
            .insert(deal.r_hash.clone(), deal);
    }

    async fn update_deal<R>(&self, r_hash: &str, update: impl FnOnce(&mut SwapDeal) -> R) -> Option<R> {
        self.inner.deals.lock().await.get_mut(r_hash).map(update)
    }

    async fn take_deal_if(
        &self,
        r_hash: &str,
        guard: impl FnOnce(&SwapDeal) -> bool,
    ) -> Option<SwapDeal> {
        let mut deals = self.inner.deals.lock().await;
        if deals.get(r_hash).is_some_and(guard) {
            deals.remove(r_hash)
        } else {
            None
        }
    }

    async fn set_deal_phase(&self, r_hash: &str, to: SwapPhase) -> Result<SwapDeal> {
        self.apply_phase(r_hash, to, None)
            .await?
            .ok_or_else(|| SwapError::DealNotFound(r_hash.to_string()))
    }

    /// Moves a deal to `to`, persisting it once past the creation phases.
    ///
    /// With `only_from`, a deal in any other phase is left untouched and
    /// `Ok(None)` is returned.
    async fn apply_phase(
        &self,
        r_hash: &str,
        to: SwapPhase,
        only_from: Option<SwapPhase>,
    ) -> Result<Option<SwapDeal>> {
        let deal = {
            let mut deals = self.inner.deals.lock().await;
            let deal = deals
                .get_mut(r_hash)
                .ok_or_else(|| SwapError::DealNotFound(r_hash.to_string()))?;
            if only_from.is_some_and(|from| from != deal.phase) {
                return Ok(None);
            }
            if deal.state != SwapState::Active {
                return Err(SwapError::DealNotActive(r_hash.to_string()));
            }
            if !SwapPhase::validate_transition(deal.role, deal.phase, to) {
                return Err(SwapError::InvalidPhaseTransition {
                    r_hash: r_hash.to_string(),
                    role: deal.role,
                    from: deal.phase,
                    to,
                });
            }

            match to {
                SwapPhase::SendingPayment => deal.execute_time = Some(now_millis()),
                SwapPhase::SwapCompleted => {
                    deal.complete_time = Some(now_millis());
                    deal.state = SwapState::Completed;
                }
                _ => {}
            }
            deal.phase = to;
            deal.clone()
        };
        debug!(r_hash, phase = ?to, "deal phase updated");

        if to == SwapPhase::SwapCompleted {
            // Both legs have settled. The outcome is reported even if the
            // write fails.
            if let Err(err) = self.inner.store.save_deal(deal.clone()).await {
                error!(r_hash, error = %err, "could not persist completed deal");
            }
            self.inner.deals.lock().await.remove(r_hash);
        } else if !to.is_initial() {
            self.inner.store.save_deal(deal.clone()).await?;
        }
        if matches!(to, SwapPhase::PaymentReceived | SwapPhase::SwapCompleted) {
            self.inner.deal_timers.lock().await.cancel(r_hash);
        }
        if to == SwapPhase::SwapCompleted {
            info!(r_hash, role = ?deal.role, peer = %deal.peer_pub_key, "swap completed");
            self.inner
                .reputation
                .add_reputation_event(&deal.peer_pub_key, ReputationEvent::SwapSuccess)
                .await;
            self.notify_paid(SwapSuccess::from(&deal)).await;
        }
        Ok(Some(deal))
    }

    async fn notify_paid(&self, success: SwapSuccess) {
        if let Some(waiter) = self.inner.waiters.lock().await.remove(&success.r_hash) {
            let _ = waiter.send(Ok(success.clone()));
        }
        let _ = self.inner.events.send(SwapEvent::Paid(success));
    }

    async fn notify_failed(&self, deal: SwapDeal, reason: SwapFailureReason) {
        if let Some(waiter) = self.inner.waiters.lock().await.remove(&deal.r_hash) {
            let _ = waiter.send(Err(reason));
        }
        let _ = self.inner.events.send(SwapEvent::Failed { deal, reason });
    }
}
