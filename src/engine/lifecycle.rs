//! Order lifecycle engine
//!
//! Drives each admitted order through Announcement -> Deposit -> Withdrawal
//! -> Recovery. One state-machine instance per order; per-order work runs as
//! spawned tasks so no order ever blocks another. Status changes go through
//! the store's compare-and-swap, which makes racing triggers (resolver pick
//! vs. auction floor, duplicate timers after retries) resolve to exactly one
//! winner.
//!
//! Phase deadlines are wall-clock timestamps computed once when the
//! preceding phase completes and never recomputed: clock drift on the
//! engine's host, not on any blockchain, governs phase timing.

use super::events::LifecycleEvent;
use crate::auction;
use crate::config::{AuctionConfig, RelayerConfig, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::gateway::{ChainManager, EscrowParams};
use crate::order::{
    EscrowLock, EscrowRef, EscrowSide, Order, OrderStatus, OrderStore, OrderSummary,
    OrderValidator, Submission,
};
use crate::secrets::{secret_index_for_fill, SecretVault};

use chrono::{Duration as ChronoDuration, Utc};
use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, sleep, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Response to a resolver pick signal. Late picks receive the same response
/// with no side effect.
#[derive(Debug, Clone, Serialize)]
pub struct PickResponse {
    pub accepted: bool,
    pub status: OrderStatus,
    pub picker: Option<Address>,
}

/// Response to a maker secret confirmation
#[derive(Debug, Clone, Serialize)]
pub struct SecretConfirmation {
    pub triggered: bool,
    pub status: OrderStatus,
}

/// Order lifecycle orchestration engine
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<OrderStore>,
    vault: Arc<SecretVault>,
    chains: Arc<ChainManager>,
    validator: Arc<OrderValidator>,
    relayer: RelayerConfig,
    auction_cfg: AuctionConfig,
    safety_deposit: U256,
    event_tx: broadcast::Sender<LifecycleEvent>,
    shutdown: Arc<RwLock<bool>>,
}

impl LifecycleEngine {
    pub fn new(chains: Arc<ChainManager>, settings: &Settings) -> RelayerResult<Self> {
        let (event_tx, _) = broadcast::channel(10_000);

        let safety_deposit = U256::from_dec_str(&settings.relayer.safety_deposit_wei)
            .map_err(|e| RelayerError::Config(format!("invalid safety_deposit_wei: {}", e)))?;

        Ok(Self {
            store: Arc::new(OrderStore::new()),
            vault: Arc::new(SecretVault::new()),
            chains,
            validator: Arc::new(OrderValidator::new(settings.relayer.check_maker_balance)),
            relayer: settings.relayer.clone(),
            auction_cfg: settings.auction.clone(),
            safety_deposit,
            event_tx,
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of one order
    pub fn order(&self, id: &Uuid) -> Option<Order> {
        self.store.get(id)
    }

    /// Summaries of all tracked orders
    pub fn orders(&self) -> Vec<OrderSummary> {
        self.store.list()
    }

    pub fn order_counts(&self) -> Vec<(OrderStatus, usize)> {
        self.store.count_by_status()
    }

    fn emit(&self, event: LifecycleEvent) {
        crate::metrics::record_lifecycle_event(event.name());
        // No receivers is fine; subscribers come and go
        let _ = self.event_tx.send(event);
    }

    /// Admission: validate a submission, generate its secret set, announce
    /// the order and start its auction. Returns the order id and the Merkle
    /// root committed at announcement.
    pub async fn submit(&self, submission: &Submission) -> RelayerResult<(Uuid, [u8; 32])> {
        let checked = self.validator.validate(submission)?;

        // Optional solvency check, through the source-chain gateway
        if self.relayer.check_maker_balance {
            let gateway = self.chains.gateway(checked.src_chain_id).await?;
            self.validator.check_solvency(&checked, gateway.as_ref()).await?;
        }

        // Base fee at announcement anchors the gas adjustment. Best effort:
        // an unreachable gateway disables adjustment rather than rejecting.
        let announcement_base_fee = if checked.gas_adjusted {
            match self.chains.gateway(checked.src_chain_id).await {
                Ok(gateway) => gateway.base_fee().await.unwrap_or_else(|e| {
                    warn!("base fee unavailable at announcement: {}", e);
                    U256::zero()
                }),
                Err(_) => U256::zero(),
            }
        } else {
            U256::zero()
        };

        let id = Uuid::new_v4();
        let merkle_root = self.vault.generate(id, checked.parts);

        let order = Order {
            id,
            content_hash: checked.content_hash,
            maker: checked.maker,
            maker_asset: checked.maker_asset,
            taker_asset: checked.taker_asset,
            maker_amount: checked.maker_amount,
            start_price: checked.start_price,
            end_price: checked.end_price,
            auction_duration_secs: checked.auction_duration_secs,
            parts: checked.parts,
            gas_adjusted: checked.gas_adjusted,
            src_chain_id: checked.src_chain_id,
            dst_chain_id: checked.dst_chain_id,
            merkle_root,
            deadline: checked.deadline,
            nonce: checked.nonce,
            signature: checked.signature,
            status: OrderStatus::Announced,
            announced_at: Utc::now(),
            announcement_base_fee,
            finality_deadline: None,
            exclusive_deadline: None,
            cancellation_deadline: None,
            src_escrow: None,
            dst_escrow: None,
            revealed_secret_index: None,
            picker: None,
            fill_pct: 100,
            completed_at: None,
            recovered_at: None,
            failure_reason: None,
        };

        if let Err(e) = self.store.insert(order) {
            self.vault.evict(&id);
            return Err(e);
        }

        info!(order_id = %id, "Order announced");
        crate::metrics::record_order_announced();
        self.emit(LifecycleEvent::OrderAnnounced {
            order_id: id,
            merkle_root,
            start_price: checked.start_price,
            end_price: checked.end_price,
        });

        let engine = self.clone();
        tokio::spawn(async move { engine.run_auction(id).await });

        Ok((id, merkle_root))
    }

    /// Resolver pick signal. First pick wins the order; repeated and late
    /// picks are answered idempotently with no side effect.
    pub async fn pick(&self, id: Uuid, resolver: Address) -> RelayerResult<PickResponse> {
        let order = self.store.get(&id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;

        if order.status != OrderStatus::Announced {
            return Ok(PickResponse {
                accepted: false,
                status: order.status,
                picker: order.picker,
            });
        }

        let winner = self.store.set_picker(&id, resolver)?;
        if winner != resolver {
            return Ok(PickResponse {
                accepted: false,
                status: order.status,
                picker: Some(winner),
            });
        }

        let elapsed = (Utc::now() - order.announced_at).num_seconds().max(0) as u64;
        let price = auction::current_price(
            order.start_price,
            order.end_price,
            elapsed,
            order.auction_duration_secs,
        );
        self.try_begin_deposit(id, price).await;

        Ok(PickResponse {
            accepted: true,
            status: self.store.status(&id).unwrap_or(order.status),
            picker: Some(resolver),
        })
    }

    /// Maker-initiated secret confirmation. Disclosure is engine-initiated
    /// by default; this is an additional explicit trigger for the same
    /// reveal path, a no-op unless the order is past finality in
    /// `EscrowsCreated`.
    pub async fn confirm_secret(&self, id: Uuid) -> RelayerResult<SecretConfirmation> {
        let order = self.store.get(&id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;

        let past_finality = order
            .finality_deadline
            .map(|d| Utc::now() >= d)
            .unwrap_or(false);

        if order.status == OrderStatus::EscrowsCreated && past_finality {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_withdrawal(id).await });
            return Ok(SecretConfirmation {
                triggered: true,
                status: order.status,
            });
        }

        Ok(SecretConfirmation {
            triggered: false,
            status: order.status,
        })
    }

    /// Recurring auction tick for one order. Exits silently as soon as the
    /// order leaves `Announced`, whoever moved it.
    async fn run_auction(&self, id: Uuid) {
        let started = Instant::now();
        let mut tick = interval(Duration::from_secs(self.auction_cfg.tick_interval_secs));
        // First tick of a tokio interval fires immediately
        tick.tick().await;

        let gateway = match self.store.get(&id) {
            Some(order) if order.gas_adjusted => {
                self.chains.gateway(order.src_chain_id).await.ok()
            }
            _ => None,
        };

        loop {
            tick.tick().await;

            if *self.shutdown.read().await {
                return;
            }

            let order = match self.store.get(&id) {
                Some(order) => order,
                None => return,
            };
            if order.status != OrderStatus::Announced {
                return;
            }

            let elapsed = started.elapsed().as_secs();
            let mut price = auction::current_price(
                order.start_price,
                order.end_price,
                elapsed,
                order.auction_duration_secs,
            );

            if order.gas_adjusted {
                let current_fee = match &gateway {
                    Some(g) => g.base_fee().await.ok(),
                    None => None,
                };
                price = auction::gas_adjusted_price(
                    price,
                    order.start_price,
                    order.end_price,
                    order.announcement_base_fee,
                    current_fee,
                    self.auction_cfg.gas_adjustment_coefficient_bps,
                    self.auction_cfg.gas_adjustment_max_bps,
                );
            }

            crate::metrics::record_auction_tick();
            self.emit(LifecycleEvent::AuctionTick {
                order_id: id,
                price,
            });

            // Floor reached: the auction itself triggers the deposit
            if elapsed >= order.auction_duration_secs || price <= order.end_price {
                debug!(order_id = %id, %price, "Auction floor reached");
                self.try_begin_deposit(id, price).await;
                return;
            }
        }
    }

    /// Announced -> Depositing, at most once per order. The CAS is the
    /// single-assignment guard: a resolver bid and an expiring auction timer
    /// racing here result in exactly one deposit attempt. `price` is the
    /// clearing price at the moment the trigger fired.
    async fn try_begin_deposit(&self, id: Uuid, price: U256) -> bool {
        if !self
            .store
            .transition(&id, OrderStatus::Announced, OrderStatus::Depositing)
        {
            return false;
        }

        let order = match self.store.get(&id) {
            Some(order) => order,
            None => return false,
        };

        info!(order_id = %id, %price, "Order depositing");
        self.emit(LifecycleEvent::OrderDepositing {
            order_id: id,
            price,
            picker: order.picker,
        });

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.deposit_phase(id, price).await {
                if e.should_alert() {
                    error!(order_id = %id, "Deposit phase failed: {}", e);
                } else {
                    warn!(order_id = %id, "Deposit phase failed: {}", e);
                }
                engine.recover(id, &e.to_string()).await;
            }
        });

        true
    }

    /// Deposit phase: create source and destination escrows sequentially,
    /// then fix the three phase deadlines and arm the finality timer.
    async fn deposit_phase(&self, id: Uuid, clearing_price: U256) -> RelayerResult<()> {
        let order = self.store.get(&id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;

        // (a) source chain escrow holding the maker's asset
        self.create_escrow_leg(&order, EscrowSide::Source, order.maker_amount)
            .await?;

        // Short settling delay before touching the second chain
        sleep(Duration::from_secs(self.relayer.settling_delay_secs)).await;

        // (b) destination chain escrow holding the counter-leg at the
        // auction's clearing price
        self.create_escrow_leg(&order, EscrowSide::Destination, clearing_price)
            .await?;

        // Three strictly increasing deadlines, computed once, never revisited
        let now = Utc::now();
        let finality = now + ChronoDuration::seconds(self.relayer.finality_lock_secs as i64);
        let exclusive =
            finality + ChronoDuration::seconds(self.relayer.exclusive_withdraw_secs as i64);
        let cancellation =
            exclusive + ChronoDuration::seconds(self.relayer.cancellation_window_secs as i64);

        self.store.with_mut(&id, |order| {
            order.finality_deadline = Some(finality);
            order.exclusive_deadline = Some(exclusive);
            order.cancellation_deadline = Some(cancellation);
        })?;

        if !self
            .store
            .transition(&id, OrderStatus::Depositing, OrderStatus::EscrowsCreated)
        {
            // Recovery got there first; its cancellation path owns the order now
            return Ok(());
        }

        // Arm the finality-lock timer
        let engine = self.clone();
        let wait = Duration::from_secs(self.relayer.finality_lock_secs);
        tokio::spawn(async move {
            sleep(wait).await;
            engine.run_withdrawal(id).await;
        });

        Ok(())
    }

    async fn create_escrow_leg(
        &self,
        order: &Order,
        side: EscrowSide,
        amount: U256,
    ) -> RelayerResult<()> {
        let chain_id = order.chain_for(side);
        let gateway = self.chains.gateway(chain_id).await?;
        let params = self.escrow_params(order, amount);

        let handle = gateway.create_escrow(&params, self.safety_deposit).await?;

        self.store.set_escrow(
            &order.id,
            side,
            EscrowRef {
                chain_id,
                address: handle.address,
                tx_hash: handle.tx_hash,
                lock: EscrowLock::Locked,
            },
        )?;

        info!(order_id = %order.id, chain_id, address = ?handle.address, "Escrow created");
        crate::metrics::record_escrow_created(chain_id);
        self.emit(LifecycleEvent::EscrowCreated {
            order_id: order.id,
            chain_id,
            address: handle.address,
        });

        Ok(())
    }

    fn escrow_params(&self, order: &Order, amount: U256) -> EscrowParams {
        let cancellation_after = order
            .cancellation_deadline
            .map(|d| d.timestamp())
            .unwrap_or_else(|| {
                let total = self.relayer.finality_lock_secs
                    + self.relayer.exclusive_withdraw_secs
                    + self.relayer.cancellation_window_secs;
                (Utc::now() + ChronoDuration::seconds(total as i64)).timestamp()
            });

        EscrowParams {
            order_hash: order.content_hash,
            hashlock_root: order.merkle_root,
            maker: order.maker,
            amount,
            cancellation_after,
        }
    }

    /// Withdrawal phase entry point, fired by the finality timer (or the
    /// maker's confirmation). Failures route to recovery; a timer that finds
    /// the order already moved on is a silent no-op.
    async fn run_withdrawal(&self, id: Uuid) {
        match self.store.status(&id) {
            Some(OrderStatus::EscrowsCreated) => {}
            // Duplicate timer or already-recovering order
            _ => return,
        }

        if let Err(e) = self.withdrawal_phase(id).await {
            warn!(order_id = %id, "Withdrawal phase failed: {}", e);
            self.recover(id, &e.to_string()).await;
        }
    }

    /// Re-verify both escrows, disclose the fill secret, then withdraw on
    /// both legs. The single built-in retry is the open withdrawal after the
    /// exclusive window elapses.
    async fn withdrawal_phase(&self, id: Uuid) -> RelayerResult<()> {
        let order = self.store.get(&id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;

        // Escrows must still exist and match the committed parameters
        for side in [EscrowSide::Source, EscrowSide::Destination] {
            let escrow = order.escrow(side).ok_or_else(|| {
                RelayerError::Internal(format!("no {:?} escrow for order {}", side, id))
            })?;
            let gateway = self.chains.gateway(escrow.chain_id).await?;
            let params = self.escrow_params(&order, order.maker_amount);
            if !gateway.verify_escrow(escrow.address, &params).await? {
                return Err(RelayerError::VerificationMismatch {
                    chain_id: escrow.chain_id,
                    address: format!("{:?}", escrow.address),
                });
            }
        }

        // Disclose the secret for the current fill percentage
        let index = secret_index_for_fill(order.fill_pct, order.parts);
        let revealed = self.vault.reveal(&id, index)?;

        if !self
            .store
            .transition(&id, OrderStatus::EscrowsCreated, OrderStatus::SecretRevealed)
        {
            return Ok(());
        }
        self.store.with_mut(&id, |order| {
            order.revealed_secret_index = Some(index);
        })?;

        info!(order_id = %id, index, "Secret revealed");
        self.emit(LifecycleEvent::SecretRevealed {
            order_id: id,
            index,
        });

        // Exclusive withdrawal attempt
        match self.withdraw_both_legs(&id, revealed.secret).await {
            Ok(tx_hashes) => {
                self.complete(id, tx_hashes)?;
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                // The one built-in retry: after the exclusive window, any
                // caller may complete the withdrawal
                warn!(
                    order_id = %id,
                    "Exclusive withdrawal failed ({}), scheduling open withdrawal", e
                );
                let engine = self.clone();
                let secret = revealed.secret;
                let wait = Duration::from_secs(self.relayer.exclusive_withdraw_secs);
                tokio::spawn(async move {
                    sleep(wait).await;
                    if engine.store.status(&id) != Some(OrderStatus::SecretRevealed) {
                        return;
                    }
                    match engine.withdraw_both_legs(&id, secret).await {
                        Ok(tx_hashes) => {
                            if let Err(e) = engine.complete(id, tx_hashes) {
                                error!(order_id = %id, "Completion failed: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!(order_id = %id, "Open withdrawal failed: {}", e);
                            engine.recover(id, &e.to_string()).await;
                        }
                    }
                });
                Ok(())
            }
            // Bookkeeping faults cannot succeed on retry; recover immediately
            Err(e) => Err(e),
        }
    }

    /// Withdraw on both chains, skipping legs already released by an earlier
    /// partial attempt. Returns the transaction hashes of all released legs.
    async fn withdraw_both_legs(&self, id: &Uuid, secret: [u8; 32]) -> RelayerResult<Vec<String>> {
        let order = self.store.get(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;

        let mut tx_hashes = Vec::new();
        for side in [EscrowSide::Destination, EscrowSide::Source] {
            let escrow = order.escrow(side).ok_or_else(|| {
                RelayerError::Internal(format!("no {:?} escrow for order {}", side, id))
            })?;
            match escrow.lock {
                EscrowLock::Released => {
                    tx_hashes.push(escrow.tx_hash.clone());
                    continue;
                }
                EscrowLock::Cancelled => {
                    return Err(RelayerError::Internal(format!(
                        "{:?} escrow for order {} already cancelled",
                        side, id
                    )));
                }
                EscrowLock::Locked => {}
            }

            let gateway = self.chains.gateway(escrow.chain_id).await?;
            let tx_hash = gateway.withdraw(escrow.address, secret).await?;
            self.store.set_escrow_lock(id, side, EscrowLock::Released)?;
            tx_hashes.push(tx_hash);
        }

        Ok(tx_hashes)
    }

    fn complete(&self, id: Uuid, tx_hashes: Vec<String>) -> RelayerResult<()> {
        if !self
            .store
            .transition(&id, OrderStatus::SecretRevealed, OrderStatus::Completed)
        {
            return Ok(());
        }

        let completed_at = Utc::now();
        let mut execution_secs = 0u64;
        self.store.with_mut(&id, |order| {
            order.completed_at = Some(completed_at);
            execution_secs = (completed_at - order.announced_at).num_seconds().max(0) as u64;
        })?;

        info!(order_id = %id, execution_secs, "Order completed");
        crate::metrics::record_order_completed(execution_secs as f64);
        self.emit(LifecycleEvent::OrderCompleted {
            order_id: id,
            tx_hashes,
            execution_secs,
        });
        Ok(())
    }

    /// Recovery: cancel whichever escrows exist. Cancellation returns funds
    /// and safety deposits to the depositing party. If cancellation itself
    /// fails the order lands on terminal `Failed` for manual intervention;
    /// it is never retried indefinitely.
    async fn recover(&self, id: Uuid, reason: &str) {
        if self.store.begin_recovery(&id, reason).is_none() {
            // Already terminal or recovering
            return;
        }

        warn!(order_id = %id, reason, "Order recovering");
        self.emit(LifecycleEvent::OrderRecovering {
            order_id: id,
            reason: reason.to_string(),
        });

        let order = match self.store.get(&id) {
            Some(order) => order,
            None => return,
        };

        let mut all_cancelled = true;
        for side in [EscrowSide::Source, EscrowSide::Destination] {
            let escrow = match order.escrow(side) {
                Some(escrow) if escrow.lock == EscrowLock::Locked => escrow.clone(),
                _ => continue,
            };

            let result = match self.chains.gateway(escrow.chain_id).await {
                Ok(gateway) => gateway.cancel(escrow.address).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(tx_hash) => {
                    debug!(order_id = %id, chain_id = escrow.chain_id, tx_hash, "Escrow cancelled");
                    crate::metrics::record_escrow_cancelled(escrow.chain_id);
                    if let Err(e) = self.store.set_escrow_lock(&id, side, EscrowLock::Cancelled) {
                        error!(order_id = %id, "Failed to record cancellation: {}", e);
                    }
                }
                Err(e) => {
                    error!(
                        order_id = %id,
                        chain_id = escrow.chain_id,
                        "Escrow cancellation failed: {}", e
                    );
                    all_cancelled = false;
                }
            }
        }

        if let Err(e) = self.store.finish_recovery(&id, all_cancelled) {
            error!(order_id = %id, "Failed to finalize recovery: {}", e);
            return;
        }
        self.vault.evict(&id);

        if all_cancelled {
            info!(order_id = %id, "Order recovered");
            crate::metrics::record_order_recovered();
            self.emit(LifecycleEvent::OrderRecovered { order_id: id });
        } else {
            let failure = RelayerError::RecoveryFailure {
                order_id: id.to_string(),
                message: reason.to_string(),
            };
            error!(order_id = %id, "{}; manual intervention required", failure);
            crate::metrics::record_order_failed();
            self.emit(LifecycleEvent::OrderFailed {
                order_id: id,
                reason: failure.to_string(),
            });
        }
    }

    /// Background maintenance loop: evict terminal orders past retention
    pub async fn run(&self) -> RelayerResult<()> {
        let mut cleanup = interval(Duration::from_secs(300));
        info!("Lifecycle engine started");

        loop {
            cleanup.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            let evicted = self.store.evict_terminal(self.relayer.retention_secs);
            for id in &evicted {
                self.vault.evict(id);
            }
            if !evicted.is_empty() {
                debug!("Evicted {} terminal orders", evicted.len());
            }
        }

        info!("Lifecycle engine stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Lifecycle engine shutdown initiated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, MetricsConfig, WalletConfig};
    use crate::gateway::{ChainGateway, EscrowHandle};
    use crate::order::validator::test_helpers::signed_submission;
    use crate::secrets::MerkleTree;

    use async_trait::async_trait;
    use sha3::{Digest, Keccak256};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Programmable in-memory gateway
    struct FakeGateway {
        chain_id: u64,
        fail_create: AtomicBool,
        /// Number of upcoming withdraw calls that fail
        fail_withdraws: AtomicUsize,
        fail_cancel: AtomicBool,
        verify_ok: AtomicBool,
        creates: AtomicUsize,
        withdraws: AtomicUsize,
        cancels: AtomicUsize,
        escrows: Mutex<HashMap<Address, [u8; 32]>>,
    }

    impl FakeGateway {
        fn new(chain_id: u64) -> Arc<Self> {
            Arc::new(Self {
                chain_id,
                fail_create: AtomicBool::new(false),
                fail_withdraws: AtomicUsize::new(0),
                fail_cancel: AtomicBool::new(false),
                verify_ok: AtomicBool::new(true),
                creates: AtomicUsize::new(0),
                withdraws: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                escrows: Mutex::new(HashMap::new()),
            })
        }

        fn err(&self, message: &str) -> RelayerError {
            RelayerError::ChainCall {
                chain_id: self.chain_id,
                message: message.to_string(),
            }
        }
    }

    #[async_trait]
    impl ChainGateway for FakeGateway {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn current_block(&self) -> RelayerResult<u64> {
            Ok(100)
        }

        async fn base_fee(&self) -> RelayerResult<U256> {
            Ok(U256::from(1_000_000_000u64))
        }

        async fn balance_of(&self, _address: Address) -> RelayerResult<U256> {
            Ok(U256::MAX)
        }

        async fn create_escrow(
            &self,
            params: &EscrowParams,
            _safety_deposit: U256,
        ) -> RelayerResult<EscrowHandle> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(self.err("create reverted"));
            }
            let address = Address::random();
            self.escrows
                .lock()
                .unwrap()
                .insert(address, params.hashlock_root);
            Ok(EscrowHandle {
                address,
                tx_hash: format!("0xcreate{}", self.chain_id),
            })
        }

        async fn verify_escrow(
            &self,
            address: Address,
            params: &EscrowParams,
        ) -> RelayerResult<bool> {
            if !self.verify_ok.load(Ordering::SeqCst) {
                return Ok(false);
            }
            Ok(self
                .escrows
                .lock()
                .unwrap()
                .get(&address)
                .map(|root| *root == params.hashlock_root)
                .unwrap_or(false))
        }

        async fn withdraw(&self, address: Address, secret: [u8; 32]) -> RelayerResult<String> {
            self.withdraws.fetch_add(1, Ordering::SeqCst);
            if self.fail_withdraws.load(Ordering::SeqCst) > 0 {
                self.fail_withdraws.fetch_sub(1, Ordering::SeqCst);
                return Err(self.err("withdraw reverted"));
            }
            if !self.escrows.lock().unwrap().contains_key(&address) {
                return Err(self.err("unknown escrow"));
            }
            let _ = secret;
            Ok(format!("0xwithdraw{}", self.chain_id))
        }

        async fn cancel(&self, address: Address) -> RelayerResult<String> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel.load(Ordering::SeqCst) {
                return Err(self.err("cancel reverted"));
            }
            self.escrows.lock().unwrap().remove(&address);
            Ok(format!("0xcancel{}", self.chain_id))
        }
    }

    fn test_settings() -> Settings {
        Settings {
            relayer: RelayerConfig {
                instance_id: "test".to_string(),
                settling_delay_secs: 1,
                finality_lock_secs: 5,
                exclusive_withdraw_secs: 10,
                cancellation_window_secs: 20,
                safety_deposit_wei: "1000".to_string(),
                check_maker_balance: false,
                retention_secs: 3600,
                health_check_interval_secs: 30,
            },
            auction: AuctionConfig {
                tick_interval_secs: 1,
                gas_adjustment_coefficient_bps: 50,
                gas_adjustment_max_bps: 200,
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 0,
            },
            chains: HashMap::new(),
            wallet: WalletConfig {
                private_key_env: None,
            },
        }
    }

    struct Harness {
        engine: LifecycleEngine,
        src: Arc<FakeGateway>,
        dst: Arc<FakeGateway>,
    }

    fn harness() -> Harness {
        let chains = Arc::new(ChainManager::new(test_settings()));
        let src = FakeGateway::new(1);
        let dst = FakeGateway::new(137);
        chains.register(src.clone());
        chains.register(dst.clone());
        let engine = LifecycleEngine::new(chains, &test_settings()).unwrap();
        Harness { engine, src, dst }
    }

    async fn settle() {
        // Paused-clock tests: sleeping past every configured window lets all
        // spawned phase tasks run to completion under auto-advance
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auction_floor_completes_order() {
        let h = harness();
        let (id, root) = h.engine.submit(&signed_submission(1)).await.unwrap();
        assert_ne!(root, [0u8; 32]);
        assert_eq!(h.engine.order(&id).unwrap().status, OrderStatus::Announced);

        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.revealed_secret_index, Some(3)); // full fill, N=4
        assert_eq!(order.src_escrow.unwrap().lock, EscrowLock::Released);
        assert_eq!(order.dst_escrow.unwrap().lock, EscrowLock::Released);
        assert_eq!(h.src.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.src.withdraws.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.withdraws.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_strictly_increasing() {
        let h = harness();
        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        let finality = order.finality_deadline.unwrap();
        let exclusive = order.exclusive_deadline.unwrap();
        let cancellation = order.cancellation_deadline.unwrap();
        assert!(finality < exclusive);
        assert!(exclusive < cancellation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revealed_secret_verifies_against_committed_root() {
        let h = harness();
        let (id, root) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        let index = order.revealed_secret_index.unwrap();
        let revealed = h.engine.vault.reveal(&id, index).unwrap();
        assert_eq!(
            revealed.leaf,
            <[u8; 32]>::from(Keccak256::digest(revealed.secret))
        );
        assert!(MerkleTree::verify(&root, &revealed.leaf, index, &revealed.proof));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_wins_before_floor() {
        let h = harness();
        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();

        let resolver = Address::random();
        let response = h.engine.pick(id, resolver).await.unwrap();
        assert!(response.accepted);

        settle().await;
        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.picker, Some(resolver));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_depositor_under_race() {
        let h = harness();
        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();

        // A resolver bid and the auction floor racing to trigger the deposit
        let e1 = h.engine.clone();
        let e2 = h.engine.clone();
        let r1 = Address::random();
        let r2 = Address::random();
        let (a, b) = tokio::join!(e1.pick(id, r1), e2.pick(id, r2));
        let accepted = [a.unwrap().accepted, b.unwrap().accepted];
        assert_eq!(accepted.iter().filter(|x| **x).count(), 1);

        settle().await;
        // One deposit attempt: one escrow per chain
        assert_eq!(h.src.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.order(&id).unwrap().status, OrderStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_pick_idempotent_rejection() {
        let h = harness();
        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;
        assert_eq!(h.engine.order(&id).unwrap().status, OrderStatus::Completed);

        let resolver = Address::random();
        let first = h.engine.pick(id, resolver).await.unwrap();
        let second = h.engine.pick(id, resolver).await.unwrap();
        assert!(!first.accepted);
        assert!(!second.accepted);
        assert_eq!(first.status, second.status);
        // No side effect on the completed order
        assert_eq!(h.engine.order(&id).unwrap().status, OrderStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_failure_cancels_source_escrow() {
        let h = harness();
        h.dst.fail_create.store(true, Ordering::SeqCst);

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Recovered);
        // Source escrow was created, then cancelled; never a one-sided lock
        assert_eq!(order.src_escrow.unwrap().lock, EscrowLock::Cancelled);
        assert!(order.dst_escrow.is_none());
        assert_eq!(h.src.cancels.load(Ordering::SeqCst), 1);
        assert!(order.failure_reason.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_mismatch_recovers_both_escrows() {
        let h = harness();
        h.src.verify_ok.store(false, Ordering::SeqCst);

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Recovered);
        assert_eq!(order.src_escrow.unwrap().lock, EscrowLock::Cancelled);
        assert_eq!(order.dst_escrow.unwrap().lock, EscrowLock::Cancelled);
        assert_eq!(h.src.withdraws.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_withdrawal_retry_after_exclusive_failure() {
        let h = harness();
        // Exclusive attempt fails on the destination leg, open retry succeeds
        h.dst.fail_withdraws.store(1, Ordering::SeqCst);

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        // Destination tried twice (exclusive + open), source once
        assert_eq!(h.dst.withdraws.load(Ordering::SeqCst), 2);
        assert_eq!(h.src.withdraws.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_withdrawal_attempts_failing_recovers() {
        let h = harness();
        h.dst.fail_withdraws.store(2, Ordering::SeqCst);

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Recovered);
        assert_eq!(h.dst.withdraws.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_failure_is_terminal_failed() {
        let h = harness();
        h.dst.fail_create.store(true, Ordering::SeqCst);
        h.src.fail_cancel.store(true, Ordering::SeqCst);
        let mut events = h.engine.subscribe();

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let order = h.engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        // Not retried indefinitely
        assert_eq!(h.src.cancels.load(Ordering::SeqCst), 1);

        let mut failure_reason = None;
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::OrderFailed { order_id, reason } = event {
                if order_id == id {
                    failure_reason = Some(reason);
                }
            }
        }
        assert!(failure_reason.unwrap().contains("Recovery failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_rejected() {
        let h = harness();
        let submission = signed_submission(42);
        h.engine.submit(&submission).await.unwrap();
        let err = h.engine.submit(&submission).await.unwrap_err();
        assert!(matches!(err, RelayerError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_sequence_happy_path() {
        let h = harness();
        let mut events = h.engine.subscribe();

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.order_id() == id && event.name() != "auction_tick" {
                names.push(event.name());
            }
        }
        assert_eq!(
            names,
            vec![
                "order_announced",
                "order_depositing",
                "escrow_created",
                "escrow_created",
                "secret_revealed",
                "order_completed",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_event_carries_reason() {
        let h = harness();
        h.dst.fail_create.store(true, Ordering::SeqCst);
        let mut events = h.engine.subscribe();

        let (id, _) = h.engine.submit(&signed_submission(1)).await.unwrap();
        settle().await;

        let mut saw_recovering = false;
        let mut saw_recovered = false;
        while let Ok(event) = events.try_recv() {
            if event.order_id() != id {
                continue;
            }
            match event {
                LifecycleEvent::OrderRecovering { reason, .. } => {
                    assert!(!reason.is_empty());
                    saw_recovering = true;
                }
                LifecycleEvent::OrderRecovered { .. } => saw_recovered = true,
                _ => {}
            }
        }
        assert!(saw_recovering && saw_recovered);
    }
}
