//! In-process order store
//!
//! Arena of order records keyed by opaque ID. All mutation funnels through
//! the owning order's transition logic in the lifecycle engine; readers get
//! cloned snapshots. Status changes go through a compare-and-swap so racing
//! triggers (resolver pick vs. auction floor, duplicate timers) resolve to
//! exactly one winner without a global lock.

use super::{EscrowLock, EscrowRef, EscrowSide, Order, OrderStatus, OrderSummary};
use crate::error::{RelayerError, RelayerResult};

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

pub struct OrderStore {
    orders: DashMap<Uuid, Order>,
    /// Dedupe index: exactly one admitted order per content hash, ever
    by_content_hash: DashMap<[u8; 32], Uuid>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            by_content_hash: DashMap::new(),
        }
    }

    /// Admit a new order. Rejects a duplicate content hash even after the
    /// original order reached a terminal state.
    pub fn insert(&self, order: Order) -> RelayerResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.by_content_hash.entry(order.content_hash) {
            Entry::Occupied(_) => Err(RelayerError::Validation(format!(
                "order with content hash 0x{} already admitted",
                hex::encode(order.content_hash)
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.id);
                self.orders.insert(order.id, order);
                Ok(())
            }
        }
    }

    /// Snapshot of one order
    pub fn get(&self, id: &Uuid) -> Option<Order> {
        self.orders.get(id).map(|o| o.clone())
    }

    pub fn status(&self, id: &Uuid) -> Option<OrderStatus> {
        self.orders.get(id).map(|o| o.status)
    }

    /// Compare-and-swap the status. Returns `false` (with no side effect)
    /// when the order is not in `from`, which makes racing triggers and late
    /// timers silent no-ops. Terminal states never transition out, whatever
    /// `from` a caller claims.
    pub fn transition(&self, id: &Uuid, from: OrderStatus, to: OrderStatus) -> bool {
        match self.orders.get_mut(id) {
            Some(mut order) if order.status == from && !from.is_terminal() => {
                order.status = to;
                true
            }
            _ => false,
        }
    }

    /// Move a non-terminal order into `Recovering`. Returns the status it
    /// held before, or `None` if it was already terminal or recovering.
    pub fn begin_recovery(&self, id: &Uuid, reason: &str) -> Option<OrderStatus> {
        let mut order = self.orders.get_mut(id)?;
        if order.status.is_terminal() || order.status == OrderStatus::Recovering {
            return None;
        }
        let previous = order.status;
        order.status = OrderStatus::Recovering;
        order.failure_reason = Some(reason.to_string());
        Some(previous)
    }

    /// Finish recovery: `Recovered` when all escrows were cancelled, `Failed`
    /// when cancellation itself failed.
    pub fn finish_recovery(&self, id: &Uuid, recovered: bool) -> RelayerResult<()> {
        let mut order = self.orders.get_mut(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;
        if order.status != OrderStatus::Recovering {
            return Err(RelayerError::InvalidStateTransition {
                from: order.status.as_str().to_string(),
                to: "recovered".to_string(),
            });
        }
        order.status = if recovered {
            OrderStatus::Recovered
        } else {
            OrderStatus::Failed
        };
        order.recovered_at = Some(Utc::now());
        Ok(())
    }

    /// Record the winning resolver. At most one picker is ever stored; a
    /// second pick returns the existing one so late pickers get an
    /// idempotent response.
    pub fn set_picker(
        &self,
        id: &Uuid,
        picker: ethers::types::Address,
    ) -> RelayerResult<ethers::types::Address> {
        let mut order = self.orders.get_mut(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;
        match order.picker {
            Some(existing) => Ok(existing),
            None => {
                order.picker = Some(picker);
                Ok(picker)
            }
        }
    }

    /// Record a newly created escrow. The address is immutable once set.
    pub fn set_escrow(&self, id: &Uuid, side: EscrowSide, escrow: EscrowRef) -> RelayerResult<()> {
        let mut order = self.orders.get_mut(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;
        let slot = match side {
            EscrowSide::Source => &mut order.src_escrow,
            EscrowSide::Destination => &mut order.dst_escrow,
        };
        if slot.is_some() {
            return Err(RelayerError::Internal(format!(
                "escrow address already set for order {} ({:?} side)",
                id, side
            )));
        }
        *slot = Some(escrow);
        Ok(())
    }

    /// Mark an escrow released or cancelled. Released and cancelled are
    /// mutually exclusive for the lifetime of the escrow.
    pub fn set_escrow_lock(&self, id: &Uuid, side: EscrowSide, lock: EscrowLock) -> RelayerResult<()> {
        let mut order = self.orders.get_mut(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;
        let slot = match side {
            EscrowSide::Source => &mut order.src_escrow,
            EscrowSide::Destination => &mut order.dst_escrow,
        };
        let escrow = slot.as_mut().ok_or_else(|| {
            RelayerError::Internal(format!("no {:?} escrow recorded for order {}", side, id))
        })?;
        if escrow.lock != EscrowLock::Locked && escrow.lock != lock {
            return Err(RelayerError::Internal(format!(
                "escrow for order {} already {:?}, cannot move to {:?}",
                id, escrow.lock, lock
            )));
        }
        escrow.lock = lock;
        Ok(())
    }

    /// Apply a closure to the live record. Engine-internal; used for field
    /// updates that accompany a transition already won via CAS.
    pub fn with_mut<F>(&self, id: &Uuid, f: F) -> RelayerResult<()>
    where
        F: FnOnce(&mut Order),
    {
        let mut order = self.orders.get_mut(id).ok_or_else(|| RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })?;
        f(&mut order);
        Ok(())
    }

    /// Snapshot summaries of all orders
    pub fn list(&self) -> Vec<OrderSummary> {
        self.orders.iter().map(|o| OrderSummary::from(o.value())).collect()
    }

    /// Count of orders per status, for metrics and the status endpoint
    pub fn count_by_status(&self) -> Vec<(OrderStatus, usize)> {
        use std::collections::HashMap;
        let mut counts: HashMap<OrderStatus, usize> = HashMap::new();
        for order in self.orders.iter() {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        counts.into_iter().collect()
    }

    /// Evict terminal orders older than `retention_secs`. Returns the ids
    /// removed so callers can drop the matching secret sets.
    pub fn evict_terminal(&self, retention_secs: u64) -> Vec<Uuid> {
        let cutoff = Utc::now() - chrono::Duration::seconds(retention_secs as i64);
        let stale: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|o| {
                o.status.is_terminal()
                    && o.completed_at.or(o.recovered_at).map(|t| t < cutoff).unwrap_or(false)
            })
            .map(|o| o.id)
            .collect();

        for id in &stale {
            // Keep the content-hash index entry: duplicate admission stays
            // rejected after eviction.
            self.orders.remove(id);
        }
        stale
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, U256};

    fn test_order(content_hash: [u8; 32]) -> Order {
        Order {
            id: Uuid::new_v4(),
            content_hash,
            maker: Address::random(),
            maker_asset: "ETH".to_string(),
            taker_asset: "XLM".to_string(),
            maker_amount: U256::from(1_000_000u64),
            start_price: U256::from(100u64),
            end_price: U256::from(95u64),
            auction_duration_secs: 10,
            parts: 4,
            gas_adjusted: false,
            src_chain_id: 1,
            dst_chain_id: 137,
            merkle_root: [0u8; 32],
            deadline: Utc::now() + chrono::Duration::hours(1),
            nonce: 1,
            signature: vec![0u8; 65],
            status: OrderStatus::Announced,
            announced_at: Utc::now(),
            announcement_base_fee: U256::zero(),
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
        }
    }

    #[test]
    fn test_duplicate_content_hash_rejected() {
        let store = OrderStore::new();
        store.insert(test_order([1u8; 32])).unwrap();
        let err = store.insert(test_order([1u8; 32])).unwrap_err();
        assert!(matches!(err, RelayerError::Validation(_)));
        // Different hash admitted fine
        store.insert(test_order([2u8; 32])).unwrap();
    }

    #[test]
    fn test_transition_cas_first_wins() {
        let store = OrderStore::new();
        let order = test_order([1u8; 32]);
        let id = order.id;
        store.insert(order).unwrap();

        assert!(store.transition(&id, OrderStatus::Announced, OrderStatus::Depositing));
        // Second identical CAS loses
        assert!(!store.transition(&id, OrderStatus::Announced, OrderStatus::Depositing));
        assert_eq!(store.status(&id), Some(OrderStatus::Depositing));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let store = OrderStore::new();
        let mut order = test_order([1u8; 32]);
        order.status = OrderStatus::Completed;
        let id = order.id;
        store.insert(order).unwrap();

        // Even a CAS that names the terminal state as `from` must lose
        assert!(!store.transition(&id, OrderStatus::Completed, OrderStatus::Announced));
        assert!(!store.transition(&id, OrderStatus::Completed, OrderStatus::Recovering));
        assert!(store.begin_recovery(&id, "late failure").is_none());
        assert_eq!(store.status(&id), Some(OrderStatus::Completed));

        let mut failed = test_order([9u8; 32]);
        failed.status = OrderStatus::Failed;
        let failed_id = failed.id;
        store.insert(failed).unwrap();
        assert!(!store.transition(&failed_id, OrderStatus::Failed, OrderStatus::Announced));
        assert_eq!(store.status(&failed_id), Some(OrderStatus::Failed));
    }

    #[test]
    fn test_summaries_report_phase() {
        let store = OrderStore::new();
        let mut order = test_order([1u8; 32]);
        order.status = OrderStatus::SecretRevealed;
        store.insert(order).unwrap();

        let summary = &store.list()[0];
        assert_eq!(summary.status, OrderStatus::SecretRevealed);
        assert_eq!(summary.phase, 3);
    }

    #[test]
    fn test_escrow_address_immutable() {
        let store = OrderStore::new();
        let order = test_order([1u8; 32]);
        let id = order.id;
        store.insert(order).unwrap();

        let escrow = EscrowRef {
            chain_id: 1,
            address: Address::random(),
            tx_hash: "0xabc".to_string(),
            lock: EscrowLock::Locked,
        };
        store.set_escrow(&id, EscrowSide::Source, escrow.clone()).unwrap();
        assert!(store.set_escrow(&id, EscrowSide::Source, escrow).is_err());
    }

    #[test]
    fn test_escrow_released_and_cancelled_exclusive() {
        let store = OrderStore::new();
        let order = test_order([1u8; 32]);
        let id = order.id;
        store.insert(order).unwrap();

        store
            .set_escrow(
                &id,
                EscrowSide::Source,
                EscrowRef {
                    chain_id: 1,
                    address: Address::random(),
                    tx_hash: "0xabc".to_string(),
                    lock: EscrowLock::Locked,
                },
            )
            .unwrap();

        store.set_escrow_lock(&id, EscrowSide::Source, EscrowLock::Released).unwrap();
        assert!(store
            .set_escrow_lock(&id, EscrowSide::Source, EscrowLock::Cancelled)
            .is_err());
    }

    #[test]
    fn test_at_most_one_picker() {
        let store = OrderStore::new();
        let order = test_order([1u8; 32]);
        let id = order.id;
        store.insert(order).unwrap();

        let first = Address::random();
        let second = Address::random();
        assert_eq!(store.set_picker(&id, first).unwrap(), first);
        // Late picker gets the existing winner back, no side effect
        assert_eq!(store.set_picker(&id, second).unwrap(), first);
    }

    #[test]
    fn test_eviction_keeps_dedupe_index() {
        let store = OrderStore::new();
        let mut order = test_order([7u8; 32]);
        order.status = OrderStatus::Recovered;
        order.recovered_at = Some(Utc::now() - chrono::Duration::hours(2));
        let id = order.id;
        store.insert(order).unwrap();

        let evicted = store.evict_terminal(3600);
        assert_eq!(evicted, vec![id]);
        assert!(store.get(&id).is_none());
        assert!(store.insert(test_order([7u8; 32])).is_err());
    }
}
