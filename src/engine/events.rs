//! Lifecycle event types
//!
//! Subscribers (resolvers, UI) drain a broadcast channel of these events.
//! Ordering is preserved per order; slow subscribers may observe lag but the
//! engine never blocks on them.

use ethers::types::{Address, U256};
use serde::Serialize;
use uuid::Uuid;

/// Events emitted by the order lifecycle engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    OrderAnnounced {
        order_id: Uuid,
        merkle_root: [u8; 32],
        start_price: U256,
        end_price: U256,
    },

    AuctionTick {
        order_id: Uuid,
        price: U256,
    },

    OrderDepositing {
        order_id: Uuid,
        price: U256,
        picker: Option<Address>,
    },

    EscrowCreated {
        order_id: Uuid,
        chain_id: u64,
        address: Address,
    },

    SecretRevealed {
        order_id: Uuid,
        index: usize,
    },

    OrderCompleted {
        order_id: Uuid,
        tx_hashes: Vec<String>,
        execution_secs: u64,
    },

    OrderRecovering {
        order_id: Uuid,
        reason: String,
    },

    OrderRecovered {
        order_id: Uuid,
    },

    OrderFailed {
        order_id: Uuid,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            LifecycleEvent::OrderAnnounced { order_id, .. } => *order_id,
            LifecycleEvent::AuctionTick { order_id, .. } => *order_id,
            LifecycleEvent::OrderDepositing { order_id, .. } => *order_id,
            LifecycleEvent::EscrowCreated { order_id, .. } => *order_id,
            LifecycleEvent::SecretRevealed { order_id, .. } => *order_id,
            LifecycleEvent::OrderCompleted { order_id, .. } => *order_id,
            LifecycleEvent::OrderRecovering { order_id, .. } => *order_id,
            LifecycleEvent::OrderRecovered { order_id } => *order_id,
            LifecycleEvent::OrderFailed { order_id, .. } => *order_id,
        }
    }

    /// Event name for metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::OrderAnnounced { .. } => "order_announced",
            LifecycleEvent::AuctionTick { .. } => "auction_tick",
            LifecycleEvent::OrderDepositing { .. } => "order_depositing",
            LifecycleEvent::EscrowCreated { .. } => "escrow_created",
            LifecycleEvent::SecretRevealed { .. } => "secret_revealed",
            LifecycleEvent::OrderCompleted { .. } => "order_completed",
            LifecycleEvent::OrderRecovering { .. } => "order_recovering",
            LifecycleEvent::OrderRecovered { .. } => "order_recovered",
            LifecycleEvent::OrderFailed { .. } => "order_failed",
        }
    }
}
