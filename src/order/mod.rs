//! Order data model
//!
//! An `Order` is the unit of work: the maker's signed economic terms plus the
//! runtime state owned exclusively by the lifecycle engine. Status queries
//! always receive cloned snapshots, never references into live records.

pub mod store;
pub mod validator;

pub use store::OrderStore;
pub use validator::{OrderValidator, Submission};

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phased order status. Transitions are monotonic: the only backward-looking
/// edge is into `Recovering` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Announced,
    Depositing,
    EscrowsCreated,
    SecretRevealed,
    Completed,
    Recovering,
    Recovered,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Recovered | OrderStatus::Failed
        )
    }

    /// Phase number for subscribers: 1 announcement, 2 deposit, 3 withdrawal,
    /// 4 recovery
    pub fn phase(&self) -> u8 {
        match self {
            OrderStatus::Announced => 1,
            OrderStatus::Depositing | OrderStatus::EscrowsCreated => 2,
            OrderStatus::SecretRevealed | OrderStatus::Completed => 3,
            OrderStatus::Recovering | OrderStatus::Recovered | OrderStatus::Failed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Announced => "announced",
            OrderStatus::Depositing => "depositing",
            OrderStatus::EscrowsCreated => "escrows_created",
            OrderStatus::SecretRevealed => "secret_revealed",
            OrderStatus::Completed => "completed",
            OrderStatus::Recovering => "recovering",
            OrderStatus::Recovered => "recovered",
            OrderStatus::Failed => "failed",
        }
    }
}

/// Lock status of one on-chain escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowLock {
    Locked,
    Released,
    Cancelled,
}

/// Reference to one escrow contract instance (one per chain per order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRef {
    pub chain_id: u64,
    pub address: Address,
    pub tx_hash: String,
    pub lock: EscrowLock,
}

/// Which side of the swap an escrow secures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowSide {
    Source,
    Destination,
}

/// A validated, admitted order with engine-owned runtime state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    /// Keccak256 of the domain-separated canonical encoding; signature target
    /// and cross-reference key for escrow events
    pub content_hash: [u8; 32],

    // Economic terms
    pub maker: Address,
    pub maker_asset: String,
    pub taker_asset: String,
    pub maker_amount: U256,
    pub start_price: U256,
    pub end_price: U256,
    pub auction_duration_secs: u64,
    /// Number of fill parts N; the vault holds N+1 secrets
    pub parts: usize,
    /// Price reacts to base-fee drift only if the maker opted in
    pub gas_adjusted: bool,

    // Chain routing
    pub src_chain_id: u64,
    pub dst_chain_id: u64,

    // Commitment
    pub merkle_root: [u8; 32],
    pub deadline: DateTime<Utc>,
    pub nonce: u64,
    #[serde(with = "serde_bytes_hex")]
    pub signature: Vec<u8>,

    // Runtime state, mutated only by the lifecycle engine
    pub status: OrderStatus,
    pub announced_at: DateTime<Utc>,
    /// Base fee on the source chain at announcement, for gas adjustment
    pub announcement_base_fee: U256,
    pub finality_deadline: Option<DateTime<Utc>>,
    pub exclusive_deadline: Option<DateTime<Utc>>,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub src_escrow: Option<EscrowRef>,
    pub dst_escrow: Option<EscrowRef>,
    pub revealed_secret_index: Option<usize>,
    /// The resolver that won the order, at most one ever recorded
    pub picker: Option<Address>,
    pub fill_pct: u8,
    pub completed_at: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Order {
    pub fn escrow(&self, side: EscrowSide) -> Option<&EscrowRef> {
        match side {
            EscrowSide::Source => self.src_escrow.as_ref(),
            EscrowSide::Destination => self.dst_escrow.as_ref(),
        }
    }

    pub fn chain_for(&self, side: EscrowSide) -> u64 {
        match side {
            EscrowSide::Source => self.src_chain_id,
            EscrowSide::Destination => self.dst_chain_id,
        }
    }
}

/// Compact listing entry for `GET /orders`
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub status: OrderStatus,
    /// Lifecycle phase of `status`, for subscribers that track coarse
    /// progress instead of individual states
    pub phase: u8,
    pub maker: Address,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub maker_amount: U256,
    pub announced_at: DateTime<Utc>,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            phase: order.status.phase(),
            maker: order.maker,
            src_chain_id: order.src_chain_id,
            dst_chain_id: order.dst_chain_id,
            maker_amount: order.maker_amount,
            announced_at: order.announced_at,
        }
    }
}

/// Hex serde for signature bytes
mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
