//! Chain gateway - per-chain abstraction over RPC and escrow contract calls
//!
//! The lifecycle engine only ever talks to chains through the `ChainGateway`
//! trait, so tests can swap in programmable fakes. The `ChainManager`
//! constructs one ethers-backed gateway per configured chain, lazily on
//! first use.

pub mod rpc;

pub use rpc::RpcGateway;

use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::info;

/// Parameters the escrow contract commits to on creation, re-checked before
/// secret revelation
#[derive(Debug, Clone, PartialEq)]
pub struct EscrowParams {
    /// Order content hash, the cross-chain reference key
    pub order_hash: [u8; 32],
    /// Merkle root of the order's secret hashes
    pub hashlock_root: [u8; 32],
    pub maker: Address,
    pub amount: U256,
    /// Unix timestamp after which the escrow can be cancelled
    pub cancellation_after: i64,
}

/// Result of an escrow creation call
#[derive(Debug, Clone)]
pub struct EscrowHandle {
    pub address: Address,
    pub tx_hash: String,
}

/// Per-chain operations the engine depends on. Every method can fail with
/// `RelayerError::ChainCall`.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn current_block(&self) -> RelayerResult<u64>;

    /// Current base fee in wei
    async fn base_fee(&self) -> RelayerResult<U256>;

    async fn balance_of(&self, address: Address) -> RelayerResult<U256>;

    /// Create a hash-locked escrow holding `params.amount` plus the bonded
    /// safety deposit
    async fn create_escrow(
        &self,
        params: &EscrowParams,
        safety_deposit: U256,
    ) -> RelayerResult<EscrowHandle>;

    /// Check that the escrow at `address` still exists and matches the
    /// committed parameters
    async fn verify_escrow(&self, address: Address, params: &EscrowParams) -> RelayerResult<bool>;

    /// Release escrowed funds by presenting the matching secret
    async fn withdraw(&self, address: Address, secret: [u8; 32]) -> RelayerResult<String>;

    /// Cancel the escrow, returning funds and safety deposit to the
    /// depositing party
    async fn cancel(&self, address: Address) -> RelayerResult<String>;
}

/// Holds one gateway per connected chain, created lazily on first use
pub struct ChainManager {
    settings: Settings,
    gateways: DashMap<u64, Arc<dyn ChainGateway>>,
}

impl ChainManager {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            gateways: DashMap::new(),
        }
    }

    /// Gateway for a chain, constructing it on first access
    pub async fn gateway(&self, chain_id: u64) -> RelayerResult<Arc<dyn ChainGateway>> {
        if let Some(gateway) = self.gateways.get(&chain_id) {
            return Ok(gateway.clone());
        }

        let chain_config = self
            .settings
            .get_chain_by_id(chain_id)
            .filter(|c| c.enabled)
            .ok_or(RelayerError::ChainNotFound { chain_id })?
            .clone();

        info!(chain_id, name = %chain_config.name, "Initializing chain gateway");
        let gateway: Arc<dyn ChainGateway> =
            Arc::new(RpcGateway::new(chain_config, &self.settings.wallet).await?);

        // A racing initializer may have beaten us; keep whichever landed first
        Ok(self
            .gateways
            .entry(chain_id)
            .or_insert(gateway)
            .clone())
    }

    /// Insert a pre-built gateway. Test seam; also used to share gateways
    /// across engine instances.
    pub fn register(&self, gateway: Arc<dyn ChainGateway>) {
        self.gateways.insert(gateway.chain_id(), gateway);
    }

    /// Chain IDs with an initialized gateway
    pub fn connected_chains(&self) -> Vec<u64> {
        self.gateways.iter().map(|e| *e.key()).collect()
    }

    /// Probe every initialized gateway concurrently
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let gateways: Vec<Arc<dyn ChainGateway>> =
            self.gateways.iter().map(|e| e.value().clone()).collect();

        let probes = gateways.iter().map(|gateway| async move {
            let healthy = gateway.current_block().await.is_ok();
            (gateway.chain_id(), healthy)
        });

        let results = futures::future::join_all(probes).await;
        for (chain_id, healthy) in &results {
            crate::metrics::record_chain_health(*chain_id, *healthy);
        }
        results
    }
}
