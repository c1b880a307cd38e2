//! Ethers-backed chain gateway with multi-RPC failover
//!
//! Escrow contract calls are encoded against a fixed ABI:
//!   createEscrow(bytes32 orderHash, bytes32 hashlockRoot, address maker,
//!                uint256 amount, uint256 cancellationAfter) payable
//!   escrowAddress(bytes32 orderHash) view returns (address)
//!   matchesCommitment(bytes32 orderHash, bytes32 hashlockRoot) view returns (bool)
//!   withdraw(bytes32 secret)
//!   cancel()

use super::{ChainGateway, EscrowHandle, EscrowParams};
use crate::config::{ChainConfig, WalletConfig};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Gateway for one chain: several HTTP providers with automatic failover
/// plus a signing wallet for escrow transactions.
pub struct RpcGateway {
    config: ChainConfig,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    wallet: LocalWallet,
    escrow_contract: Address,
}

impl RpcGateway {
    pub async fn new(config: ChainConfig, wallet_config: &WalletConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!(chain_id = config.chain_id, url, "Added HTTP provider");
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainCall {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let wallet = Self::load_wallet(wallet_config)?.with_chain_id(config.chain_id);
        info!(
            chain_id = config.chain_id,
            wallet = ?wallet.address(),
            "Gateway wallet loaded"
        );

        let escrow_contract: Address = config.escrow_contract.parse().map_err(|e| {
            RelayerError::Config(format!(
                "Invalid escrow contract address for chain {}: {}",
                config.chain_id, e
            ))
        })?;

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            wallet,
            escrow_contract,
        })
    }

    fn load_wallet(wallet_config: &WalletConfig) -> RelayerResult<LocalWallet> {
        let env_var = wallet_config
            .private_key_env
            .as_deref()
            .unwrap_or("RELAYER_PRIVATE_KEY");

        let key = std::env::var(env_var).map_err(|_| {
            RelayerError::Wallet(format!("No wallet configured. Set {}", env_var))
        })?;

        key.parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))
    }

    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(
            chain_id = self.config.chain_id,
            provider = next,
            "RPC failover"
        );
    }

    fn chain_err(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ChainCall {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    /// Latest block, rotating through providers on failure
    async fn latest_block(&self) -> RelayerResult<Block<H256>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(BlockNumber::Latest).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => return Err(self.chain_err("no latest block")),
                Err(e) => {
                    warn!(
                        chain_id = self.config.chain_id,
                        "Failed to fetch latest block: {}", e
                    );
                    self.failover();
                }
            }
        }
        Err(self.chain_err("all providers failed"))
    }

    /// Sign and submit a transaction to the escrow contract, returning the
    /// transaction hash once accepted by the node.
    async fn send_contract_tx(
        &self,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> RelayerResult<H256> {
        let from = self.wallet.address();

        let nonce = self
            .http()
            .get_transaction_count(from, None)
            .await
            .map_err(|e| self.chain_err(format!("nonce fetch failed: {}", e)))?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .value(value)
            .nonce(nonce)
            .chain_id(self.config.chain_id)
            .into();

        let gas = self
            .http()
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| self.chain_err(format!("gas estimation failed: {}", e)))?;
        // 20% headroom against state drift between estimate and inclusion
        tx.set_gas(gas + gas / 5);

        let gas_price = self
            .http()
            .get_gas_price()
            .await
            .map_err(|e| self.chain_err(format!("gas price fetch failed: {}", e)))?;
        tx.set_gas_price(gas_price);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let pending = timeout(CALL_TIMEOUT, self.http().send_raw_transaction(raw))
            .await
            .map_err(|_| RelayerError::Timeout {
                operation: format!("send transaction on chain {}", self.config.chain_id),
            })?
            .map_err(|e| self.chain_err(format!("submit failed: {}", e)))?;

        Ok(pending.tx_hash())
    }

    /// eth_call against the escrow contract
    async fn call_contract(&self, to: Address, data: Vec<u8>) -> RelayerResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.http()
            .call(&tx, None)
            .await
            .map_err(|e| self.chain_err(format!("contract call failed: {}", e)))
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn current_block(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let number = block.as_u64();
                    crate::metrics::record_block_height(self.config.chain_id, number);
                    return Ok(number);
                }
                Err(e) => {
                    warn!(
                        chain_id = self.config.chain_id,
                        "Failed to get block number: {}", e
                    );
                    self.failover();
                }
            }
        }
        Err(self.chain_err("all providers failed"))
    }

    async fn base_fee(&self) -> RelayerResult<U256> {
        let block = self.latest_block().await?;
        block
            .base_fee_per_gas
            .ok_or_else(|| self.chain_err("no base fee in latest block"))
    }

    async fn balance_of(&self, address: Address) -> RelayerResult<U256> {
        self.http()
            .get_balance(address, None)
            .await
            .map_err(|e| self.chain_err(format!("balance query failed: {}", e)))
    }

    async fn create_escrow(
        &self,
        params: &EscrowParams,
        safety_deposit: U256,
    ) -> RelayerResult<EscrowHandle> {
        let mut data =
            selector("createEscrow(bytes32,bytes32,address,uint256,uint256)").to_vec();
        data.extend(encode(&[
            Token::FixedBytes(params.order_hash.to_vec()),
            Token::FixedBytes(params.hashlock_root.to_vec()),
            Token::Address(params.maker),
            Token::Uint(params.amount),
            Token::Uint(U256::from(params.cancellation_after as u64)),
        ]));

        let tx_hash = self
            .send_contract_tx(self.escrow_contract, data, safety_deposit)
            .await?;

        // The factory derives the escrow address from the order hash, so it
        // can be read back deterministically.
        let mut query = selector("escrowAddress(bytes32)").to_vec();
        query.extend(encode(&[Token::FixedBytes(params.order_hash.to_vec())]));
        let raw = self.call_contract(self.escrow_contract, query).await?;
        if raw.len() < 32 {
            return Err(self.chain_err("escrowAddress returned short data"));
        }
        let address = Address::from_slice(&raw[12..32]);

        Ok(EscrowHandle {
            address,
            tx_hash: format!("{:?}", tx_hash),
        })
    }

    async fn verify_escrow(&self, address: Address, params: &EscrowParams) -> RelayerResult<bool> {
        let mut data = selector("matchesCommitment(bytes32,bytes32)").to_vec();
        data.extend(encode(&[
            Token::FixedBytes(params.order_hash.to_vec()),
            Token::FixedBytes(params.hashlock_root.to_vec()),
        ]));

        let raw = self.call_contract(address, data).await?;
        Ok(raw.last().copied() == Some(1))
    }

    async fn withdraw(&self, address: Address, secret: [u8; 32]) -> RelayerResult<String> {
        let mut data = selector("withdraw(bytes32)").to_vec();
        data.extend(encode(&[Token::FixedBytes(secret.to_vec())]));

        let tx_hash = self.send_contract_tx(address, data, U256::zero()).await?;
        Ok(format!("{:?}", tx_hash))
    }

    async fn cancel(&self, address: Address) -> RelayerResult<String> {
        let data = selector("cancel()").to_vec();
        let tx_hash = self.send_contract_tx(address, data, U256::zero()).await?;
        Ok(format!("{:?}", tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_keccak_prefix() {
        // keccak256("cancel()") starts with 0xea8a1af0
        assert_eq!(selector("cancel()"), [0xea, 0x8a, 0x1a, 0xf0]);
    }
}
