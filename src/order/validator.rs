//! Order admission validation
//!
//! Checks run in a fixed sequence before the lifecycle engine ever sees an
//! order: structural completeness, deadline, signature recovery over the
//! domain-separated canonical encoding, and (optionally) maker solvency.
//! Missing fields are hard rejections and are never defaulted.

use crate::error::{RelayerError, RelayerResult};
use crate::gateway::ChainGateway;

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::Deserialize;
use sha3::{Digest, Keccak256};

/// Domain tag binding a signature to this protocol version. The source chain
/// id is mixed into the preimage right after it, so a signature for chain X
/// can never validate an order claiming chain Y.
const DOMAIN_TAG: &[u8] = b"SWAPLINE_ORDER_V1";

/// Asset identifier for the chain's native token, the only kind the solvency
/// check can price without an external quote
const NATIVE_ASSET: &str = "native";

/// Raw order submission as received from a maker. Every field is optional at
/// the wire level so absence is detected explicitly rather than defaulted.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub maker: Option<Address>,
    pub maker_asset: Option<String>,
    pub taker_asset: Option<String>,
    pub maker_amount: Option<U256>,
    pub start_price: Option<U256>,
    pub end_price: Option<U256>,
    pub auction_duration_secs: Option<u64>,
    pub parts: Option<usize>,
    pub gas_adjusted: Option<bool>,
    pub src_chain_id: Option<u64>,
    pub dst_chain_id: Option<u64>,
    pub nonce: Option<u64>,
    pub deadline: Option<DateTime<Utc>>,
    /// 65-byte r||s||v recoverable secp256k1 signature, hex encoded
    pub signature: Option<String>,
}

/// A submission that passed every synchronous check
#[derive(Debug, Clone)]
pub struct CheckedOrder {
    pub maker: Address,
    pub maker_asset: String,
    pub taker_asset: String,
    pub maker_amount: U256,
    pub start_price: U256,
    pub end_price: U256,
    pub auction_duration_secs: u64,
    pub parts: usize,
    pub gas_adjusted: bool,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub nonce: u64,
    pub deadline: DateTime<Utc>,
    pub signature: Vec<u8>,
    pub content_hash: [u8; 32],
}

pub struct OrderValidator {
    check_maker_balance: bool,
}

impl OrderValidator {
    pub fn new(check_maker_balance: bool) -> Self {
        Self {
            check_maker_balance,
        }
    }

    /// Run the synchronous admission checks, in order. Any failure yields a
    /// `Validation` rejection with a human-readable reason; the order never
    /// reaches the engine.
    pub fn validate(&self, sub: &Submission) -> RelayerResult<CheckedOrder> {
        // (a) structural completeness
        let maker = require(sub.maker, "maker")?;
        let maker_asset = require(sub.maker_asset.clone(), "maker_asset")?;
        let taker_asset = require(sub.taker_asset.clone(), "taker_asset")?;
        let maker_amount = require(sub.maker_amount, "maker_amount")?;
        let start_price = require(sub.start_price, "start_price")?;
        let end_price = require(sub.end_price, "end_price")?;
        let auction_duration_secs = require(sub.auction_duration_secs, "auction_duration_secs")?;
        let parts = require(sub.parts, "parts")?;
        let src_chain_id = require(sub.src_chain_id, "src_chain_id")?;
        let dst_chain_id = require(sub.dst_chain_id, "dst_chain_id")?;
        let nonce = require(sub.nonce, "nonce")?;
        let deadline = require(sub.deadline, "deadline")?;
        let signature_hex = require(sub.signature.clone(), "signature")?;
        let gas_adjusted = sub.gas_adjusted.unwrap_or(false);

        // (b) deadline strictly in the future
        if deadline <= Utc::now() {
            return Err(RelayerError::Validation(format!(
                "deadline {} is not in the future",
                deadline
            )));
        }

        // (c) economic sanity
        if maker_amount.is_zero() {
            return Err(RelayerError::Validation("maker_amount must be non-zero".into()));
        }
        if start_price < end_price {
            return Err(RelayerError::Validation(
                "start_price must not be below end_price".into(),
            ));
        }
        if end_price.is_zero() {
            return Err(RelayerError::Validation("end_price must be non-zero".into()));
        }
        if parts == 0 {
            return Err(RelayerError::Validation("parts must be at least 1".into()));
        }
        if auction_duration_secs == 0 {
            return Err(RelayerError::Validation("auction duration must be non-zero".into()));
        }
        if src_chain_id == dst_chain_id {
            return Err(RelayerError::Validation(
                "source and destination chains must differ".into(),
            ));
        }

        // (d) signature recovers to the declared maker
        let signature = hex::decode(signature_hex.trim_start_matches("0x"))
            .map_err(|e| RelayerError::Validation(format!("signature is not valid hex: {}", e)))?;

        let content_hash = content_hash(
            src_chain_id,
            maker,
            &maker_asset,
            &taker_asset,
            maker_amount,
            start_price,
            end_price,
            auction_duration_secs,
            parts,
            dst_chain_id,
            nonce,
            deadline,
        );

        let recovered = recover_signer(&content_hash, &signature)
            .map_err(|e| RelayerError::Validation(format!("signature invalid: {}", e)))?;
        if recovered != maker {
            return Err(RelayerError::Validation(format!(
                "signature recovers to {:?}, expected maker {:?}",
                recovered, maker
            )));
        }

        Ok(CheckedOrder {
            maker,
            maker_asset,
            taker_asset,
            maker_amount,
            start_price,
            end_price,
            auction_duration_secs,
            parts,
            gas_adjusted,
            src_chain_id,
            dst_chain_id,
            nonce,
            deadline,
            signature,
            content_hash,
        })
    }

    /// Optional on-chain solvency check for native-asset orders. A disabled
    /// check or non-native maker asset passes trivially.
    pub async fn check_solvency(
        &self,
        order: &CheckedOrder,
        gateway: &dyn ChainGateway,
    ) -> RelayerResult<()> {
        if !self.check_maker_balance || order.maker_asset != NATIVE_ASSET {
            return Ok(());
        }

        let balance = gateway.balance_of(order.maker).await?;
        if balance < order.maker_amount {
            return Err(RelayerError::Validation(format!(
                "maker balance {} below maker_amount {}",
                balance, order.maker_amount
            )));
        }
        Ok(())
    }
}

fn require<T>(field: Option<T>, name: &str) -> RelayerResult<T> {
    field.ok_or_else(|| RelayerError::Validation(format!("missing required field: {}", name)))
}

/// Keccak256 of the domain-separated canonical order encoding. All fields
/// are fixed-width big-endian so the digest is deterministic across clients.
#[allow(clippy::too_many_arguments)]
pub fn content_hash(
    src_chain_id: u64,
    maker: Address,
    maker_asset: &str,
    taker_asset: &str,
    maker_amount: U256,
    start_price: U256,
    end_price: U256,
    auction_duration_secs: u64,
    parts: usize,
    dst_chain_id: u64,
    nonce: u64,
    deadline: DateTime<Utc>,
) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(DOMAIN_TAG);
    hasher.update(src_chain_id.to_be_bytes());
    hasher.update(maker.as_bytes());
    hasher.update(Keccak256::digest(maker_asset.as_bytes()));
    hasher.update(Keccak256::digest(taker_asset.as_bytes()));

    let mut buf = [0u8; 32];
    maker_amount.to_big_endian(&mut buf);
    hasher.update(buf);
    start_price.to_big_endian(&mut buf);
    hasher.update(buf);
    end_price.to_big_endian(&mut buf);
    hasher.update(buf);

    hasher.update(auction_duration_secs.to_be_bytes());
    hasher.update((parts as u64).to_be_bytes());
    hasher.update(dst_chain_id.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(deadline.timestamp().to_be_bytes());
    hasher.finalize().into()
}

/// Recover the signer address from a 65-byte r||s||v signature over a
/// 32-byte digest. Accepts both raw (0/1) and Ethereum-style (27/28)
/// recovery ids.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> RelayerResult<Address> {
    if signature.len() != 65 {
        return Err(RelayerError::Signature(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }

    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::try_from(recovery_byte)
        .map_err(|e| RelayerError::Signature(format!("invalid recovery id {}: {}", v, e)))?;

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| RelayerError::Signature(format!("malformed signature: {}", e)))?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| RelayerError::Signature(format!("recovery failed: {}", e)))?;

    // Ethereum convention: address = last 20 bytes of keccak(uncompressed key)
    let encoded = key.to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// Sign a 32-byte digest with a raw secp256k1 key, producing the 65-byte
/// r||s||v encoding `recover_signer` expects. Test/client helper.
pub fn sign_digest(digest: &[u8; 32], private_key: &[u8; 32]) -> RelayerResult<Vec<u8>> {
    use k256::ecdsa::SigningKey;

    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|e| RelayerError::Signature(format!("invalid private key: {}", e)))?;
    let (sig, recovery_id) = signing_key
        .sign_prehash_recoverable(digest)
        .map_err(|e| RelayerError::Signature(format!("signing failed: {}", e)))?;

    let mut out = sig.to_bytes().to_vec();
    out.push(recovery_id.to_byte());
    Ok(out)
}

/// Address for a raw private key, Ethereum convention. Test/client helper.
pub fn address_for_key(private_key: &[u8; 32]) -> RelayerResult<Address> {
    use k256::ecdsa::SigningKey;

    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|e| RelayerError::Signature(format!("invalid private key: {}", e)))?;
    let encoded = signing_key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}
