//! Swapline Relayer - cross-chain atomic swap order lifecycle engine
//!
//! Orchestrates trust-minimized swaps between two chains: Dutch-auction
//! price discovery, hash-locked escrow creation on both legs, Merkle-proof
//! secret disclosure for partial fills, and recovery when any step fails.

pub mod api;
pub mod auction;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod order;
pub mod secrets;
