//! HTTP API for order submission, lifecycle signals, and monitoring

use crate::config::ApiConfig;
use crate::engine::LifecycleEngine;
use crate::error::{RelayerError, RelayerResult};
use crate::gateway::ChainManager;
use crate::order::Submission;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: LifecycleEngine,
    pub chain_manager: Arc<ChainManager>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    engine: LifecycleEngine,
    chain_manager: Arc<ChainManager>,
) -> RelayerResult<()> {
    let state = AppState {
        engine,
        chain_manager,
    };

    let app = Router::new()
        .route("/orders", post(submit_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/pick", post(pick_order))
        .route("/orders/:id/secret", post(confirm_secret))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(e.to_string()))?;

    Ok(())
}

fn error_response(err: RelayerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        RelayerError::Validation(_) | RelayerError::Signature(_) => StatusCode::BAD_REQUEST,
        RelayerError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
        RelayerError::ChainNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Admit a signed order. Returns the order id and the Merkle root the maker
/// must verify against escrow commitments.
async fn submit_order(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> impl IntoResponse {
    match state.engine.submit(&submission).await {
        Ok((order_id, merkle_root)) => (
            StatusCode::CREATED,
            Json(SubmitResponse {
                order_id,
                merkle_root: format!("0x{}", hex::encode(merkle_root)),
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.order(&id) {
        Some(order) => (StatusCode::OK, Json(order)).into_response(),
        None => error_response(RelayerError::OrderNotFound {
            order_id: id.to_string(),
        })
        .into_response(),
    }
}

async fn list_orders(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.orders())
}

/// Resolver pick signal
async fn pick_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PickRequest>,
) -> impl IntoResponse {
    let resolver: Address = match request.resolver.parse() {
        Ok(address) => address,
        Err(_) => {
            return error_response(RelayerError::Validation(
                "invalid resolver address".to_string(),
            ))
            .into_response()
        }
    };

    match state.engine.pick(id, resolver).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Maker confirmation that withdrawal may proceed
async fn confirm_secret(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.confirm_secret(id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify chain connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.chain_manager.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let response = ReadinessResponse {
        ready: chains_ok,
        chains: chain_health
            .into_iter()
            .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
            .collect(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Get relayer status with per-state order counts
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.chain_manager.health_check().await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_chains: state.chain_manager.connected_chains(),
        chain_status: chain_health
            .into_iter()
            .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
            .collect(),
        orders: state
            .engine
            .order_counts()
            .into_iter()
            .map(|(status, count)| OrderCount {
                status: status.as_str().to_string(),
                count,
            })
            .collect(),
    })
}

// Request/response types

#[derive(Deserialize)]
struct PickRequest {
    resolver: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    order_id: Uuid,
    merkle_root: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    connected_chains: Vec<u64>,
    chain_status: Vec<ChainHealth>,
    orders: Vec<OrderCount>,
}

#[derive(Serialize)]
struct OrderCount {
    status: String,
    count: usize,
}
