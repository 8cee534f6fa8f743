//! Simple REST API server example for the wallet ledger.
//!
//! Run with: `cargo run --example server`
//!
//! Every request identifies its caller with an `X-User-Id` header. Movements
//! additionally require an `X-Idempotency-Key` header; a retried key is
//! answered with `409 Conflict` and applies nothing.
//!
//! ## Endpoints
//!
//! - `POST /wallets` - Open a wallet for the caller
//! - `GET /wallets` - List the caller's wallets
//! - `GET /wallets/{id}` - Get a wallet's balance
//! - `GET /wallets/{id}/transactions` - Entry history, newest first
//! - `POST /wallets/{id}/deposit` - Credit a wallet
//! - `POST /wallets/{id}/withdraw` - Debit a wallet
//! - `POST /wallets/{id}/transfer` - Move funds to another wallet
//!
//! ## Example Usage
//!
//! ```bash
//! USER=7d0c3a7e-2f4b-4c7a-9b1e-0c2f5a6d8e91
//!
//! # Open a wallet
//! curl -X POST http://localhost:3000/wallets \
//!   -H "X-User-Id: $USER" -H "Content-Type: application/json" \
//!   -d '{"coin_type": "BTC"}'
//!
//! # Deposit
//! curl -X POST http://localhost:3000/wallets/$WALLET/deposit \
//!   -H "X-User-Id: $USER" -H "X-Idempotency-Key: dep-1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": "100.00"}'
//!
//! # Transfer
//! curl -X POST http://localhost:3000/wallets/$WALLET/transfer \
//!   -H "X-User-Id: $USER" -H "X-Idempotency-Key: tr-1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"to_wallet_id": "'$OTHER'", "amount": "25.00"}'
//!
//! # History
//! curl "http://localhost:3000/wallets/$WALLET/transactions?limit=10" -H "X-User-Id: $USER"
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wallet_ledger::memory::{MemoryDedupStore, MemoryStore};
use wallet_ledger::{
    CoinType, HistoryPage, HistoryQuery, Ledger, LedgerConfig, LedgerError, Movement,
    MovementRequest, Outcome, Receipt, UserId, Wallet, WalletId,
};

const USER_HEADER: &str = "x-user-id";
const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct OpenWalletRequest {
    pub coin_type: CoinType,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_wallet_id: WalletId,
    pub amount: Decimal,
}

/// Query string of the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub counterparty: Option<WalletId>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryParams {
    fn into_query(self) -> HistoryQuery {
        HistoryQuery {
            start: self.start_date,
            end: self.end_date,
            counterparty: self.counterparty,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the ledger.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<Ledger<MemoryStore, MemoryDedupStore>>,
}

impl AppState {
    fn new(config: &LedgerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(Arc::clone(&store), Arc::new(MemoryDedupStore::new()), config);
        Self {
            store,
            ledger: Arc::new(ledger),
        }
    }
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::MissingIdempotencyToken => {
                (StatusCode::BAD_REQUEST, "MISSING_IDEMPOTENCY_KEY")
            }
            LedgerError::MissingCaller => (StatusCode::UNAUTHORIZED, "MISSING_USER"),
            LedgerError::SelfTransfer => (StatusCode::BAD_REQUEST, "SELF_TRANSFER"),
            LedgerError::CurrencyMismatch { .. } => (StatusCode::BAD_REQUEST, "CURRENCY_MISMATCH"),
            LedgerError::WalletNotFound(_) => (StatusCode::NOT_FOUND, "WALLET_NOT_FOUND"),
            LedgerError::AccessDenied(_) => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            LedgerError::InsufficientBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::DuplicateOrInFlight => (StatusCode::CONFLICT, "DUPLICATE_REQUEST"),
            LedgerError::Conflict(_) => (StatusCode::CONFLICT, "BALANCE_CONFLICT"),
            LedgerError::MalformedEntrySet(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "MALFORMED_ENTRY_SET")
            }
            LedgerError::StorageUnavailable { .. } => match self.0.outcome() {
                Outcome::Ambiguous => (StatusCode::SERVICE_UNAVAILABLE, "OUTCOME_UNKNOWN"),
                Outcome::NothingApplied => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            },
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn caller(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(AppError(LedgerError::MissingCaller))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn submit(
    state: &AppState,
    headers: &HeaderMap,
    movement: Movement,
) -> Result<(StatusCode, Json<Receipt>), AppError> {
    let request = MovementRequest {
        caller: caller(headers)?,
        idempotency_token: idempotency_key(headers),
        movement,
    };
    let receipt = state.ledger.submit(&request)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

// === Handlers ===

/// POST /wallets - Open a wallet for the caller.
async fn open_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenWalletRequest>,
) -> Result<(StatusCode, Json<Wallet>), AppError> {
    let user_id = caller(&headers)?;
    let wallet_id = state
        .store
        .insert_wallet(Wallet::new(user_id, request.coin_type));
    let wallet = state.ledger.wallet_for(user_id, wallet_id)?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// GET /wallets - List the caller's wallets.
async fn list_wallets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Wallet>>, AppError> {
    let user_id = caller(&headers)?;
    Ok(Json(state.ledger.engine().wallets_of(user_id)?))
}

/// GET /wallets/{id} - Get a wallet owned by the caller.
async fn get_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WalletId>,
) -> Result<Json<Wallet>, AppError> {
    Ok(Json(state.ledger.wallet_for(caller(&headers)?, id)?))
}

/// GET /wallets/{id}/transactions - Entry history of a wallet.
async fn wallet_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WalletId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, AppError> {
    let page = state
        .ledger
        .history_for(caller(&headers)?, id, &params.into_query())?;
    Ok(Json(page))
}

/// POST /wallets/{id}/deposit
async fn deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WalletId>,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<Receipt>), AppError> {
    submit(
        &state,
        &headers,
        Movement::Deposit {
            wallet_id: id,
            amount: request.amount,
        },
    )
}

/// POST /wallets/{id}/withdraw
async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WalletId>,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<Receipt>), AppError> {
    submit(
        &state,
        &headers,
        Movement::Withdraw {
            wallet_id: id,
            amount: request.amount,
        },
    )
}

/// POST /wallets/{id}/transfer
async fn transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WalletId>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<Receipt>), AppError> {
    submit(
        &state,
        &headers,
        Movement::Transfer {
            sender_wallet_id: id,
            receiver_wallet_id: request.to_wallet_id,
            amount: request.amount,
        },
    )
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/wallets", post(open_wallet).get(list_wallets))
        .route("/wallets/{id}", get(get_wallet))
        .route("/wallets/{id}/transactions", get(wallet_history))
        .route("/wallets/{id}/deposit", post(deposit))
        .route("/wallets/{id}/withdraw", post(withdraw))
        .route("/wallets/{id}/transfer", post(transfer))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = create_router(AppState::new(&LedgerConfig::default()));

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!(addr = "http://127.0.0.1:3000", "Wallet ledger API server running");

    axum::serve(listener, app).await?;
    Ok(())
}
