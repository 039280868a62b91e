use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Chain service error: {0}")]
    Chain(#[from] ChainError),

    #[error("Order store error: {0}")]
    OrderStore(#[from] OrderStoreError),

    #[error("Price feed error: {0}")]
    Price(#[from] PriceError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Failures reported by the ledger side (CLI invocations, Horizon queries)
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("Horizon request failed with {status}: {body}")]
    Horizon { status: u16, body: String },

    #[error("Escrow {0} not found")]
    EscrowNotFound(String),

    #[error("Malformed ledger response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failures reported by the e-commerce backend
#[derive(Error, Debug)]
pub enum OrderStoreError {
    #[error("Order store API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Order {0} not found")]
    OrderNotFound(u64),

    #[error("No order found for escrow {0}")]
    EscrowNotLinked(String),

    #[error("No stellar wallet linked to customer {0}")]
    WalletNotLinked(u64),

    #[error("Failed to decode order store response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Price feed errors
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("Price for {0} not available from oracle")]
    NoData(String),

    #[error("Invalid oracle price: {0}")]
    InvalidPrice(String),

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

/// Reward token to store credit conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("No valid reward payment to treasury found in transaction {0}")]
    PaymentNotFound(String),

    #[error("Transaction {0} has already been redeemed")]
    AlreadyRedeemed(String),

    #[error("Transaction sender {sender} does not match linked wallet {expected}")]
    WalletMismatch { expected: String, sender: String },

    #[error("Payment of {0} is too small to convert")]
    AmountTooSmall(String),

    #[error("Could not verify transaction {tx_hash}: {reason}")]
    LookupFailed { tx_hash: String, reason: String },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AppError::OrderStore(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ORDER_STORE_ERROR"),
            AppError::Price(_) => (StatusCode::SERVICE_UNAVAILABLE, "PRICE_UNAVAILABLE"),
            AppError::Conversion(ConversionError::WalletMismatch { .. }) => {
                (StatusCode::FORBIDDEN, "WALLET_MISMATCH")
            }
            AppError::Conversion(ConversionError::AlreadyRedeemed(_)) => {
                (StatusCode::CONFLICT, "ALREADY_REDEEMED")
            }
            AppError::Conversion(_) => (StatusCode::BAD_REQUEST, "VERIFICATION_FAILED"),
            AppError::Chain(_) => (StatusCode::BAD_GATEWAY, "CHAIN_ERROR"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = match &self {
            AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<std::io::Error> for ChainError {
    fn from(error: std::io::Error) -> Self {
        ChainError::Transport(format!("Failed to spawn command: {}", error))
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(error: serde_json::Error) -> Self {
        ChainError::Malformed(error.to_string())
    }
}

impl From<reqwest::Error> for OrderStoreError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            OrderStoreError::Decode(error.to_string())
        } else {
            OrderStoreError::Transport(error.to_string())
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ChainError::Malformed(error.to_string())
        } else {
            ChainError::Transport(format!("HTTP request error: {:?}", error))
        }
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
