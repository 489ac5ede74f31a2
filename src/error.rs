//! Error taxonomy for cart operations.
//!
//! Every variant is a recoverable, typed failure returned to the caller;
//! nothing here crosses the engine boundary as a panic. Storage problems
//! carry their own sub-errors (`storage::StoreError`, `gateway::GatewayError`)
//! and are folded into this taxonomy at the engine.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Item failed field validation; carries every violated rule.
    #[error("cart item validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// Pricing gateway reports the product/variant as unavailable.
    #[error("product {product_id} is out of stock")]
    OutOfStock { product_id: String },

    /// Requested quantity exceeds the stock ceiling. `max_quantity` is the
    /// allowed remainder, surfaced so the UI can show "Maximum quantity: N".
    #[error("requested quantity exceeds available stock (maximum {max_quantity})")]
    QuantityExceedsStock { max_quantity: u32 },

    #[error("item {0} not found in cart")]
    ItemNotFound(String),

    /// Pricing or promo lookup did not answer within the configured bound.
    #[error("gateway lookup timed out")]
    GatewayTimeout,

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Persisted cart failed shape validation. Recovered automatically by
    /// resetting storage, so callers never receive this variant; the storage
    /// layer reports the condition as `StoreError::Corrupted` in its logs.
    /// Kept so the taxonomy names every failure kind the system can log.
    #[error("persisted cart is corrupted: {0}")]
    StorageCorrupted(String),

    /// Persistence failed after a successful in-memory mutation. Logged at
    /// the engine's commit point; the in-memory snapshot stays authoritative
    /// and the mutation is not rolled back.
    #[error("failed to persist cart: {0}")]
    StorageWriteFailed(String),
}
