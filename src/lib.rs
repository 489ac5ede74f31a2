//! Storefront Cart Engine
//!
//! Cart computation and synchronization core for a storefront service.
//!
//! ## Features
//! - Merge-on-duplicate cart mutations keyed by product + variant
//! - Derived totals (subtotal, shipping, tax, discount, total) recomputed
//!   through a single choke point after every mutation
//! - Serialized mutations: one in-flight operation per cart, FIFO order
//! - Pluggable persistence (Postgres, local JSON file, in-memory)
//! - Pricing and promo gateways with bounded lookup timeouts
//! - Snapshot notifications for every successful mutation

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;
pub mod storage;

pub use config::CartConfig;
pub use domain::cart::{Cart, CartItem};
pub use engine::CartEngine;
pub use error::CartError;
pub use gateway::{NoPromo, PriceQuote, PricingGateway, PromoGateway};
pub use storage::CartStore;

pub type Result<T> = std::result::Result<T, CartError>;
