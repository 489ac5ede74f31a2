//! External collaborator interfaces the engine calls out to but does not own.

pub mod postgres;

use std::future::Future;

use thiserror::Error;

use crate::domain::cart::Cart;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative price and availability for one product/variant. The title
/// rides along because new cart lines are built entirely from the quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    pub title: String,
    pub price: i64,
    pub max_quantity: Option<u32>,
    pub available: bool,
}

/// Catalog/pricing lookup consulted before every add. The engine applies its
/// own timeout around calls; implementations only report availability.
pub trait PricingGateway: Send + Sync + 'static {
    fn quote(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> impl Future<Output = Result<PriceQuote, GatewayError>> + Send;
}

/// Promo/discount evaluation. Returns the discount amount for a code against
/// the current cart; the engine clamps the result into `[0, subtotal]`.
pub trait PromoGateway: Send + Sync + 'static {
    fn evaluate(
        &self,
        code: &str,
        cart: &Cart,
    ) -> impl Future<Output = Result<i64, GatewayError>> + Send;
}

/// Wired-off promo gateway: every code evaluates to zero discount.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPromo;

impl PromoGateway for NoPromo {
    async fn evaluate(&self, _code: &str, _cart: &Cart) -> Result<i64, GatewayError> {
        Ok(0)
    }
}
