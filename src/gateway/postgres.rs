//! Pricing gateway backed by the catalog tables.
//!
//! Read-only: the cart never reserves inventory, it only checks the current
//! ceiling at add time.

use sqlx::PgPool;

use super::{GatewayError, PriceQuote, PricingGateway};

#[derive(Clone)]
pub struct PgPricingGateway {
    pool: PgPool,
}

impl PgPricingGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PricingGateway for PgPricingGateway {
    async fn quote(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<PriceQuote, GatewayError> {
        let row: Option<(String, i64, i32, String)> = match variant_id {
            Some(variant) => sqlx::query_as(
                "SELECT p.name || ' / ' || v.title, v.price, v.inventory_quantity, p.status \
                 FROM product_variants v JOIN products p ON p.id = v.product_id \
                 WHERE v.id = $1 AND v.product_id = $2",
            )
            .bind(variant)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?,
            None => sqlx::query_as(
                "SELECT name, price, inventory_quantity, status FROM products WHERE id = $1",
            )
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?,
        };

        // Unknown product, inactive product and zero inventory all read as
        // unavailable; the engine turns that into OutOfStock.
        Ok(match row {
            Some((title, price, inventory, status)) => PriceQuote {
                title,
                price,
                max_quantity: u32::try_from(inventory).ok().filter(|n| *n > 0),
                available: status == "active" && inventory > 0,
            },
            None => PriceQuote {
                title: String::new(),
                price: 0,
                max_quantity: None,
                available: false,
            },
        })
    }
}
