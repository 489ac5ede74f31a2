//! Server-side cart store: one row per session in the `carts` table, with
//! the full cart as a JSONB payload and the cart id denormalized for the
//! fast-path lookup.

use sqlx::PgPool;

use super::{CartStore, StoreError};
use crate::domain::cart::Cart;

pub struct PgCartStore {
    pool: PgPool,
    session_id: String,
}

impl PgCartStore {
    pub fn new(pool: PgPool, session_id: impl Into<String>) -> Self {
        Self {
            pool,
            session_id: session_id.into(),
        }
    }

    async fn delete_row(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM carts WHERE session_id = $1")
            .bind(&self.session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl CartStore for PgCartStore {
    async fn load(&self) -> Result<Option<Cart>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM carts WHERE session_id = $1")
                .bind(&self.session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        let Some((data,)) = row else {
            return Ok(None);
        };
        match serde_json::from_value::<Cart>(data) {
            Ok(cart) if !cart.id.is_empty() => Ok(Some(cart)),
            Ok(_) => {
                tracing::warn!(session_id = %self.session_id, "clearing cart row with empty id");
                self.delete_row().await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "clearing corrupted cart row");
                self.delete_row().await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, cart: &Cart) -> Result<(), StoreError> {
        let data = serde_json::to_value(cart).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO carts (session_id, cart_id, data, updated_at) VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (session_id) DO UPDATE SET cart_id = $2, data = $3, updated_at = NOW()",
        )
        .bind(&self.session_id)
        .bind(&cart.id)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.delete_row().await
    }

    async fn cart_id(&self) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT cart_id FROM carts WHERE session_id = $1")
                .bind(&self.session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(id,)| id))
    }
}
