//! Cart persistence boundary.
//!
//! One cart per device/session, behind the [`CartStore`] trait. Storage is
//! best-effort: decode failures are treated as corruption and self-heal
//! (clear + `None`), and a failed save never crashes the mutation flow; the
//! in-memory snapshot stays authoritative for the running session.

pub mod postgres;

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::cart::Cart;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Persisted payload failed shape validation.
    #[error("corrupted cart payload: {0}")]
    Corrupted(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable key-value persistence of exactly one [`Cart`].
///
/// `load` returning `None` means "nothing persisted yet" and triggers
/// skeleton creation; an empty cart is a valid persisted value and is *not*
/// the same thing.
pub trait CartStore: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<Option<Cart>, StoreError>> + Send;
    fn save(&self, cart: &Cart) -> impl Future<Output = Result<(), StoreError>> + Send;
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
    /// Fast-path id lookup without deserializing the whole cart.
    fn cart_id(&self) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;
}

/// Decodes a raw JSON payload, enforcing the shape the engine relies on.
/// Fails closed: anything undecodable is corruption, never adopted.
fn decode_cart(raw: &str) -> Result<Cart, StoreError> {
    let cart: Cart =
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    if cart.id.is_empty() {
        return Err(StoreError::Corrupted("cart id is empty".into()));
    }
    Ok(cart)
}

/// Local-device store: one JSON document plus a separate cart-id pointer
/// file, both removed together on clear or corruption.
pub struct JsonFileStore {
    cart_path: PathBuf,
    id_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cart_path: dir.join("shopping_cart.json"),
            id_path: dir.join("cart_id"),
        }
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        for path in [&self.cart_path, &self.id_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Backend(e.to_string())),
            }
        }
        Ok(())
    }
}

impl CartStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Cart>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.cart_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };
        match decode_cart(&raw) {
            Ok(cart) => Ok(Some(cart)),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.cart_path.display(), "clearing corrupted cart file");
                self.remove_all().await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, cart: &Cart) -> Result<(), StoreError> {
        let raw = serde_json::to_string(cart).map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::write(&self.cart_path, raw)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::write(&self.id_path, &cart.id)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.remove_all().await
    }

    async fn cart_id(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.id_path).await {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}

/// String-backed store for tests and ephemeral sessions. Holding the raw
/// payload (rather than a typed `Cart`) keeps the decode path honest and lets
/// tests seed corrupted data.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the raw payload directly, bypassing serialization.
    pub async fn seed_raw(&self, raw: impl Into<String>) {
        *self.slot.lock().await = Some(raw.into());
    }

    pub async fn is_cleared(&self) -> bool {
        self.slot.lock().await.is_none()
    }
}

impl CartStore for MemoryStore {
    async fn load(&self) -> Result<Option<Cart>, StoreError> {
        let mut slot = self.slot.lock().await;
        let Some(raw) = slot.as_ref() else {
            return Ok(None);
        };
        match decode_cart(raw) {
            Ok(cart) => Ok(Some(cart)),
            Err(e) => {
                tracing::warn!(error = %e, "clearing corrupted in-memory cart");
                *slot = None;
                Ok(None)
            }
        }
    }

    async fn save(&self, cart: &Cart) -> Result<(), StoreError> {
        let raw = serde_json::to_string(cart).map_err(|e| StoreError::Backend(e.to_string()))?;
        *self.slot.lock().await = Some(raw);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().await = None;
        Ok(())
    }

    async fn cart_id(&self) -> Result<Option<String>, StoreError> {
        let slot = self.slot.lock().await;
        Ok(slot
            .as_ref()
            .and_then(|raw| decode_cart(raw).ok())
            .map(|cart| cart.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartConfig;
    use crate::domain::cart::{item_id, CartItem};
    use crate::domain::totals;

    fn sample_cart() -> Cart {
        let mut cart = totals::empty_cart();
        cart.items = vec![CartItem {
            id: item_id("P1", Some("V1")),
            product_id: "P1".into(),
            variant_id: Some("V1".into()),
            title: "Widget".into(),
            price: 1_500,
            quantity: 2,
            max_quantity: Some(10),
        }];
        totals::update_totals(cart, &CartConfig::default())
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());

        let cart = sample_cart();
        store.save(&cart).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, cart);
        assert_eq!(store.cart_id().await.unwrap(), Some(cart.id.clone()));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(store.cart_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_clears_corrupted_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        tokio::fs::write(dir.path().join("shopping_cart.json"), r#"{"foo":1}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("cart_id"), "stale").await.unwrap();

        assert!(store.load().await.unwrap().is_none());
        // Both entries removed together.
        assert!(store.cart_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_corruption_self_heals() {
        let store = MemoryStore::new();
        store.seed_raw("not even json").await;
        assert!(store.load().await.unwrap().is_none());
        assert!(store.is_cleared().await);
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        let mut cart = sample_cart();
        cart.id = String::new();
        let raw = serde_json::to_string(&cart).unwrap();
        assert!(matches!(decode_cart(&raw), Err(StoreError::Corrupted(_))));
    }
}
