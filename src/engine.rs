//! The cart mutation and synchronization core.
//!
//! `CartEngine` is the sole authority for the in-memory cart of one shopper
//! session. All mutations run under a single fair async mutex that is held
//! across gateway and storage suspension points, so operations are accepted
//! and applied strictly one at a time, in FIFO order. Two back-to-back adds
//! can never read the same pre-mutation snapshot.
//!
//! Every mutation is all-or-nothing: it works on a clone of the current
//! cart, and only a fully validated, recomputed cart is committed, persisted
//! and broadcast. A failed persistence is logged and does not roll back the
//! in-memory change; the running session stays authoritative.

use tokio::sync::{broadcast, Mutex};

use crate::config::CartConfig;
use crate::domain::cart::{item_id, Cart, CartItem};
use crate::domain::totals;
use crate::error::CartError;
use crate::gateway::{GatewayError, NoPromo, PricingGateway, PromoGateway};
use crate::storage::CartStore;
use crate::Result;

struct EngineState {
    cart: Cart,
    last_error: Option<CartError>,
}

pub struct CartEngine<S, P, M = NoPromo> {
    store: S,
    pricing: P,
    promo: Option<M>,
    config: CartConfig,
    state: Mutex<EngineState>,
    notify: broadcast::Sender<Cart>,
}

impl<S, P> CartEngine<S, P>
where
    S: CartStore,
    P: PricingGateway,
{
    /// Loads the engine without a promo gateway; promo codes evaluate to no
    /// discount.
    pub async fn load(store: S, pricing: P, config: CartConfig) -> Self {
        Self::load_with_promo(store, pricing, None::<NoPromo>, config).await
    }
}

impl<S, P, M> CartEngine<S, P, M>
where
    S: CartStore,
    P: PricingGateway,
    M: PromoGateway,
{
    /// Startup sequence: adopt the persisted cart if one decodes, otherwise
    /// build a fresh skeleton, then run one totals pass to self-heal any
    /// drift in a stale persisted copy.
    pub async fn load_with_promo(store: S, pricing: P, promo: Option<M>, config: CartConfig) -> Self {
        let cart = match store.load().await {
            Ok(Some(cart)) => {
                tracing::debug!(cart_id = %cart.id, "adopted persisted cart");
                cart
            }
            Ok(None) => totals::empty_cart(),
            Err(e) => {
                tracing::warn!(error = %e, "cart load failed, starting empty");
                totals::empty_cart()
            }
        };
        let cart = totals::update_totals(cart, &config);
        let (notify, _) = broadcast::channel(32);
        Self {
            store,
            pricing,
            promo,
            config,
            state: Mutex::new(EngineState {
                cart,
                last_error: None,
            }),
            notify,
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Adds `quantity` units of a product/variant. Adding a combination
    /// already in the cart increments that line instead of duplicating it.
    pub async fn add_item(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: u32,
    ) -> Result<Cart> {
        let mut state = self.state.lock().await;
        let result = self
            .prepare_add(&state.cart, product_id, variant_id, quantity)
            .await;
        self.commit(&mut state, result).await
    }

    /// Sets the quantity of an existing line. Zero removes the line; a value
    /// above the stock ceiling is clamped to it.
    pub async fn update_quantity(&self, item_id: &str, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return self.remove_item(item_id).await;
        }
        let mut state = self.state.lock().await;
        let result = prepare_update(&state.cart, item_id, quantity, &self.config);
        self.commit(&mut state, result).await
    }

    /// Removes a line. Removing an id that is not in the cart is a no-op
    /// success, so retries and double-clicks are safe.
    pub async fn remove_item(&self, item_id: &str) -> Result<Cart> {
        let mut state = self.state.lock().await;
        if !state.cart.items.iter().any(|i| i.id == item_id) {
            state.last_error = None;
            return Ok(state.cart.clone());
        }
        let mut cart = state.cart.clone();
        cart.items.retain(|i| i.id != item_id);
        let cart = totals::update_totals(cart, &self.config);
        self.commit(&mut state, Ok(cart)).await
    }

    /// Empties the cart. The cart id survives; all derived fields drop to
    /// zero and the applied promo is forgotten.
    pub async fn clear(&self) -> Result<Cart> {
        let mut state = self.state.lock().await;
        let mut cart = state.cart.clone();
        cart.items.clear();
        cart.discount = 0;
        cart.promo_code = None;
        let cart = totals::update_totals(cart, &self.config);
        self.commit(&mut state, Ok(cart)).await
    }

    /// Evaluates a promo code through the promo gateway and applies the
    /// resulting discount, clamped into `[0, subtotal]`.
    pub async fn apply_promo(&self, code: &str) -> Result<Cart> {
        let mut state = self.state.lock().await;
        let result = self.prepare_promo(&state.cart, code).await;
        self.commit(&mut state, result).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current immutable snapshot.
    pub async fn cart(&self) -> Cart {
        self.state.lock().await.cart.clone()
    }

    /// The startup sequence runs to completion inside `load`/`load_with_promo`
    /// before the engine value exists, so a constructed engine is never in a
    /// loading state. Kept for interface parity with UI consumers.
    pub fn is_loading(&self) -> bool {
        false
    }

    /// Last failed operation, cleared by the next successful one.
    pub async fn last_error(&self) -> Option<CartError> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn get_item(&self, product_id: &str, variant_id: Option<&str>) -> Option<CartItem> {
        let key = item_id(product_id, variant_id);
        self.state.lock().await.cart.find_item(&key).cloned()
    }

    pub async fn has_item(&self, product_id: &str, variant_id: Option<&str>) -> bool {
        self.get_item(product_id, variant_id).await.is_some()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.cart.items.is_empty()
    }

    pub async fn total_items(&self) -> u32 {
        self.state.lock().await.cart.items_count
    }

    /// One snapshot per successful mutation, delivered in mutation order.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Cart> {
        self.notify.subscribe()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn prepare_add(
        &self,
        current: &Cart,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: u32,
    ) -> Result<Cart> {
        let quote = self.quote_with_timeout(product_id, variant_id).await?;
        if !quote.available {
            return Err(CartError::OutOfStock {
                product_id: product_id.to_string(),
            });
        }

        let key = item_id(product_id, variant_id);
        let mut cart = current.clone();
        let affected = match cart.items.iter_mut().find(|i| i.id == key) {
            Some(existing) => {
                let requested = existing.quantity.saturating_add(quantity);
                if let Some(max) = quote.max_quantity {
                    if requested > max {
                        return Err(CartError::QuantityExceedsStock { max_quantity: max });
                    }
                }
                existing.quantity = requested;
                existing.price = quote.price;
                existing.max_quantity = quote.max_quantity;
                existing.clone()
            }
            None => {
                if let Some(max) = quote.max_quantity {
                    if quantity > max {
                        return Err(CartError::QuantityExceedsStock { max_quantity: max });
                    }
                }
                let item = CartItem {
                    id: key,
                    product_id: product_id.to_string(),
                    variant_id: variant_id.map(str::to_string),
                    title: quote.title,
                    price: quote.price,
                    quantity,
                    max_quantity: quote.max_quantity,
                };
                cart.items.push(item.clone());
                item
            }
        };

        affected.check().map_err(CartError::ValidationFailed)?;
        Ok(totals::update_totals(cart, &self.config))
    }

    async fn prepare_promo(&self, current: &Cart, code: &str) -> Result<Cart> {
        let Some(promo) = &self.promo else {
            return Err(CartError::GatewayUnavailable(
                "no promo gateway configured".into(),
            ));
        };
        let amount = match tokio::time::timeout(
            self.config.gateway_timeout,
            promo.evaluate(code, current),
        )
        .await
        {
            Ok(Ok(amount)) => amount,
            Ok(Err(GatewayError::Unavailable(msg))) => {
                return Err(CartError::GatewayUnavailable(msg))
            }
            Err(_) => return Err(CartError::GatewayTimeout),
        };
        let mut cart = current.clone();
        cart.discount = totals::clamp_discount(amount, cart.subtotal);
        cart.promo_code = Some(code.to_string());
        Ok(totals::update_totals(cart, &self.config))
    }

    async fn quote_with_timeout(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<crate::gateway::PriceQuote> {
        match tokio::time::timeout(
            self.config.gateway_timeout,
            self.pricing.quote(product_id, variant_id),
        )
        .await
        {
            Ok(Ok(quote)) => Ok(quote),
            Ok(Err(GatewayError::Unavailable(msg))) => Err(CartError::GatewayUnavailable(msg)),
            Err(_) => Err(CartError::GatewayTimeout),
        }
    }

    /// Commit point for every mutation: persist (best-effort), swap the
    /// snapshot, clear the error slot, notify. On failure the previous
    /// snapshot stays active and only the error slot changes.
    async fn commit(&self, state: &mut EngineState, result: Result<Cart>) -> Result<Cart> {
        match result {
            Ok(cart) => {
                if let Err(e) = self.store.save(&cart).await {
                    let err = CartError::StorageWriteFailed(e.to_string());
                    tracing::error!(
                        cart_id = %cart.id,
                        error = %err,
                        "in-memory snapshot remains authoritative"
                    );
                }
                state.cart = cart.clone();
                state.last_error = None;
                let _ = self.notify.send(cart.clone());
                Ok(cart)
            }
            Err(e) => {
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

fn prepare_update(
    current: &Cart,
    item_id: &str,
    quantity: u32,
    config: &CartConfig,
) -> Result<Cart> {
    let mut cart = current.clone();
    let item = cart
        .items
        .iter_mut()
        .find(|i| i.id == item_id)
        .ok_or_else(|| CartError::ItemNotFound(item_id.to_string()))?;
    item.quantity = match item.max_quantity {
        Some(max) => quantity.min(max),
        None => quantity,
    };
    item.check().map_err(CartError::ValidationFailed)?;
    Ok(totals::update_totals(cart, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PriceQuote;
    use crate::storage::MemoryStore;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakePricing {
        quotes: HashMap<String, PriceQuote>,
        delay: Option<Duration>,
    }

    impl FakePricing {
        fn new() -> Self {
            Self {
                quotes: HashMap::new(),
                delay: None,
            }
        }

        fn with(mut self, product_id: &str, price: i64, max_quantity: Option<u32>) -> Self {
            self.quotes.insert(
                product_id.to_string(),
                PriceQuote {
                    title: format!("Product {product_id}"),
                    price,
                    max_quantity,
                    available: true,
                },
            );
            self
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl PricingGateway for FakePricing {
        async fn quote(
            &self,
            product_id: &str,
            variant_id: Option<&str>,
        ) -> std::result::Result<PriceQuote, GatewayError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .quotes
                .get(&item_id(product_id, variant_id))
                .cloned()
                .unwrap_or(PriceQuote {
                    title: String::new(),
                    price: 0,
                    max_quantity: None,
                    available: false,
                }))
        }
    }

    /// Store whose writes always fail, for the best-effort persistence
    /// contract.
    struct FailingStore;

    impl CartStore for FailingStore {
        async fn load(&self) -> std::result::Result<Option<Cart>, crate::storage::StoreError> {
            Ok(None)
        }

        async fn save(&self, _cart: &Cart) -> std::result::Result<(), crate::storage::StoreError> {
            Err(crate::storage::StoreError::Backend("disk full".into()))
        }

        async fn clear(&self) -> std::result::Result<(), crate::storage::StoreError> {
            Ok(())
        }

        async fn cart_id(&self) -> std::result::Result<Option<String>, crate::storage::StoreError> {
            Ok(None)
        }
    }

    struct FixedPromo(i64);

    impl PromoGateway for FixedPromo {
        async fn evaluate(&self, _code: &str, _cart: &Cart) -> std::result::Result<i64, GatewayError> {
            Ok(self.0)
        }
    }

    async fn engine(pricing: FakePricing) -> CartEngine<MemoryStore, FakePricing> {
        CartEngine::load(MemoryStore::new(), pricing, CartConfig::default()).await
    }

    fn assert_invariants(cart: &Cart) {
        let expected_subtotal: i64 = cart.items.iter().map(|i| i.price * i64::from(i.quantity)).sum();
        let expected_count: u32 = cart.items.iter().map(|i| i.quantity).sum();
        assert_eq!(cart.subtotal, expected_subtotal);
        assert_eq!(cart.items_count, expected_count);
        assert_eq!(
            cart.total,
            (cart.subtotal + cart.shipping + cart.tax - cart.discount).max(0)
        );
    }

    #[tokio::test]
    async fn test_add_merges_duplicate_product_variant() {
        let engine = engine(FakePricing::new().with("P1_V1", 1_000, None)).await;
        engine.add_item("P1", Some("V1"), 2).await.unwrap();
        let cart = engine.add_item("P1", Some("V1"), 3).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_add_unknown_product_is_out_of_stock() {
        let engine = engine(FakePricing::new()).await;
        let err = engine.add_item("NOPE", None, 1).await.unwrap_err();
        assert_eq!(
            err,
            CartError::OutOfStock {
                product_id: "NOPE".into()
            }
        );
        assert!(engine.is_empty().await);
        assert_eq!(engine.last_error().await, Some(err));
    }

    #[tokio::test]
    async fn test_exceeding_stock_leaves_state_unchanged() {
        let engine = engine(FakePricing::new().with("P1", 1_000, Some(5))).await;
        engine.add_item("P1", None, 4).await.unwrap();
        let err = engine.add_item("P1", None, 3).await.unwrap_err();
        assert_eq!(err, CartError::QuantityExceedsStock { max_quantity: 5 });
        // No partial application to 5.
        let cart = engine.cart().await;
        assert_eq!(cart.items[0].quantity, 4);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_error_slot_cleared_on_next_success() {
        let engine = engine(FakePricing::new().with("P1", 1_000, Some(2))).await;
        engine.add_item("P1", None, 3).await.unwrap_err();
        assert!(engine.last_error().await.is_some());
        engine.add_item("P1", None, 1).await.unwrap();
        assert!(engine.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_update_quantity_zero_removes() {
        let engine = engine(FakePricing::new().with("P1", 1_000, None)).await;
        engine.add_item("P1", None, 2).await.unwrap();
        let cart = engine.update_quantity("P1", 0).await.unwrap();
        assert!(cart.items.is_empty());
        assert_eq!(cart.total, 0);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_update_quantity_clamps_to_stock() {
        let engine = engine(FakePricing::new().with("P1", 1_000, Some(5))).await;
        engine.add_item("P1", None, 1).await.unwrap();
        let cart = engine.update_quantity("P1", 9).await.unwrap();
        assert_eq!(cart.items[0].quantity, 5);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_update_unknown_item_fails() {
        let engine = engine(FakePricing::new()).await;
        let err = engine.update_quantity("ghost", 2).await.unwrap_err();
        assert_eq!(err, CartError::ItemNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let engine = engine(FakePricing::new().with("P1", 1_000, None)).await;
        engine.add_item("P1", None, 2).await.unwrap();
        let once = engine.remove_item("P1").await.unwrap();
        let twice = engine.remove_item("P1").await.unwrap();
        assert_eq!(once, twice);
        assert!(twice.items.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_do_not_lose_updates() {
        let engine = engine(
            FakePricing::new()
                .with("P1", 1_000, None)
                .with("P2", 2_000, None),
        )
        .await;
        let (a, b) = tokio::join!(
            engine.add_item("P1", None, 1),
            engine.add_item("P2", None, 1)
        );
        a.unwrap();
        b.unwrap();
        let cart = engine.cart().await;
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.subtotal, 3_000);
        assert_invariants(&cart);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_leaves_state_unchanged() {
        let pricing = FakePricing::new()
            .with("P1", 1_000, None)
            .delayed(Duration::from_secs(30));
        let engine = engine(pricing).await;
        let err = engine.add_item("P1", None, 1).await.unwrap_err();
        assert_eq!(err, CartError::GatewayTimeout);
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_subscribers_see_snapshots_in_order() {
        let engine = engine(
            FakePricing::new()
                .with("P1", 1_000, None)
                .with("P2", 2_000, None),
        )
        .await;
        let mut rx = engine.subscribe();
        engine.add_item("P1", None, 1).await.unwrap();
        engine.add_item("P2", None, 1).await.unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(second.items.len(), 2);
    }

    #[tokio::test]
    async fn test_loaded_cart_self_heals_totals_drift() {
        let store = MemoryStore::new();
        let mut stale = totals::empty_cart();
        stale.items.push(CartItem {
            id: "P1".into(),
            product_id: "P1".into(),
            variant_id: None,
            title: "Widget".into(),
            price: 1_000,
            quantity: 2,
            max_quantity: None,
        });
        // Derived fields left at zero on purpose: a stale persisted copy.
        store.save(&stale).await.unwrap();

        let engine = CartEngine::load(store, FakePricing::new(), CartConfig::default()).await;
        let cart = engine.cart().await;
        assert_eq!(cart.id, stale.id);
        assert_eq!(cart.subtotal, 2_000);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_failed_persistence_does_not_roll_back() {
        let pricing = FakePricing::new().with("P1", 1_000, None);
        let engine = CartEngine::load(FailingStore, pricing, CartConfig::default()).await;
        let cart = engine.add_item("P1", None, 2).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        // The mutation succeeded and the error slot stays clear; the write
        // failure is a log-only event.
        assert_eq!(engine.cart().await, cart);
        assert!(engine.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_storage_recovers_to_empty_cart() {
        let store = MemoryStore::new();
        store.seed_raw(r#"{"foo":1}"#).await;
        let engine = CartEngine::load(store, FakePricing::new(), CartConfig::default()).await;
        let cart = engine.cart().await;
        assert!(cart.items.is_empty());
        assert!(!cart.id.is_empty());
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_persisted_round_trip_survives_reload() {
        let store = MemoryStore::new();
        let pricing = FakePricing::new().with("P1", 1_000, None);
        let engine = CartEngine::load(store, pricing, CartConfig::default()).await;
        engine.add_item("P1", None, 2).await.unwrap();
        let before = engine.cart().await;

        // Hand the same backing store to a fresh engine, as on page reload.
        let CartEngine { store, .. } = engine;
        let reloaded =
            CartEngine::load(store, FakePricing::new(), CartConfig::default()).await;
        let after = reloaded.cart().await;
        assert_eq!(after.id, before.id);
        assert_eq!(after.items, before.items);
        assert_eq!(after.total, before.total);
    }

    #[tokio::test]
    async fn test_promo_discount_is_clamped_to_subtotal() {
        let pricing = FakePricing::new().with("P1", 1_000, None);
        let engine = CartEngine::load_with_promo(
            MemoryStore::new(),
            pricing,
            Some(FixedPromo(10_000)),
            CartConfig::default(),
        )
        .await;
        engine.add_item("P1", None, 3).await.unwrap();
        let cart = engine.apply_promo("WELCOME").await.unwrap();
        assert_eq!(cart.discount, 3_000);
        assert_eq!(cart.promo_code.as_deref(), Some("WELCOME"));
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_clear_resets_cart_but_keeps_id() {
        let pricing = FakePricing::new().with("P1", 1_000, None);
        let engine = CartEngine::load_with_promo(
            MemoryStore::new(),
            pricing,
            Some(FixedPromo(500)),
            CartConfig::default(),
        )
        .await;
        let mut rx = engine.subscribe();
        let before = engine.add_item("P1", None, 2).await.unwrap();
        engine.apply_promo("WELCOME").await.unwrap();

        let cart = engine.clear().await.unwrap();
        assert_eq!(cart.id, before.id);
        assert!(cart.items.is_empty());
        assert_eq!(cart.subtotal, 0);
        assert_eq!(cart.shipping, 0);
        assert_eq!(cart.discount, 0);
        assert_eq!(cart.total, 0);
        assert_eq!(cart.items_count, 0);
        assert_eq!(cart.promo_code, None);
        assert_invariants(&cart);

        // Subscribers see the add, the promo, then the empty snapshot.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        let last = rx.recv().await.unwrap();
        assert!(last.items.is_empty());
        assert_eq!(last.total, 0);

        // The emptied cart is what got persisted.
        let CartEngine { store, .. } = engine;
        let persisted = store.load().await.unwrap().unwrap();
        assert!(persisted.items.is_empty());
        assert_eq!(persisted.id, cart.id);
    }

    #[tokio::test]
    async fn test_promo_without_gateway_fails() {
        let engine = engine(FakePricing::new().with("P1", 1_000, None)).await;
        engine.add_item("P1", None, 1).await.unwrap();
        let err = engine.apply_promo("WELCOME").await.unwrap_err();
        assert!(matches!(err, CartError::GatewayUnavailable(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let engine = engine(FakePricing::new().with("P1", 1_000, None)).await;

        let cart = engine.add_item("P1", None, 2).await.unwrap();
        assert_eq!(cart.subtotal, 2_000);
        assert_eq!(cart.items_count, 2);
        assert_eq!(cart.shipping, 2_000);
        assert_eq!(cart.total, 4_000);

        let cart = engine.add_item("P1", None, 1).await.unwrap();
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.subtotal, 3_000);

        let cart = engine.update_quantity("P1", 0).await.unwrap();
        assert!(cart.items.is_empty());
        assert_eq!(cart.total, 0);
        assert_invariants(&cart);
    }

    #[tokio::test]
    async fn test_get_and_has_item() {
        let engine = engine(FakePricing::new().with("P1_V1", 500, None)).await;
        engine.add_item("P1", Some("V1"), 1).await.unwrap();
        assert!(engine.has_item("P1", Some("V1")).await);
        assert!(!engine.has_item("P1", None).await);
        let item = engine.get_item("P1", Some("V1")).await.unwrap();
        assert_eq!(item.price, 500);
        assert_eq!(engine.total_items().await, 1);
        assert!(!engine.is_loading());
    }
}
