//! Derived-field computation.
//!
//! Stateless, deterministic functions over the item list. [`update_totals`]
//! is the single choke point: no other code assigns `subtotal`, `shipping`,
//! `tax`, `total` or `items_count`. Reapplying it to an already-consistent
//! cart is a no-op (apart from `updated_at`).

use chrono::Utc;
use uuid::Uuid;

use crate::config::CartConfig;
use crate::domain::cart::{Cart, CartItem};

pub fn subtotal(items: &[CartItem]) -> i64 {
    items.iter().map(CartItem::line_total).sum()
}

pub fn items_count(items: &[CartItem]) -> u32 {
    items.iter().map(|i| i.quantity).sum()
}

/// Step function with a single breakpoint: free at/above the configured
/// threshold, flat fee below it. An empty cart ships for free.
pub fn shipping(subtotal: i64, config: &CartConfig) -> i64 {
    if subtotal == 0 || subtotal >= config.free_shipping_threshold {
        0
    } else {
        config.shipping_fee
    }
}

/// Tax policy hook. Currently a deliberate zero: jurisdiction-based tax is
/// computed downstream at order time, not in the cart.
pub fn tax(_subtotal: i64) -> i64 {
    0
}

/// Discounts can never push the total below zero nor exceed the subtotal.
pub fn clamp_discount(discount: i64, subtotal: i64) -> i64 {
    discount.clamp(0, subtotal)
}

pub fn total(subtotal: i64, shipping: i64, tax: i64, discount: i64) -> i64 {
    (subtotal + shipping + tax - discount).max(0)
}

/// Builds a zeroed cart skeleton with a fresh id. UUIDv7 gives the
/// timestamp-plus-random identifier the cart needs; this is not a security
/// boundary, only a collision-resistant key.
pub fn empty_cart() -> Cart {
    let now = Utc::now();
    Cart {
        id: generate_cart_id(),
        items: Vec::new(),
        subtotal: 0,
        shipping: 0,
        tax: 0,
        discount: 0,
        total: 0,
        items_count: 0,
        promo_code: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn generate_cart_id() -> String {
    Uuid::now_v7().to_string()
}

/// Recomputes every derived field from `items`, preserving the applied
/// discount, and refreshes `updated_at`.
pub fn update_totals(mut cart: Cart, config: &CartConfig) -> Cart {
    let subtotal = subtotal(&cart.items);
    let shipping = shipping(subtotal, config);
    let tax = tax(subtotal);
    let discount = clamp_discount(cart.discount, subtotal);
    cart.subtotal = subtotal;
    cart.shipping = shipping;
    cart.tax = tax;
    cart.discount = discount;
    cart.total = total(subtotal, shipping, tax, discount);
    cart.items_count = items_count(&cart.items);
    cart.updated_at = Utc::now();
    cart
}
