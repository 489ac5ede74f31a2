//! Cart aggregate: the line items plus derived monetary totals for one
//! shopper session.
//!
//! Derived fields (`subtotal`, `shipping`, `tax`, `discount`, `total`,
//! `items_count`) are never set directly; every mutation path flows through
//! [`crate::domain::totals::update_totals`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Serialized with camelCase keys to stay byte-compatible with the cart
/// payloads the storefront UI already persists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub items: Vec<CartItem>,
    pub subtotal: i64,
    #[serde(default)]
    pub shipping: i64,
    #[serde(default)]
    pub tax: i64,
    #[serde(default)]
    pub discount: i64,
    pub total: i64,
    pub items_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_item(&self, item_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Deterministic merge key, see [`item_id`]. Adding the same
    /// product+variant twice targets this entry instead of duplicating it.
    pub id: String,
    #[validate(length(min = 1, message = "product id must not be empty"))]
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    pub price: i64,
    #[validate(range(min = 1, message = "quantity must be greater than 0"))]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<u32>,
}

impl CartItem {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }

    /// Collects every violated rule, in field order, as human-readable
    /// strings so the caller can report all problems at once.
    pub fn check(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Err(violations) = Validate::validate(self) {
            let fields = violations.field_errors();
            for field in ["product_id", "title", "quantity", "price"] {
                if let Some(field_errors) = fields.get(&field) {
                    for err in *field_errors {
                        errors.push(match &err.message {
                            Some(msg) => msg.to_string(),
                            None => format!("invalid {field}"),
                        });
                    }
                }
            }
        }
        if let Some(max) = self.max_quantity {
            if self.quantity > max {
                errors.push(format!("quantity cannot exceed {max}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Identity of a cart line is a function of product + variant, not a random
/// key. `item_id("P1", Some("V2"))` == `"P1_V2"`, `item_id("P1", None)` ==
/// `"P1"`.
pub fn item_id(product_id: &str, variant_id: Option<&str>) -> String {
    match variant_id {
        Some(variant) => format!("{product_id}_{variant}"),
        None => product_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: u32) -> CartItem {
        CartItem {
            id: item_id("P1", None),
            product_id: "P1".into(),
            variant_id: None,
            title: "Widget".into(),
            price: 1_000,
            quantity,
            max_quantity: None,
        }
    }

    #[test]
    fn test_item_id_derivation() {
        assert_eq!(item_id("P1", Some("V2")), "P1_V2");
        assert_eq!(item_id("P1", None), "P1");
    }

    #[test]
    fn test_valid_item_passes() {
        assert!(item(2).check().is_ok());
    }

    #[test]
    fn test_check_reports_all_violations() {
        let bad = CartItem {
            id: "x".into(),
            product_id: String::new(),
            variant_id: None,
            title: String::new(),
            price: -1,
            quantity: 0,
            max_quantity: None,
        };
        let errors = bad.check().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("product id")));
        assert!(errors.iter().any(|e| e.contains("title")));
        assert!(errors.iter().any(|e| e.contains("quantity")));
        assert!(errors.iter().any(|e| e.contains("price")));
    }

    #[test]
    fn test_check_enforces_max_quantity() {
        let mut over = item(7);
        over.max_quantity = Some(5);
        let errors = over.check().unwrap_err();
        assert_eq!(errors, vec!["quantity cannot exceed 5".to_string()]);
    }

    #[test]
    fn test_line_total() {
        assert_eq!(item(3).line_total(), 3_000);
    }
}
