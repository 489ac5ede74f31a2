//! Domain model
pub mod cart;
pub mod totals;

pub use cart::{Cart, CartItem};
