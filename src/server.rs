//! HTTP surface for the cart engine, one cart per session path segment.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domain::cart::Cart;
use crate::error::CartError;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/cart/:session", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items", post(add_item))
        .route(
            "/api/v1/cart/:session/items/:item_id",
            put(update_item).delete(remove_item),
        )
        .route("/api/v1/cart/:session/promo", post(apply_promo))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "storefront-cart"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct PromoRequest {
    pub code: String,
}

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Json<Cart> {
    let engine = s.sessions.get_or_create(&session).await;
    Json(engine.cart().await)
}

async fn add_item(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<Cart>), ApiError> {
    let engine = s.sessions.get_or_create(&session).await;
    let cart = engine
        .add_item(
            &req.product_id,
            req.variant_id.as_deref(),
            req.quantity.unwrap_or(1),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

async fn update_item(
    State(s): State<AppState>,
    Path((session, item_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<Cart>, ApiError> {
    let engine = s.sessions.get_or_create(&session).await;
    Ok(Json(engine.update_quantity(&item_id, req.quantity).await?))
}

async fn remove_item(
    State(s): State<AppState>,
    Path((session, item_id)): Path<(String, String)>,
) -> Result<Json<Cart>, ApiError> {
    let engine = s.sessions.get_or_create(&session).await;
    Ok(Json(engine.remove_item(&item_id).await?))
}

async fn clear_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Cart>, ApiError> {
    let engine = s.sessions.get_or_create(&session).await;
    Ok(Json(engine.clear().await?))
}

async fn apply_promo(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<PromoRequest>,
) -> Result<Json<Cart>, ApiError> {
    let engine = s.sessions.get_or_create(&session).await;
    Ok(Json(engine.apply_promo(&req.code).await?))
}

/// Wire shape for rejected mutations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_quantity: Option<u32>,
}

pub struct ApiError(CartError);

impl From<CartError> for ApiError {
    fn from(e: CartError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, max_quantity) = match &self.0 {
            CartError::ValidationFailed(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", None)
            }
            CartError::OutOfStock { .. } => (StatusCode::CONFLICT, "out_of_stock", None),
            CartError::QuantityExceedsStock { max_quantity } => (
                StatusCode::CONFLICT,
                "quantity_exceeds_stock",
                Some(*max_quantity),
            ),
            CartError::ItemNotFound(_) => (StatusCode::NOT_FOUND, "item_not_found", None),
            CartError::GatewayTimeout => (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", None),
            CartError::GatewayUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "gateway_unavailable", None)
            }
            CartError::StorageCorrupted(_) | CartError::StorageWriteFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
        };
        let body = ErrorBody {
            error: kind,
            message: self.0.to_string(),
            max_quantity,
        };
        (status, Json(body)).into_response()
    }
}
