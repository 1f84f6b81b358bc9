//! Checkout lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::CheckoutId;
use domain::{CheckoutItem, CheckoutSession, NewCheckoutItem, ShippingAddress};
use saga::CallContext;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct InitiateCheckoutRequest {
    pub user_id: String,
    pub items: Vec<CheckoutItemRequest>,
    pub currency: String,
}

#[derive(Deserialize)]
pub struct CheckoutItemRequest {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub quantity: u32,
}

impl From<CheckoutItemRequest> for NewCheckoutItem {
    fn from(item: CheckoutItemRequest) -> Self {
        NewCheckoutItem {
            product_id: item.product_id,
            variant_id: item.variant_id,
            name: item.name,
            sku: item.sku,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

#[derive(Deserialize)]
pub struct SetPaymentMethodRequest {
    pub payment_method: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<CheckoutItemResponse>,
    pub currency: String,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub shipping_amount: i64,
    pub total_amount: i64,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: Option<String>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CheckoutItemResponse {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub quantity: u32,
    pub reservation_id: Option<String>,
}

impl From<&CheckoutItem> for CheckoutItemResponse {
    fn from(item: &CheckoutItem) -> Self {
        Self {
            product_id: item.product_id.as_str().to_string(),
            variant_id: item.variant_id.as_str().to_string(),
            name: item.name.clone(),
            sku: item.sku.clone(),
            price: item.price.minor_units(),
            quantity: item.quantity,
            reservation_id: item.reservation_id.clone(),
        }
    }
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            id: session.id.to_string(),
            user_id: session.user_id.as_str().to_string(),
            status: session.status.as_str().to_string(),
            items: session.items.iter().map(CheckoutItemResponse::from).collect(),
            currency: session.currency.as_str().to_string(),
            subtotal_amount: session.subtotal_amount.minor_units(),
            discount_amount: session.discount_amount.minor_units(),
            shipping_amount: session.shipping_amount.minor_units(),
            total_amount: session.total_amount.minor_units(),
            shipping_address: session.shipping_address,
            payment_method: session.payment_method.map(|method| method.as_str().to_string()),
            order_id: session.order_id,
            payment_id: session.payment_id,
            failure_reason: session.failure_reason,
            expires_at: session.expires_at,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

// -- Helpers --

fn parse_checkout_id(id: &str) -> Result<CheckoutId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid checkout ID: {id}")))
}

// -- Handlers --

/// POST /checkouts — opens a new checkout session.
pub async fn initiate(
    State(state): State<AppState>,
    Json(req): Json<InitiateCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let items = req.items.into_iter().map(NewCheckoutItem::from).collect();
    let session = state
        .orchestrator
        .initiate_checkout(&req.user_id, items, &req.currency)
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

/// GET /checkouts/{id} — returns the stored session.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let session = state.orchestrator.get_checkout(id).await?;
    Ok(Json(session.into()))
}

/// PUT /checkouts/{id}/shipping-address — sets or replaces the address.
pub async fn set_shipping_address(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(address): Json<ShippingAddress>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let session = state
        .orchestrator
        .set_shipping_address(id, address)
        .await?;
    Ok(Json(session.into()))
}

/// PUT /checkouts/{id}/payment-method — sets or replaces the payment method.
pub async fn set_payment_method(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetPaymentMethodRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let session = state
        .orchestrator
        .set_payment_method(id, &req.payment_method)
        .await?;
    Ok(Json(session.into()))
}

/// POST /checkouts/{id}/process — runs the checkout saga.
///
/// The saga runs on its own task. If the client goes away the handler future
/// is dropped, the guard cancels the context and the remaining forward steps
/// abort while compensation still completes on the spawned task.
pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;

    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let ctx = CallContext::with_cancellation(token);

    let orchestrator = Arc::clone(&state.orchestrator);
    let session = tokio::spawn(async move { orchestrator.process_checkout_with(id, &ctx).await })
        .await
        .map_err(|e| ApiError::Internal(format!("checkout task failed: {e}")))??;

    Ok(Json(session.into()))
}

/// POST /checkouts/{id}/cancel — cancels an open session.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let id = parse_checkout_id(&id)?;
    let session = state.orchestrator.cancel_checkout(id).await?;
    Ok(Json(session.into()))
}
