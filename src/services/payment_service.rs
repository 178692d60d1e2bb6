use chrono::Utc;
use rand::Rng;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit,
    dto::payments::{
        InitiatePaymentRequest, PaymentInitiated, PaymentRecorded, PaymentWebhookRequest,
    },
    entity::orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::PaymentOutcome,
    response::ApiResponse,
    state::AppState,
};

/// Stores the provider's verdict on the order. The latest outcome wins;
/// fulfillment status is left alone.
pub async fn record_payment_outcome(
    state: &AppState,
    order_id: Uuid,
    outcome: PaymentOutcome,
) -> AppResult<ApiResponse<PaymentRecorded>> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let previous = order.payment_status;
    let mut active: OrderActive = order.into();
    active.payment_status = Set(outcome.into());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    tracing::info!(
        order_id = %order.id,
        previous = ?previous,
        payment_status = ?order.payment_status,
        "payment outcome recorded"
    );
    audit::record(
        &state.pool,
        None,
        "payment_webhook",
        "orders",
        serde_json::json!({ "order_id": order.id, "payment_status": order.payment_status }),
    )
    .await;

    Ok(ApiResponse::single(
        "Payment status updated.",
        PaymentRecorded {
            order_id: order.id,
            payment_status: order.payment_status,
        },
    ))
}

pub async fn handle_webhook(
    state: &AppState,
    payload: PaymentWebhookRequest,
) -> AppResult<ApiResponse<PaymentRecorded>> {
    let outcome = match payload.status {
        Some(outcome) => outcome,
        None => PaymentOutcome::simulate(&mut rand::thread_rng()),
    };
    record_payment_outcome(state, payload.order_id, outcome).await
}

/// Demo provider handshake. Nothing is persisted; the order only changes
/// once the webhook reports back.
pub async fn initiate_payment(
    state: &AppState,
    user: &AuthUser,
    payload: InitiatePaymentRequest,
) -> AppResult<ApiResponse<PaymentInitiated>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(payload.order_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let payment_id = demo_payment_id(&mut rand::thread_rng());
    tracing::debug!(order_id = %order.id, payment_id = %payment_id, "payment initiated");

    Ok(ApiResponse::single(
        "Payment initiated.",
        PaymentInitiated {
            payment_id,
            order_id: order.id,
        },
    ))
}

fn demo_payment_id<R: Rng>(rng: &mut R) -> String {
    format!("demo_{}", rng.gen_range(1000..=9999))
}
