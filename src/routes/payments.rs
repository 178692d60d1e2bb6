use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::payments::{
        InitiatePaymentRequest, PaymentInitiated, PaymentRecorded, PaymentWebhookRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/initiate", post(initiate))
}

/// Provider callback. Carries no bearer token.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = PaymentWebhookRequest,
    responses(
        (status = 200, description = "Payment outcome stored on the order", body = ApiResponse<PaymentRecorded>),
        (status = 404, description = "Order not found"),
    ),
    security(()),
    tag = "Payments"
)]
pub async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhookRequest>,
) -> AppResult<Json<ApiResponse<PaymentRecorded>>> {
    let resp = payment_service::handle_webhook(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/initiate",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Demo payment handle", body = ApiResponse<PaymentInitiated>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn initiate(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<InitiatePaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentInitiated>>> {
    let resp = payment_service::initiate_payment(&state, &user, payload).await?;
    Ok(Json(resp))
}
