use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{PaymentOutcome, PaymentStatus};

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentInitiated {
    pub payment_id: String,
    pub order_id: Uuid,
}

/// Provider callback. Without `status` the demo provider picks one.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentWebhookRequest {
    pub order_id: Uuid,
    pub status: Option<PaymentOutcome>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentRecorded {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
}
