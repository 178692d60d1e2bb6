use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShipmentRequest {
    pub tracking_number: String,
    pub carrier: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReturnRequest {
    pub reason: String,
}
