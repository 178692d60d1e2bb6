use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, Set};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit,
    db,
    dto::fulfillment::{CreateReturnRequest, CreateShipmentRequest},
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        return_requests::{ActiveModel as ReturnActive, Model as ReturnModel},
        shipments::{ActiveModel as ShipmentActive, Model as ShipmentModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{ReturnRequest, Shipment},
    response::ApiResponse,
    state::AppState,
};

const SHIPMENT_SHIPPED: &str = "Shipped";
const RETURN_REQUESTED: &str = "Requested";

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub async fn create_shipment(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: CreateShipmentRequest,
) -> AppResult<ApiResponse<Shipment>> {
    ensure_admin(user)?;
    let tracking_number = required("tracking_number", &payload.tracking_number)?;
    let carrier = required("carrier", &payload.carrier)?;

    let txn = db::begin(&state.orm).await?;

    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let next = order.status.ship()?;
    let now = Utc::now();

    let shipment = ShipmentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        tracking_number: Set(tracking_number),
        carrier: Set(carrier),
        status: Set(SHIPMENT_SHIPPED.to_string()),
        shipped_at: Set(Some(now.into())),
        delivered_at: Set(None),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut active: OrderActive = order.into();
    active.status = Set(next);
    active.updated_at = Set(now.into());
    active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(order_id = %order_id, shipment_id = %shipment.id, "shipment created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "shipment_create",
        "shipments",
        serde_json::json!({ "order_id": order_id, "shipment_id": shipment.id }),
    )
    .await;

    Ok(ApiResponse::single(
        "Shipment created successfully.",
        shipment_from_entity(shipment),
    ))
}

pub async fn create_return_request(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: CreateReturnRequest,
) -> AppResult<ApiResponse<ReturnRequest>> {
    let reason = required("reason", &payload.reason)?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(order_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let request = ReturnActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        reason: Set(reason),
        status: Set(RETURN_REQUESTED.to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "return_request",
        "return_requests",
        serde_json::json!({ "order_id": order.id, "return_id": request.id }),
    )
    .await;

    Ok(ApiResponse::single(
        "Return request submitted.",
        return_from_entity(request),
    ))
}

fn shipment_from_entity(model: ShipmentModel) -> Shipment {
    Shipment {
        id: model.id,
        order_id: model.order_id,
        tracking_number: model.tracking_number,
        carrier: model.carrier,
        status: model.status,
        shipped_at: model.shipped_at.map(|t| t.with_timezone(&Utc)),
        delivered_at: model.delivered_at.map(|t| t.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn return_from_entity(model: ReturnModel) -> ReturnRequest {
    ReturnRequest {
        id: model.id,
        order_id: model.order_id,
        reason: model.reason,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
