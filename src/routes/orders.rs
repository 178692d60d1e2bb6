use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        fulfillment::{CreateReturnRequest, CreateShipmentRequest},
        orders::{OrderList, OrderWithItems, PlacedOrder},
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Order, ReturnRequest, Shipment},
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{fulfillment_service, order_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/checkout", post(checkout))
        .route("/{id}", get(get_order))
        .route("/{id}/cancel", post(cancel_order))
        .route("/{id}/shipments", post(create_shipment))
        .route("/{id}/returns", post(create_return))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders of the current user", body = ApiResponse<OrderList>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/checkout",
    responses(
        (status = 201, description = "Active cart converted into an order", body = ApiResponse<PlacedOrder>),
        (status = 400, description = "Cart is empty or not found"),
        (status = 409, description = "Concurrent update conflict"),
        (status = 503, description = "Storage unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<ApiResponse<PlacedOrder>>)> {
    let resp = order_service::place_order(&state, &user).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with its line snapshot", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order canceled", body = ApiResponse<Order>),
        (status = 400, description = "Already canceled or not cancelable"),
        (status = 404, description = "Not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = order_service::cancel_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/shipments",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CreateShipmentRequest,
    responses(
        (status = 201, description = "Shipment recorded", body = ApiResponse<Shipment>),
        (status = 400, description = "Bad request or order cannot ship"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn create_shipment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateShipmentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Shipment>>)> {
    let resp = fulfillment_service::create_shipment(&state, &user, id, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/returns",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CreateReturnRequest,
    responses(
        (status = 201, description = "Return request submitted", body = ApiResponse<ReturnRequest>),
        (status = 400, description = "Reason is required"),
        (status = 404, description = "Not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn create_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateReturnRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ReturnRequest>>)> {
    let resp = fulfillment_service::create_return_request(&state, &user, id, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
