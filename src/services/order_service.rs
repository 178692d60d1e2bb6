use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, JoinType, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit,
    db,
    dto::orders::{OrderList, OrderWithItems, PlacedOrder},
    entity::{
        cart_items::{self, Column as CartCol, Entity as CartItems},
        carts::ActiveModel as CartActive,
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::Column as ProdCol,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::find_active_cart,
        pricing::{self, PricedLine},
    },
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Converts the caller's active cart into an order.
///
/// Runs as one unit of work: the cart row is locked, every line is priced
/// at the product's current price, the order and its line snapshot are
/// written, and the cart is emptied and retired. Any error rolls all of it
/// back. A concurrent checkout of the same cart waits on the row lock and
/// then finds no active cart.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<PlacedOrder>> {
    let txn = db::begin(&state.orm).await?;

    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::EmptyCart)?;

    let lines = CartItems::find()
        .select_only()
        .column(CartCol::ProductId)
        .column(CartCol::Quantity)
        .column_as(ProdCol::Price, "price")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartCol::CartId.eq(cart.id))
        .order_by_asc(CartCol::CreatedAt)
        .into_model::<PricedLine>()
        .all(&txn)
        .await?;

    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let total_amount = pricing::order_total(&lines);
    let order_id = Uuid::new_v4();

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        tax: Set(None),
        shipping_amount: Set(None),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::Unpaid),
        invoice_number: Set(build_invoice_number(order_id)),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;

        order_items.push(order_item_from_entity(item));
    }

    // clear and retire the cart; the next add creates a fresh one
    CartItems::delete_many()
        .filter(CartCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    let cart_id = cart.id;
    let mut retired: CartActive = cart.into();
    retired.active = Set(false);
    retired.updated_at = Set(Utc::now().into());
    retired.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.user_id,
        cart_id = %cart_id,
        lines = order_items.len(),
        total_amount = %total_amount,
        "order placed"
    );
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "cart_id": cart_id }),
    )
    .await;

    Ok(ApiResponse::single(
        "Order created successfully.",
        PlacedOrder {
            order_id: order.id,
            total_amount,
            order: order_from_entity(order),
            items: order_items,
        },
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let txn = db::begin(&state.orm).await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let next = order.status.cancel()?;

    let mut active: OrderActive = order.into();
    active.status = Set(next);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(order_id = %order.id, user_id = %user.user_id, "order canceled");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::single(
        "Order canceled successfully.",
        order_from_entity(order),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::single(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
    ))
}

pub(crate) fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        tax: model.tax,
        shipping_amount: model.shipping_amount,
        status: model.status,
        payment_status: model.payment_status,
        invoice_number: model.invoice_number,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn build_invoice_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    let short = &suffix[..8];
    format!("INV-{}-{}", date, short)
}
