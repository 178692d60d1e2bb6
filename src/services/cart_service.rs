use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, ModelTrait,
    QueryFilter, QuerySelect, Set, Statement,
    sea_query::{Expr, LockType, OnConflict},
};
use sea_orm::ActiveValue::NotSet;
use uuid::Uuid;

use crate::{
    audit,
    db,
    dto::cart::{AddToCartRequest, CartLineView, CartView, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartItem,
    response::ApiResponse,
    services::pricing::{self, PricedLine},
    state::AppState,
};

/// Upper bound for the quantity of a single cart line.
pub const MAX_LINE_QUANTITY: i32 = 1_000_000;

/// Quantity of a line after adding `added` to `existing`.
pub fn accumulate_quantity(existing: i32, added: i32) -> AppResult<i32> {
    if added <= 0 {
        return Err(AppError::InvalidQuantity);
    }
    existing
        .checked_add(added)
        .filter(|total| *total <= MAX_LINE_QUANTITY)
        .ok_or(AppError::InvalidQuantity)
}

fn validate_quantity(quantity: i32) -> AppResult<()> {
    if quantity <= 0 || quantity > MAX_LINE_QUANTITY {
        return Err(AppError::InvalidQuantity);
    }
    Ok(())
}

/// Resolves the storage rows for "the user's active cart". Storage should
/// never hold more than one; if it does, that is reported instead of
/// picking one.
pub fn single_active(mut carts: Vec<CartModel>) -> AppResult<Option<CartModel>> {
    match carts.len() {
        0 => Ok(None),
        1 => Ok(carts.pop()),
        _ => Err(AppError::MultipleActiveCarts),
    }
}

/// Loads the user's active cart, optionally taking a row lock on it for the
/// rest of the enclosing transaction.
pub async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    lock: bool,
) -> AppResult<Option<CartModel>> {
    let mut finder = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .filter(CartCol::Active.eq(true))
        .limit(2);
    if lock {
        finder = finder.lock(LockType::Update);
    }
    single_active(finder.all(conn).await?)
}

/// Get-or-create the active cart inside `txn` and lock it. The partial
/// unique index makes concurrent creators converge on one row.
async fn ensure_active_cart<C: ConnectionTrait>(txn: &C, user_id: Uuid) -> AppResult<CartModel> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        INSERT INTO carts (id, user_id, active)
        VALUES ($1, $2, TRUE)
        ON CONFLICT (user_id) WHERE active DO NOTHING
        "#,
        [Uuid::new_v4().into(), user_id.into()],
    ))
    .await?;

    // A concurrent checkout can retire the cart between the insert and the lock.
    find_active_cart(txn, user_id, true)
        .await?
        .ok_or(AppError::Conflict)
}

pub async fn get_active_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CartView>> {
    let cart = find_active_cart(&state.orm, user.user_id, false)
        .await?
        .ok_or(AppError::NotFound)?;

    let rows = cart
        .find_related(CartItems)
        .find_also_related(Products)
        .all(&state.orm)
        .await?;

    Ok(ApiResponse::single("OK", cart_view(cart.id, rows)?))
}

/// Prices cart lines at the current product prices. Every line must carry
/// its product.
fn cart_view(
    cart_id: Uuid,
    rows: Vec<(CartItemModel, Option<ProductModel>)>,
) -> AppResult<CartView> {
    let mut items = Vec::with_capacity(rows.len());
    let mut priced = Vec::with_capacity(rows.len());
    for (line, product) in rows {
        let product = product.ok_or(AppError::ProductNotFound)?;
        let priced_line = PricedLine {
            product_id: product.id,
            quantity: line.quantity,
            price: product.price,
        };
        items.push(CartLineView {
            id: line.id,
            product_id: product.id,
            product_name: product.name,
            quantity: line.quantity,
            unit_price: product.price,
            line_total: priced_line.line_total(),
        });
        priced.push(priced_line);
    }

    Ok(CartView {
        id: cart_id,
        subtotal: pricing::order_total(&priced),
        items,
    })
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    validate_quantity(payload.quantity)?;

    Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::ProductNotFound)?;

    let txn = db::begin(&state.orm).await?;
    let cart = ensure_active_cart(&txn, user.user_id).await?;

    // Adds to one cart are serialized by the row lock taken above.
    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?
        .map_or(0, |line| line.quantity);
    accumulate_quantity(existing, payload.quantity)?;

    let line = CartItemActive {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart.id),
        product_id: Set(payload.product_id),
        quantity: Set(payload.quantity),
        created_at: NotSet,
        updated_at: NotSet,
    };
    // Accumulate onto an existing line instead of overwriting it.
    let line = CartItems::insert(line)
        .on_conflict(
            OnConflict::columns([CartItemCol::CartId, CartItemCol::ProductId])
                .value(
                    CartItemCol::Quantity,
                    Expr::col((CartItems, CartItemCol::Quantity))
                        .add(Expr::cust("EXCLUDED.quantity")),
                )
                .value(CartItemCol::UpdatedAt, Expr::current_timestamp())
                .to_owned(),
        )
        .exec_with_returning(&txn)
        .await?;

    Carts::update_many()
        .col_expr(CartCol::Active, Expr::value(true))
        .col_expr(CartCol::UpdatedAt, Expr::current_timestamp().into())
        .filter(CartCol::Id.eq(cart.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::debug!(
        user_id = %user.user_id,
        cart_id = %cart.id,
        product_id = %payload.product_id,
        quantity = line.quantity,
        "cart line updated"
    );
    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Item added successfully.", cart_item_from_entity(line), None))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    validate_quantity(payload.quantity)?;

    let txn = db::begin(&state.orm).await?;
    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::NotFound)?;

    let line = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: CartItemActive = line.into();
    active.quantity = Set(payload.quantity);
    active.updated_at = Set(Utc::now().into());
    let line = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "product_id": product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::single("Cart item updated", cart_item_from_entity(line)))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = db::begin(&state.orm).await?;
    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::NotFound)?;

    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::single("Removed from cart", serde_json::json!({})))
}

pub async fn delete_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = db::begin(&state.orm).await?;
    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::NotFound)?;

    // Lines go with the cart through ON DELETE CASCADE.
    let cart_id = cart.id;
    let active: CartActive = cart.into();
    active.delete(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_delete",
        "carts",
        serde_json::json!({ "cart_id": cart_id }),
    )
    .await;

    Ok(ApiResponse::single("Cart deleted successfully.", serde_json::json!({})))
}

pub(crate) fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        product_id: model.product_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cart(user_id: Uuid) -> CartModel {
        let now = Utc::now().into();
        CartModel {
            id: Uuid::new_v4(),
            user_id,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_rows_means_no_active_cart() {
        assert!(single_active(vec![]).unwrap().is_none());
    }

    #[test]
    fn one_row_is_the_active_cart() {
        let user_id = Uuid::new_v4();
        let only = cart(user_id);
        let id = only.id;
        let found = single_active(vec![only]).unwrap().unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn duplicate_active_carts_are_reported() {
        let user_id = Uuid::new_v4();
        let err = single_active(vec![cart(user_id), cart(user_id)]).unwrap_err();
        assert!(matches!(err, AppError::MultipleActiveCarts));
    }

    #[test]
    fn accumulated_quantity_is_capped() {
        assert_eq!(accumulate_quantity(2, 3).unwrap(), 5);
        assert_eq!(accumulate_quantity(0, MAX_LINE_QUANTITY).unwrap(), MAX_LINE_QUANTITY);
        assert!(matches!(
            accumulate_quantity(MAX_LINE_QUANTITY, 1),
            Err(AppError::InvalidQuantity)
        ));
        assert!(matches!(
            accumulate_quantity(i32::MAX, 1),
            Err(AppError::InvalidQuantity)
        ));
        assert!(matches!(accumulate_quantity(1, 0), Err(AppError::InvalidQuantity)));
    }

    #[test]
    fn line_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(validate_quantity(0), Err(AppError::InvalidQuantity)));
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(AppError::InvalidQuantity)
        ));
    }

    fn line(cart_id: Uuid, product_id: Uuid, quantity: i32) -> CartItemModel {
        let now = Utc::now().into();
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id,
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cart_view_prices_lines() {
        let cart_id = Uuid::new_v4();
        let product = ProductModel {
            id: Uuid::new_v4(),
            name: "Mug".into(),
            description: None,
            price: dec!(4.25),
            created_at: Utc::now().into(),
        };
        let view = cart_view(cart_id, vec![(line(cart_id, product.id, 2), Some(product))]).unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].line_total, dec!(8.50));
        assert_eq!(view.subtotal, dec!(8.50));
    }

    #[test]
    fn cart_view_rejects_line_without_product() {
        let cart_id = Uuid::new_v4();
        let orphan = line(cart_id, Uuid::new_v4(), 1);
        assert!(matches!(
            cart_view(cart_id, vec![(orphan, None)]),
            Err(AppError::ProductNotFound)
        ));
    }

    #[test]
    fn entity_conversion_keeps_quantity() {
        let now = Utc::now();
        let line = cart_item_from_entity(CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 5,
            created_at: now.into(),
            updated_at: now.into(),
        });
        assert_eq!(line.quantity, 5);
        assert_eq!(line.created_at, now);
    }
}
