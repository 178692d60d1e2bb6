use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use shop_orders::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        fulfillment::{CreateReturnRequest, CreateShipmentRequest},
        payments::PaymentWebhookRequest,
    },
    entity::{
        CartItems, Carts, OrderItems, Orders,
        cart_items, carts, order_items, orders,
        products::{ActiveModel as ProductActive, Model as ProductModel},
    },
    error::AppError,
    middleware::auth::{ADMIN_ROLE, AuthUser},
    models::{OrderStatus, PaymentOutcome, PaymentStatus},
    routes::params::OrderListQuery,
    services::{cart_service, fulfillment_service, order_service, payment_service},
    state::AppState,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

// Returns None when no database is configured so the suite can run without one.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url, 5).await?;
    let orm = create_orm_conn(&database_url, 5).await?;
    MIGRATED
        .get_or_try_init(|| async { run_migrations(&orm).await })
        .await?;

    Ok(Some(AppState { pool, orm }))
}

fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "user".into(),
    }
}

fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: ADMIN_ROLE.into(),
    }
}

async fn create_product(state: &AppState, price: Decimal) -> anyhow::Result<ProductModel> {
    let id = Uuid::new_v4();
    let product = ProductActive {
        id: Set(id),
        name: Set(format!("Test Widget {id}")),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn add(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> anyhow::Result<()> {
    cart_service::add_to_cart(state, user, AddToCartRequest { product_id, quantity }).await?;
    Ok(())
}

async fn active_carts(state: &AppState, user: &AuthUser) -> anyhow::Result<u64> {
    let count = Carts::find()
        .filter(carts::Column::UserId.eq(user.user_id))
        .filter(carts::Column::Active.eq(true))
        .count(&state.orm)
        .await?;
    Ok(count)
}

#[tokio::test]
async fn checkout_snapshots_cart_into_pending_order() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(10.00)).await?;
    let gadget = create_product(&state, dec!(5.50)).await?;

    add(&state, &user, widget.id, 2).await?;
    add(&state, &user, gadget.id, 1).await?;
    let cart = cart_service::get_active_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.subtotal, dec!(25.50));

    let placed = order_service::place_order(&state, &user).await?.data.unwrap();
    assert_eq!(placed.total_amount, dec!(25.50));
    assert_eq!(placed.order.total_amount, dec!(25.50));
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(placed.items.len(), 2);
    let line_sum: Decimal = placed
        .items
        .iter()
        .map(|item| item.price * Decimal::from(item.quantity))
        .sum();
    assert_eq!(line_sum, placed.total_amount);

    // cart is emptied and retired
    assert_eq!(active_carts(&state, &user).await?, 0);
    let leftover = CartItems::find()
        .filter(cart_items::Column::CartId.eq(cart.id))
        .count(&state.orm)
        .await?;
    assert_eq!(leftover, 0);
    assert!(matches!(
        cart_service::get_active_cart(&state, &user).await,
        Err(AppError::NotFound)
    ));

    // the next add lazily opens a fresh cart
    add(&state, &user, widget.id, 1).await?;
    let fresh = cart_service::get_active_cart(&state, &user).await?.data.unwrap();
    assert_ne!(fresh.id, cart.id);
    assert_eq!(active_carts(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn order_lines_keep_price_at_checkout() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(4.00)).await?;
    add(&state, &user, widget.id, 3).await?;

    let placed = order_service::place_order(&state, &user).await?.data.unwrap();

    let mut repriced: ProductActive = widget.into();
    repriced.price = Set(dec!(9.99));
    repriced.update(&state.orm).await?;

    let stored = OrderItems::find()
        .filter(order_items::Column::OrderId.eq(placed.order_id))
        .all(&state.orm)
        .await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].price, dec!(4.00));
    assert_eq!(stored[0].quantity, 3);

    let order = Orders::find_by_id(placed.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(order.total_amount, dec!(12.00));

    Ok(())
}

#[tokio::test]
async fn checkout_without_lines_is_rejected_and_changes_nothing() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();

    assert!(matches!(
        order_service::place_order(&state, &user).await,
        Err(AppError::EmptyCart)
    ));

    // a cart that exists but holds no lines
    let widget = create_product(&state, dec!(1.00)).await?;
    add(&state, &user, widget.id, 1).await?;
    cart_service::remove_from_cart(&state, &user, widget.id).await?;

    assert!(matches!(
        order_service::place_order(&state, &user).await,
        Err(AppError::EmptyCart)
    ));
    assert_eq!(active_carts(&state, &user).await?, 1);
    let orders = Orders::find()
        .filter(orders::Column::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(orders, 0);

    Ok(())
}

#[tokio::test]
async fn adding_same_product_accumulates_on_one_line() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(2.00)).await?;

    add(&state, &user, widget.id, 2).await?;
    add(&state, &user, widget.id, 3).await?;

    let cart = cart_service::get_active_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(cart.subtotal, dec!(10.00));

    assert!(matches!(
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest { product_id: widget.id, quantity: 0 }
        )
        .await,
        Err(AppError::InvalidQuantity)
    ));
    assert!(matches!(
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest { product_id: Uuid::new_v4(), quantity: 1 }
        )
        .await,
        Err(AppError::ProductNotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_create_at_most_one_order() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(7.25)).await?;
    add(&state, &user, widget.id, 2).await?;

    let (first, second) = tokio::join!(
        order_service::place_order(&state, &user),
        order_service::place_order(&state, &user)
    );

    let successes = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    for result in [first, second] {
        if let Err(err) = result {
            assert!(
                matches!(err, AppError::EmptyCart | AppError::Conflict),
                "unexpected error: {err}"
            );
        }
    }

    let orders = Orders::find()
        .filter(orders::Column::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(orders, 1);

    Ok(())
}

#[tokio::test]
async fn cancel_is_only_allowed_once_and_before_shipping() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(3.00)).await?;

    add(&state, &user, widget.id, 1).await?;
    let first = order_service::place_order(&state, &user).await?.data.unwrap();

    let canceled = order_service::cancel_order(&state, &user, first.order_id).await?;
    assert_eq!(canceled.data.unwrap().status, OrderStatus::Canceled);
    assert!(matches!(
        order_service::cancel_order(&state, &user, first.order_id).await,
        Err(AppError::AlreadyCanceled)
    ));

    add(&state, &user, widget.id, 1).await?;
    let second = order_service::place_order(&state, &user).await?.data.unwrap();
    fulfillment_service::create_shipment(
        &state,
        &admin(),
        second.order_id,
        CreateShipmentRequest {
            tracking_number: "1Z999".into(),
            carrier: "UPS".into(),
        },
    )
    .await?;
    assert!(matches!(
        order_service::cancel_order(&state, &user, second.order_id).await,
        Err(AppError::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Canceled
        })
    ));

    // other users cannot see or cancel it
    assert!(matches!(
        order_service::cancel_order(&state, &customer(), second.order_id).await,
        Err(AppError::NotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn shipments_require_admin_and_a_shippable_order() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(3.00)).await?;
    add(&state, &user, widget.id, 1).await?;
    let placed = order_service::place_order(&state, &user).await?.data.unwrap();

    let request = || CreateShipmentRequest {
        tracking_number: "1Z999".into(),
        carrier: "UPS".into(),
    };
    assert!(matches!(
        fulfillment_service::create_shipment(&state, &user, placed.order_id, request()).await,
        Err(AppError::Forbidden)
    ));

    order_service::cancel_order(&state, &user, placed.order_id).await?;
    assert!(matches!(
        fulfillment_service::create_shipment(&state, &admin(), placed.order_id, request()).await,
        Err(AppError::InvalidTransition { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn webhook_records_payment_outcome() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    assert!(matches!(
        payment_service::record_payment_outcome(&state, Uuid::new_v4(), PaymentOutcome::Paid).await,
        Err(AppError::NotFound)
    ));

    let user = customer();
    let widget = create_product(&state, dec!(8.00)).await?;
    add(&state, &user, widget.id, 1).await?;
    let placed = order_service::place_order(&state, &user).await?.data.unwrap();

    let recorded = payment_service::handle_webhook(
        &state,
        PaymentWebhookRequest {
            order_id: placed.order_id,
            status: Some(PaymentOutcome::Failed),
        },
    )
    .await?;
    assert_eq!(recorded.data.unwrap().payment_status, PaymentStatus::Failed);

    // later outcomes overwrite earlier ones
    payment_service::record_payment_outcome(&state, placed.order_id, PaymentOutcome::Paid).await?;
    let order = Orders::find_by_id(placed.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::Pending);

    // without a status the demo provider picks one
    let simulated = payment_service::handle_webhook(
        &state,
        PaymentWebhookRequest {
            order_id: placed.order_id,
            status: None,
        },
    )
    .await?;
    assert_ne!(simulated.data.unwrap().payment_status, PaymentStatus::Unpaid);

    Ok(())
}

#[tokio::test]
async fn orders_are_listed_and_returns_need_a_reason() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(1.50)).await?;
    add(&state, &user, widget.id, 2).await?;
    let placed = order_service::place_order(&state, &user).await?.data.unwrap();

    let listed = order_service::list_orders(&state, &user, OrderListQuery::default()).await?;
    assert_eq!(listed.meta.unwrap().total, Some(1));
    assert_eq!(listed.data.unwrap().items[0].id, placed.order_id);

    let detail = order_service::get_order(&state, &user, placed.order_id).await?.data.unwrap();
    assert_eq!(detail.items.len(), 1);

    assert!(matches!(
        fulfillment_service::create_return_request(
            &state,
            &user,
            placed.order_id,
            CreateReturnRequest { reason: "  ".into() }
        )
        .await,
        Err(AppError::BadRequest(_))
    ));
    let created = fulfillment_service::create_return_request(
        &state,
        &user,
        placed.order_id,
        CreateReturnRequest { reason: "Wrong size".into() },
    )
    .await?;
    assert_eq!(created.data.unwrap().status, "Requested");

    Ok(())
}

#[tokio::test]
async fn accumulated_quantity_past_the_cap_is_invalid() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(0.01)).await?;

    add(&state, &user, widget.id, cart_service::MAX_LINE_QUANTITY).await?;
    assert!(matches!(
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest { product_id: widget.id, quantity: 1 }
        )
        .await,
        Err(AppError::InvalidQuantity)
    ));
    assert!(matches!(
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest { product_id: widget.id, quantity: i32::MAX }
        )
        .await,
        Err(AppError::InvalidQuantity)
    ));

    let cart = cart_service::get_active_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items[0].quantity, cart_service::MAX_LINE_QUANTITY);

    Ok(())
}

#[tokio::test]
async fn order_total_may_exceed_product_price_precision() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let premium = create_product(&state, dec!(99999999.99)).await?;
    add(&state, &user, premium.id, 2).await?;

    let placed = order_service::place_order(&state, &user).await?.data.unwrap();
    assert_eq!(placed.total_amount, dec!(199999999.98));

    let order = Orders::find_by_id(placed.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(order.total_amount, dec!(199999999.98));

    Ok(())
}

#[tokio::test]
async fn update_item_replaces_quantity() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(2.00)).await?;
    add(&state, &user, widget.id, 4).await?;

    let updated = cart_service::update_cart_item(
        &state,
        &user,
        widget.id,
        UpdateCartItemRequest { quantity: 1 },
    )
    .await?;
    assert_eq!(updated.data.unwrap().quantity, 1);

    let cart = cart_service::get_active_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 1);
    assert_eq!(cart.subtotal, dec!(2.00));

    assert!(matches!(
        cart_service::update_cart_item(
            &state,
            &user,
            widget.id,
            UpdateCartItemRequest { quantity: 0 }
        )
        .await,
        Err(AppError::InvalidQuantity)
    ));
    assert!(matches!(
        cart_service::update_cart_item(
            &state,
            &user,
            Uuid::new_v4(),
            UpdateCartItemRequest { quantity: 2 }
        )
        .await,
        Err(AppError::NotFound)
    ));
    // no cart at all
    assert!(matches!(
        cart_service::update_cart_item(
            &state,
            &customer(),
            widget.id,
            UpdateCartItemRequest { quantity: 2 }
        )
        .await,
        Err(AppError::NotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn removing_missing_line_is_not_found() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(2.00)).await?;
    add(&state, &user, widget.id, 1).await?;

    assert!(matches!(
        cart_service::remove_from_cart(&state, &user, Uuid::new_v4()).await,
        Err(AppError::NotFound)
    ));
    cart_service::remove_from_cart(&state, &user, widget.id).await?;
    assert!(matches!(
        cart_service::remove_from_cart(&state, &user, widget.id).await,
        Err(AppError::NotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn delete_cart_removes_its_lines() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(2.00)).await?;
    let gadget = create_product(&state, dec!(3.00)).await?;
    add(&state, &user, widget.id, 1).await?;
    add(&state, &user, gadget.id, 2).await?;
    let cart = cart_service::get_active_cart(&state, &user).await?.data.unwrap();

    cart_service::delete_cart(&state, &user).await?;

    assert!(Carts::find_by_id(cart.id).one(&state.orm).await?.is_none());
    let leftover = CartItems::find()
        .filter(cart_items::Column::CartId.eq(cart.id))
        .count(&state.orm)
        .await?;
    assert_eq!(leftover, 0);
    assert!(matches!(
        cart_service::delete_cart(&state, &user).await,
        Err(AppError::NotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn listing_far_past_the_last_page_is_empty() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = customer();
    let widget = create_product(&state, dec!(1.00)).await?;
    add(&state, &user, widget.id, 1).await?;
    order_service::place_order(&state, &user).await?;

    let query = OrderListQuery {
        page: Some(i64::MAX),
        ..Default::default()
    };
    let listed = order_service::list_orders(&state, &user, query).await?;
    assert!(listed.data.unwrap().items.is_empty());
    assert_eq!(listed.meta.unwrap().total, Some(1));

    Ok(())
}
