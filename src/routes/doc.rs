use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartLineView, CartView, UpdateCartItemRequest},
        fulfillment::{CreateReturnRequest, CreateShipmentRequest},
        orders::{OrderList, OrderWithItems, PlacedOrder},
        payments::{
            InitiatePaymentRequest, PaymentInitiated, PaymentRecorded, PaymentWebhookRequest,
        },
    },
    models::{
        CartItem, Order, OrderItem, OrderStatus, PaymentOutcome, PaymentStatus, ReturnRequest,
        Shipment,
    },
    response::{ApiResponse, Meta},
    routes::{cart, health, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::readiness,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::delete_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::cancel_order,
        orders::create_shipment,
        orders::create_return,
        payments::webhook,
        payments::initiate
    ),
    components(
        schemas(
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            PaymentOutcome,
            Shipment,
            ReturnRequest,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartView,
            CartLineView,
            PlacedOrder,
            OrderList,
            OrderWithItems,
            CreateShipmentRequest,
            CreateReturnRequest,
            InitiatePaymentRequest,
            PaymentInitiated,
            PaymentWebhookRequest,
            PaymentRecorded,
            params::Pagination,
            params::SortOrder,
            params::OrderListQuery,
            health::HealthData,
            Meta,
            ApiResponse<CartView>,
            ApiResponse<PlacedOrder>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Cart", description = "Active cart endpoints"),
        (name = "Orders", description = "Checkout and order lifecycle endpoints"),
        (name = "Fulfillment", description = "Shipment and return endpoints"),
        (name = "Payments", description = "Payment provider endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
