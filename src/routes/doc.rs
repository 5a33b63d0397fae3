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
        admin::{AdminProduct, AdminProductList, ProductStatusRequest, Uploader},
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        categories::{CategoryList, CreateCategoryRequest},
        leads::{LeadInput, LeadList, UpsertSummary},
        orders::{
            CancelOrderRequest, CheckoutItem, CheckoutRequest, Invoice, InvoiceLine, MessageList,
            OrderList, OrderWithItems, PayOrderRequest, PostMessageRequest, ShippingAddress,
            UpdateOrderStatusRequest,
        },
        products::{
            CreateProductRequest, ProductDetail, ProductList, ReviewSummary, UpdateProductRequest,
        },
        reviews::{CreateReviewRequest, ReviewList},
        seller::{SellerDashboard, UpsertSellerProfileRequest},
    },
    leads::Lead,
    middleware::csrf::{self, CsrfToken},
    models::{
        AccountType, Category, Order, OrderItem, OrderMessage, OrderStatus, OrderStatusEvent,
        Product, Review, Role, SellerProfile, User,
    },
    response::{ApiResponse, Meta},
    routes::{admin, auth, categories, health, leads, orders, params, products, seller},
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
        csrf::issue_token,
        auth::login,
        auth::register,
        categories::list_categories,
        products::list_products,
        products::get_product,
        products::list_reviews,
        products::create_review,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::pay_order,
        orders::cancel_order,
        orders::list_messages,
        orders::post_message,
        orders::get_invoice,
        seller::dashboard,
        seller::upsert_profile,
        seller::list_products,
        seller::create_product,
        seller::update_product,
        seller::delete_product,
        seller::list_orders,
        seller::update_order_status,
        admin::list_products,
        admin::export_products,
        admin::set_product_status,
        admin::list_low_stock,
        admin::list_all_orders,
        admin::update_order_status,
        admin::create_category,
        leads::list_leads,
        leads::upsert_leads
    ),
    components(
        schemas(
            User,
            Role,
            AccountType,
            SellerProfile,
            Category,
            Product,
            Order,
            OrderItem,
            OrderStatus,
            OrderStatusEvent,
            OrderMessage,
            Review,
            Lead,
            CsrfToken,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateCategoryRequest,
            CategoryList,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            ProductDetail,
            ReviewSummary,
            CreateReviewRequest,
            ReviewList,
            CheckoutItem,
            ShippingAddress,
            CheckoutRequest,
            PayOrderRequest,
            CancelOrderRequest,
            UpdateOrderStatusRequest,
            PostMessageRequest,
            OrderWithItems,
            OrderList,
            MessageList,
            Invoice,
            InvoiceLine,
            UpsertSellerProfileRequest,
            SellerDashboard,
            ProductStatusRequest,
            Uploader,
            AdminProduct,
            AdminProductList,
            LeadInput,
            LeadList,
            UpsertSummary,
            params::Pagination,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<AdminProductList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Security", description = "CSRF token issuing"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Reviews", description = "Product review endpoints"),
        (name = "Orders", description = "Checkout and order tracking endpoints"),
        (name = "Seller", description = "Seller dashboard endpoints"),
        (name = "Admin", description = "Admin moderation endpoints"),
        (name = "Leads", description = "Lead list endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
