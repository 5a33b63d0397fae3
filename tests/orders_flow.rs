use std::{sync::Arc, time::Duration};

use marketplace_api::{
    config::AppConfig,
    db::{create_pool, orm_from_pool, run_migrations},
    dto::{
        orders::{
            CancelOrderRequest, CheckoutItem, CheckoutRequest, PayOrderRequest, PostMessageRequest,
            ShippingAddress, UpdateOrderStatusRequest,
        },
        products::CreateProductRequest,
        reviews::CreateReviewRequest,
        seller::UpsertSellerProfileRequest,
    },
    entity::{products::Entity as Products, users::ActiveModel as UserActive},
    error::AppError,
    leads::LeadStore,
    middleware::{auth::AuthUser, cache::ResponseCache},
    models::{AccountType, OrderStatus},
    routes::params::{AdminProductQuery, LowStockQuery, OrderListQuery, Pagination},
    services::{admin_service, order_service, review_service, seller_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

// Integration flow: seller lists a product -> buyer checks out -> seller confirms -> buyer pays
// and reviews; a second order is cancelled and restocked; admin sees it all.
#[tokio::test]
async fn checkout_fulfil_cancel_and_moderate_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL to run integration flow tests.");
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let seller = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "buyer").await?;
    let stranger = create_user(&state, "buyer").await?;
    let admin = create_user(&state, "admin").await?;

    seller_service::upsert_profile(
        &state,
        &seller,
        UpsertSellerProfileRequest {
            business_name: "Flow Test Supplies".into(),
            account_type: AccountType::Enterprise,
            company_registration: Some("REG-FLOW".into()),
            phone: None,
        },
    )
    .await?;

    let product = seller_service::create_product(
        &state,
        &seller,
        CreateProductRequest {
            name: "Test Widget".into(),
            description: Some("A product for testing".into()),
            price: 1000,
            stock: 10,
            category_id: None,
            images: vec!["https://img.example/widget.png".into()],
            specifications: Some(serde_json::json!({ "colour": "orange" })),
        },
    )
    .await?
    .data
    .unwrap();

    // Sellers cannot buy their own listings.
    let own = order_service::checkout(&state, &seller, checkout(product.id, 1)).await;
    assert!(matches!(own, Err(AppError::BadRequest(_))));

    let placed = order_service::checkout(&state, &buyer, checkout(product.id, 2))
        .await?
        .data
        .unwrap();
    let order = placed.order;
    assert_eq!(order.total_amount, 2000);
    assert_eq!(order.status, "pending");
    assert_eq!(order.payment_status, "unpaid");
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].product_name, "Test Widget");
    assert_eq!(placed.timeline.len(), 1);
    assert_eq!(stock_of(&state, product.id).await?, 8);

    // Buyers cannot move their order along; strangers cannot see it.
    let denied = order_service::change_status(&state, &buyer, order.id, status(OrderStatus::Confirmed)).await;
    assert!(matches!(denied, Err(AppError::Forbidden)));
    let hidden = order_service::get_order(&state, &stranger, order.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    let confirmed = seller_service::update_order_status(
        &state,
        &seller,
        order.id,
        status(OrderStatus::Confirmed),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(confirmed.status, "confirmed");

    let skipped = seller_service::update_order_status(
        &state,
        &seller,
        order.id,
        status(OrderStatus::Delivered),
    )
    .await;
    assert!(matches!(skipped, Err(AppError::BadRequest(_))));

    let wrong_invoice = order_service::pay_order(
        &state,
        &buyer,
        order.id,
        PayOrderRequest {
            invoice_number: "INV-00000000-NOPE".into(),
        },
    )
    .await;
    assert!(matches!(wrong_invoice, Err(AppError::BadRequest(_))));

    let paid = order_service::pay_order(
        &state,
        &buyer,
        order.id,
        PayOrderRequest {
            invoice_number: order.invoice_number.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(paid.order.payment_status, "paid");
    assert!(paid.order.paid_at.is_some());
    assert_eq!(paid.timeline.len(), 2);

    order_service::post_message(
        &state,
        &seller,
        order.id,
        PostMessageRequest {
            body: "  Packing it today  ".into(),
        },
    )
    .await?;
    let messages = order_service::list_messages(&state, &buyer, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(messages.items.len(), 1);
    assert_eq!(messages.items[0].body, "Packing it today");

    let invoice = order_service::get_invoice(&state, &buyer, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(invoice.subtotal, 2000);
    assert_eq!(invoice.total, 2000);

    // Only buyers of the product may review it, once.
    let review = || CreateReviewRequest {
        rating: 5,
        title: Some("Solid".into()),
        comment: "Works as described".into(),
    };
    let not_bought = review_service::create_review(&state, &stranger, product.id, review()).await;
    assert!(matches!(not_bought, Err(AppError::BadRequest(_))));
    review_service::create_review(&state, &buyer, product.id, review()).await?;
    let twice = review_service::create_review(&state, &buyer, product.id, review()).await;
    assert!(matches!(twice, Err(AppError::BadRequest(_))));
    let reviews = review_service::list_reviews(&state, product.id, Pagination::default())
        .await?
        .data
        .unwrap();
    assert_eq!(reviews.items.len(), 1);

    // A second order is cancelled by the buyer and its stock returns.
    let second = order_service::checkout(&state, &buyer, checkout(product.id, 3))
        .await?
        .data
        .unwrap()
        .order;
    assert_eq!(stock_of(&state, product.id).await?, 5);

    let seller_cancel = order_service::cancel_order(&state, &seller, second.id, cancel()).await;
    assert!(matches!(seller_cancel, Err(AppError::Forbidden)));

    let cancelled = order_service::cancel_order(&state, &buyer, second.id, cancel())
        .await?
        .data
        .unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(stock_of(&state, product.id).await?, 8);

    let again = order_service::cancel_order(&state, &buyer, second.id, cancel()).await;
    assert!(matches!(again, Err(AppError::BadRequest(_))));

    let mine = order_service::list_orders(&state, &buyer, OrderListQuery::default())
        .await?
        .data
        .unwrap();
    assert_eq!(mine.items.len(), 2);

    let dashboard = seller_service::dashboard(&state, &seller).await?.data.unwrap();
    assert_eq!(dashboard.product_count, 1);
    assert_eq!(dashboard.order_count, 1);
    assert_eq!(dashboard.units_sold, 2);
    assert_eq!(dashboard.revenue, 2000);

    // Admin moderation.
    let listed = admin_service::list_products(
        &state,
        &admin,
        AdminProductQuery {
            uploader_id: Some(seller.user_id),
            account_type: Some(AccountType::Enterprise),
            q: Some("flow test".into()),
            ..Default::default()
        },
    )
    .await?;
    let items = listed.data.unwrap().items;
    assert_eq!(items.len(), 1);
    let uploader = items[0].uploader.as_ref().unwrap();
    assert_eq!(uploader.business_name.as_deref(), Some("Flow Test Supplies"));
    assert_eq!(uploader.account_type, "enterprise");

    let individual = admin_service::list_products(
        &state,
        &admin,
        AdminProductQuery {
            uploader_id: Some(seller.user_id),
            account_type: Some(AccountType::Individual),
            ..Default::default()
        },
    )
    .await?;
    assert!(individual.data.unwrap().items.is_empty());

    let csv = admin_service::export_products(
        &state,
        &admin,
        AdminProductQuery {
            uploader_id: Some(seller.user_id),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("Test Widget"));

    let low = admin_service::list_low_stock(
        &state,
        &admin,
        LowStockQuery {
            page: Some(1),
            per_page: Some(100),
            threshold: Some(8),
        },
    )
    .await?;
    assert!(
        low.data.unwrap().items.iter().any(|p| p.id == product.id),
        "expected product to appear in low-stock list"
    );

    let not_admin = admin_service::list_products(&state, &seller, AdminProductQuery::default()).await;
    assert!(matches!(not_admin, Err(AppError::Forbidden)));

    Ok(())
}

fn checkout(product_id: Uuid, quantity: i32) -> CheckoutRequest {
    CheckoutRequest {
        items: vec![CheckoutItem {
            product_id,
            quantity,
        }],
        shipping_address: ShippingAddress {
            full_name: "Flow Buyer".into(),
            phone: "+1 555 0100".into(),
            line1: "1 Test Road".into(),
            line2: None,
            city: "Testville".into(),
            state: None,
            postal_code: "12345".into(),
            country: "US".into(),
        },
        payment_method: "card".into(),
    }
}

fn status(status: OrderStatus) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest { status, note: None }
}

fn cancel() -> CancelOrderRequest {
    CancelOrderRequest {
        reason: Some("Changed my mind".into()),
    }
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} vanished"))?;
    Ok(product.stock)
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = orm_from_pool(&pool);
    run_migrations(&orm).await?;

    let leads_file = std::env::temp_dir().join(format!("leads-{}.json", Uuid::new_v4()));
    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        redis_url: None,
        cache_ttl: Duration::from_secs(60),
        cache_max_entries: 100,
        rate_limit_max: 100,
        rate_limit_window: Duration::from_secs(60),
        trusted_origins: vec!["http://localhost:3000".into()],
        leads_file: leads_file.clone(),
        slow_request: Duration::from_millis(500),
    };

    Ok(AppState {
        pool,
        orm,
        config: Arc::new(config),
        cache: Arc::new(ResponseCache::new(Duration::from_secs(60), 100)),
        leads: Arc::new(LeadStore::new(leads_file)),
    })
}

// Each run uses fresh accounts so the flow can share a database with other runs.
async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    let user = UserActive {
        id: Set(id),
        email: Set(format!("{role}-{id}@example.com")),
        password_hash: Set("dummy".into()),
        name: Set(format!("Flow {role}")),
        role: Set(role.into()),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}
