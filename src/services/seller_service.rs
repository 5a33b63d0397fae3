use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, QueryTrait, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        orders::{OrderList, UpdateOrderStatusRequest},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
        seller::{SellerDashboard, UpsertSellerProfileRequest},
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::{
            ActiveModel as ProductActive, Column as ProdCol, Entity as Products,
            Model as ProductModel,
        },
        seller_profiles::{
            ActiveModel as ProfileActive, Column as ProfileCol, Entity as SellerProfiles,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_seller},
    models::{AccountType, Order, OrderStatus, Product, SellerProfile},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, ProductQuery, SortOrder},
    services::{order_service, product_service::validate_product_fields},
    state::AppState,
};

pub const LOW_STOCK_THRESHOLD: i32 = 5;

pub async fn dashboard(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<SellerDashboard>> {
    ensure_seller(user)?;

    let own = Products::find().filter(ProdCol::SellerId.eq(user.user_id));
    let product_count = own.clone().count(&state.orm).await? as i64;
    let active_product_count = own
        .clone()
        .filter(ProdCol::IsActive.eq(true))
        .count(&state.orm)
        .await? as i64;
    let low_stock_count = own
        .filter(ProdCol::IsActive.eq(true))
        .filter(ProdCol::Stock.lte(LOW_STOCK_THRESHOLD))
        .count(&state.orm)
        .await? as i64;

    let (order_count, units_sold, revenue): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(DISTINCT oi.order_id)::BIGINT,
            COALESCE(SUM(oi.quantity), 0)::BIGINT,
            COALESCE(SUM(oi.quantity::BIGINT * oi.price), 0)::BIGINT
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        WHERE oi.seller_id = $1 AND o.status <> $2
        "#,
    )
    .bind(user.user_id)
    .bind(OrderStatus::Cancelled.as_str())
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Dashboard",
        SellerDashboard {
            product_count,
            active_product_count,
            low_stock_count,
            order_count,
            units_sold,
            revenue,
        },
        Some(Meta::empty()),
    ))
}

pub fn validate_profile(payload: &UpsertSellerProfileRequest) -> AppResult<()> {
    if payload.business_name.trim().is_empty() {
        return Err(AppError::BadRequest("business_name is required".into()));
    }
    let registration = payload
        .company_registration
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    if payload.account_type == AccountType::Enterprise && registration.is_none() {
        return Err(AppError::BadRequest(
            "company_registration is required for enterprise accounts".into(),
        ));
    }
    Ok(())
}

pub async fn upsert_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpsertSellerProfileRequest,
) -> AppResult<ApiResponse<SellerProfile>> {
    ensure_seller(user)?;
    validate_profile(&payload)?;

    let registration = payload
        .company_registration
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let existing = SellerProfiles::find()
        .filter(ProfileCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?;

    let profile = match existing {
        Some(profile) => {
            let mut active: ProfileActive = profile.into();
            active.business_name = Set(payload.business_name.trim().to_string());
            active.account_type = Set(payload.account_type.as_str().to_string());
            active.company_registration = Set(registration);
            active.phone = Set(payload.phone);
            active.updated_at = Set(Utc::now().into());
            active.update(&state.orm).await?
        }
        None => {
            ProfileActive {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.user_id),
                business_name: Set(payload.business_name.trim().to_string()),
                account_type: Set(payload.account_type.as_str().to_string()),
                company_registration: Set(registration),
                phone: Set(payload.phone),
                created_at: NotSet,
                updated_at: NotSet,
            }
            .insert(&state.orm)
            .await?
        }
    };

    // Product detail shows the business name.
    state.cache.invalidate_catalog();

    Ok(ApiResponse::success(
        "Profile saved",
        SellerProfile::from(profile),
        Some(Meta::empty()),
    ))
}

/// All of the seller's products, including deactivated ones.
pub async fn list_products(
    state: &AppState,
    user: &AuthUser,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_seller(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Products::find()
        .filter(ProdCol::SellerId.eq(user.user_id))
        .order_by_desc(ProdCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

fn specifications_text(value: Option<serde_json::Value>) -> Option<String> {
    value.filter(|v| !v.is_null()).map(|v| v.to_string())
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_seller(user)?;
    validate_product_fields(
        Some(&payload.name),
        Some(payload.price),
        Some(payload.stock),
        Some(&payload.images),
    )?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        seller_id: Set(user.user_id),
        category_id: Set(payload.category_id),
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        images: Set(serde_json::json!(payload.images)),
        specifications: Set(specifications_text(payload.specifications)),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

async fn find_owned_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ProductModel> {
    let product = match Products::find_by_id(id).one(&state.orm).await? {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    if product.seller_id != user.user_id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(product)
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_seller(user)?;
    validate_product_fields(
        payload.name.as_deref(),
        payload.price,
        payload.stock,
        payload.images.as_deref(),
    )?;

    let existing = find_owned_product(state, user, id).await?;
    let mut active: ProductActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(category_id) = payload.category_id {
        active.category_id = Set(Some(category_id));
    }
    if let Some(images) = payload.images {
        active.images = Set(serde_json::json!(images));
    }
    if payload.specifications.is_some() {
        active.specifications = Set(specifications_text(payload.specifications));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

/// Deactivates the product. Order history keeps referencing it.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_seller(user)?;
    let existing = find_owned_product(state, user, id).await?;

    let mut active: ProductActive = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "product_deactivate",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_seller(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let seller_orders = OrderItems::find()
        .select_only()
        .column(OrderItemCol::OrderId)
        .filter(OrderItemCol::SellerId.eq(user.user_id))
        .into_query();

    let mut condition = Condition::all().add(OrderCol::Id.in_subquery(seller_orders));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Orders", OrderList { items }, Some(meta)))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_seller(user)?;
    order_service::change_status(state, user, id, payload).await
}
