use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, JoinType, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Select, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        admin::{AdminProduct, AdminProductList, ProductStatusRequest, Uploader},
        orders::{OrderList, UpdateOrderStatusRequest},
        products::ProductList,
    },
    entity::{
        orders::{Column as OrderCol, Entity as Orders},
        products::{
            ActiveModel as ProductActive, Column as ProdCol, Entity as Products,
            Model as ProductModel, Relation as ProductRel,
        },
        seller_profiles::{Column as ProfileCol, Entity as SellerProfiles},
        users::{Column as UserCol, Entity as Users, Relation as UserRel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{AccountType, Order, Product},
    response::{ApiResponse, Meta},
    routes::params::{AdminProductQuery, LowStockQuery, OrderListQuery, SortOrder},
    services::{order_service, product_service::contains_pattern},
    state::AppState,
};

const DEFAULT_LOW_STOCK: i32 = 5;
const MAX_EXPORT_ROWS: u64 = 10_000;

pub const CSV_HEADER: [&str; 12] = [
    "id",
    "name",
    "price",
    "stock",
    "is_active",
    "category_id",
    "seller_id",
    "seller_email",
    "business_name",
    "account_type",
    "created_at",
    "updated_at",
];

fn start_of_day(date: NaiveDate) -> chrono::DateTime<Utc> {
    NaiveDateTime::from(date).and_utc()
}

/// Moderation filters. Every present filter is AND-ed; `q` and `accountType`
/// each expand to an OR group over the product and its uploader.
pub fn admin_product_condition(query: &AdminProductQuery) -> Condition {
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col((Products, ProdCol::Name)).ilike(pattern.clone()))
                .add(Expr::col((Products, ProdCol::Description)).ilike(pattern.clone()))
                .add(Expr::col((Users, UserCol::Email)).ilike(pattern.clone()))
                .add(Expr::col((SellerProfiles, ProfileCol::BusinessName)).ilike(pattern)),
        );
    }

    if let Some(uploader_id) = query.uploader_id {
        condition = condition.add(ProdCol::SellerId.eq(uploader_id));
    }

    match query.account_type {
        Some(AccountType::Enterprise) => {
            condition = condition
                .add(
                    Condition::any()
                        .add(ProfileCol::AccountType.eq(AccountType::Enterprise.as_str()))
                        .add(ProfileCol::CompanyRegistration.is_not_null()),
                )
                .add(UserCol::IsActive.eq(true));
        }
        Some(AccountType::Individual) => {
            condition = condition
                .add(
                    Condition::any()
                        .add(ProfileCol::AccountType.eq(AccountType::Individual.as_str()))
                        .add(ProfileCol::Id.is_null()),
                )
                .add(UserCol::IsActive.eq(true));
        }
        None => {}
    }

    if let Some(is_active) = query.is_active {
        condition = condition.add(ProdCol::IsActive.eq(is_active));
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(ProdCol::CategoryId.eq(category_id));
    }

    if let Some(from) = query.date_from {
        condition = condition.add(ProdCol::CreatedAt.gte(start_of_day(from)));
    }

    if let Some(to) = query.date_to {
        // Inclusive day: everything before the next midnight.
        if let Some(next_day) = to.succ_opt() {
            condition = condition.add(ProdCol::CreatedAt.lt(start_of_day(next_day)));
        }
    }

    condition
}

/// Products joined with their uploader and (optional) seller profile.
pub fn admin_product_select(query: &AdminProductQuery) -> Select<Products> {
    Products::find()
        .join(JoinType::InnerJoin, ProductRel::Seller.def())
        .join(JoinType::LeftJoin, UserRel::SellerProfile.def())
        .filter(admin_product_condition(query))
        .order_by_desc(ProdCol::CreatedAt)
}

fn validate_date_range(query: &AdminProductQuery) -> AppResult<()> {
    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        if from > to {
            return Err(AppError::BadRequest(
                "dateFrom must not be after dateTo".into(),
            ));
        }
    }
    Ok(())
}

async fn load_uploaders(
    state: &AppState,
    products: &[ProductModel],
) -> AppResult<HashMap<Uuid, Uploader>> {
    let mut seller_ids: Vec<Uuid> = products.iter().map(|p| p.seller_id).collect();
    seller_ids.sort_unstable();
    seller_ids.dedup();

    let rows = Users::find()
        .filter(UserCol::Id.is_in(seller_ids))
        .find_also_related(SellerProfiles)
        .all(&state.orm)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(user, profile)| {
            let uploader = Uploader {
                id: user.id,
                email: user.email,
                name: user.name,
                is_active: user.is_active,
                business_name: profile.as_ref().map(|p| p.business_name.clone()),
                account_type: profile
                    .as_ref()
                    .map(|p| p.account_type.clone())
                    .unwrap_or_else(|| AccountType::Individual.as_str().to_string()),
                company_registration: profile.and_then(|p| p.company_registration),
            };
            (uploader.id, uploader)
        })
        .collect())
}

pub async fn list_products(
    state: &AppState,
    user: &AuthUser,
    query: AdminProductQuery,
) -> AppResult<ApiResponse<AdminProductList>> {
    ensure_admin(user)?;
    validate_date_range(&query)?;
    let (page, limit, offset) = query.pagination().normalize();

    let finder = admin_product_select(&query);
    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let uploaders = load_uploaders(state, &products).await?;

    let items = products
        .into_iter()
        .map(|product| AdminProduct {
            uploader: uploaders.get(&product.seller_id).cloned(),
            product: Product::from(product),
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Products",
        AdminProductList { items },
        Some(meta),
    ))
}

/// Quotes a CSV field when it holds a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn csv_row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut row = fields
        .into_iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

pub fn render_products_csv(items: &[AdminProduct]) -> String {
    let mut out = csv_row(CSV_HEADER);
    for item in items {
        let product = &item.product;
        let uploader = item.uploader.as_ref();
        out.push_str(&csv_row([
            product.id.to_string(),
            product.name.clone(),
            product.price.to_string(),
            product.stock.to_string(),
            product.is_active.to_string(),
            product.category_id.map(|id| id.to_string()).unwrap_or_default(),
            product.seller_id.to_string(),
            uploader.map(|u| u.email.clone()).unwrap_or_default(),
            uploader
                .and_then(|u| u.business_name.clone())
                .unwrap_or_default(),
            uploader.map(|u| u.account_type.clone()).unwrap_or_default(),
            product.created_at.to_rfc3339(),
            product.updated_at.to_rfc3339(),
        ]));
    }
    out
}

/// Same filters as the list, without paging. Returns the CSV document.
pub async fn export_products(
    state: &AppState,
    user: &AuthUser,
    query: AdminProductQuery,
) -> AppResult<String> {
    ensure_admin(user)?;
    validate_date_range(&query)?;

    let products = admin_product_select(&query)
        .limit(MAX_EXPORT_ROWS)
        .all(&state.orm)
        .await?;
    let uploaders = load_uploaders(state, &products).await?;

    let items: Vec<AdminProduct> = products
        .into_iter()
        .map(|product| AdminProduct {
            uploader: uploaders.get(&product.seller_id).cloned(),
            product: Product::from(product),
        })
        .collect();

    audit::record(
        &state.pool,
        user.user_id,
        "product_export",
        "products",
        serde_json::json!({ "rows": items.len() }),
    )
    .await;
    tracing::info!(rows = items.len(), "products exported");

    Ok(render_products_csv(&items))
}

pub async fn set_product_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: ProductStatusRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ProductActive = existing.into();
    active.is_active = Set(payload.is_active);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "product_status_update",
        "products",
        serde_json::json!({ "product_id": product.id, "is_active": product.is_active }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK);
    if threshold < 0 {
        return Err(AppError::BadRequest("threshold must not be negative".into()));
    }
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Products::find()
        .filter(ProdCol::Stock.lte(threshold))
        .order_by_asc(ProdCol::Stock)
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
    Ok(ApiResponse::success("Low stock", ProductList { items }, Some(meta)))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
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
    ensure_admin(user)?;
    order_service::change_status(state, user, id, payload).await
}
