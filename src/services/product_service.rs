use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::{
    dto::products::{ProductDetail, ProductList, ReviewSummary},
    entity::{
        categories::Entity as Categories,
        products::{Column, Entity as Products},
        reviews::{Column as ReviewCol, Entity as Reviews},
        seller_profiles::{Column as ProfileCol, Entity as SellerProfiles},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    models::{Category, Product},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// `%search%` for ILIKE with the search text's own wildcards escaped.
pub fn contains_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Storefront filter: only active products, plus the optional query filters.
pub fn catalog_condition(query: &ProductQuery) -> Condition {
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(search) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col((Products, Column::Name)).ilike(pattern.clone()))
                .add(Expr::col((Products, Column::Description)).ilike(pattern)),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(seller_id) = query.seller_id {
        condition = condition.add(Column::SellerId.eq(seller_id));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    condition
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::BadRequest(
                "min_price must not exceed max_price".into(),
            ));
        }
    }

    let (page, limit, offset) = query.pagination().normalize();
    let condition = catalog_condition(&query);

    let sort_col = match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

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

#[derive(Debug, FromQueryResult)]
struct RatingRow {
    average_rating: Option<f64>,
    review_count: i64,
}

pub async fn review_summary(state: &AppState, product_id: Uuid) -> AppResult<ReviewSummary> {
    let row = Reviews::find()
        .select_only()
        .column_as(
            Expr::cust("CAST(AVG(\"reviews\".\"rating\") AS DOUBLE PRECISION)"),
            "average_rating",
        )
        .column_as(Expr::cust("COUNT(*)"), "review_count")
        .filter(ReviewCol::ProductId.eq(product_id))
        .into_model::<RatingRow>()
        .one(&state.orm)
        .await?;

    Ok(match row {
        Some(row) => ReviewSummary {
            average_rating: row.average_rating.map(|avg| (avg * 10.0).round() / 10.0),
            review_count: row.review_count,
        },
        None => ReviewSummary {
            average_rating: None,
            review_count: 0,
        },
    })
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    let product = Products::find_by_id(id)
        .filter(Column::IsActive.eq(true))
        .one(&state.orm)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let category = match product.category_id {
        Some(category_id) => Categories::find_by_id(category_id)
            .one(&state.orm)
            .await?
            .map(Category::from),
        None => None,
    };

    let business_name = SellerProfiles::find()
        .filter(ProfileCol::UserId.eq(product.seller_id))
        .one(&state.orm)
        .await?
        .map(|profile| profile.business_name);
    let seller_name = match business_name {
        Some(name) => Some(name),
        None => Users::find_by_id(product.seller_id)
            .one(&state.orm)
            .await?
            .map(|user| user.name),
    };

    let reviews = review_summary(state, product.id).await?;

    let detail = ProductDetail {
        product: Product::from(product),
        category,
        seller_name,
        reviews,
    };
    Ok(ApiResponse::success("Product", detail, None))
}

/// Shared checks for seller-supplied product fields.
pub fn validate_product_fields(
    name: Option<&str>,
    price: Option<i64>,
    stock: Option<i32>,
    images: Option<&[String]>,
) -> AppResult<()> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::BadRequest("Product name is required".into()));
    }
    if price.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }
    if let Some(images) = images {
        if images.len() > 10 {
            return Err(AppError::BadRequest("At most 10 images are allowed".into()));
        }
        if images.iter().any(|url| url.trim().is_empty()) {
            return Err(AppError::BadRequest("Image URLs must not be empty".into()));
        }
    }
    Ok(())
}
